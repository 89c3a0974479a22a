use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::Project;

/// How far ahead a due date counts as "due soon"
pub const DUE_SOON_DAYS: i64 = 7;

/// Dashboard counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProjectStats {
    pub ongoing: usize,
    pub submitted: usize,
    pub due_soon: usize,
    pub not_due_soon: usize,
}

impl ProjectStats {
    pub fn total(&self) -> usize {
        self.ongoing + self.submitted
    }

    /// Percentage of all projects that `count` represents
    pub fn share(&self, count: usize) -> f64 {
        match self.total() {
            0 => 0.0,
            total => count as f64 * 100.0 / total as f64,
        }
    }
}

/// Split projects into (active, submitted), keeping their relative order
pub fn partition_by_status(projects: Vec<Project>) -> (Vec<Project>, Vec<Project>) {
    let (submitted, active): (Vec<Project>, Vec<Project>) =
        projects.into_iter().partition(Project::is_submitted);
    (active, submitted)
}

/// Active project with a due date inside `[today, today + 7 days]`
pub fn is_due_soon(project: &Project, today: NaiveDate) -> bool {
    if project.is_submitted() {
        return false;
    }

    match project.due_date_parsed() {
        Some(due) => due >= today && due <= today + Duration::days(DUE_SOON_DAYS),
        None => false,
    }
}

pub fn compute_stats(projects: &[Project], today: NaiveDate) -> ProjectStats {
    let ongoing = projects.iter().filter(|p| !p.is_submitted()).count();
    let submitted = projects.len() - ongoing;
    let due_soon = projects.iter().filter(|p| is_due_soon(p, today)).count();

    ProjectStats {
        ongoing,
        submitted,
        due_soon,
        not_due_soon: ongoing - due_soon,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProject, ProjectStatus};
    use chrono::Utc;

    fn project(id: i64, due: Option<&str>, status: ProjectStatus) -> Project {
        let mut new = NewProject::new(format!("Project {id}"), Utc::now());
        new.due_date = due.map(str::to_string);
        new.status = status;
        new.with_id(id)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[test]
    fn due_soon_window_is_inclusive() {
        let today = today();
        assert!(is_due_soon(&project(1, Some("2024-05-10"), ProjectStatus::Active), today));
        assert!(is_due_soon(&project(2, Some("2024-05-17"), ProjectStatus::Active), today));
        assert!(!is_due_soon(&project(3, Some("2024-05-18"), ProjectStatus::Active), today));
        assert!(!is_due_soon(&project(4, Some("2024-05-09"), ProjectStatus::Active), today));
        assert!(!is_due_soon(&project(5, Some("soon"), ProjectStatus::Active), today));
        assert!(!is_due_soon(&project(6, None, ProjectStatus::Active), today));
        assert!(!is_due_soon(&project(7, Some("2024-05-11"), ProjectStatus::Submitted), today));
    }

    #[test]
    fn stats_count_each_bucket() {
        let projects = vec![
            project(1, Some("2024-05-12"), ProjectStatus::Active),
            project(2, Some("2024-06-30"), ProjectStatus::Active),
            project(3, None, ProjectStatus::Active),
            project(4, Some("2024-05-12"), ProjectStatus::Submitted),
        ];

        let stats = compute_stats(&projects, today());

        assert_eq!(
            stats,
            ProjectStats {
                ongoing: 3,
                submitted: 1,
                due_soon: 1,
                not_due_soon: 2,
            }
        );
        assert_eq!(stats.total(), 4);
        assert!((stats.share(stats.submitted) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn share_of_empty_dashboard_is_zero() {
        let stats = compute_stats(&[], today());
        assert_eq!(stats, ProjectStats::default());
        assert_eq!(stats.share(0), 0.0);
    }

    #[test]
    fn partition_keeps_order() {
        let projects = vec![
            project(1, None, ProjectStatus::Submitted),
            project(2, None, ProjectStatus::Active),
            project(3, None, ProjectStatus::Active),
        ];

        let (active, submitted) = partition_by_status(projects);

        assert_eq!(active.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(submitted.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1]);
    }
}
