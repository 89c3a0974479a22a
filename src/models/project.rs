use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned project identifier
pub type ProjectId = i64;

/// Where a project sits in its one-way lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Submitted,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Submitted => "submitted",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProjectStatus::Active),
            "submitted" => Ok(ProjectStatus::Submitted),
            other => Err(format!("unknown project status '{other}'")),
        }
    }
}

/// A project record that has not been stored yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    /// ISO date as entered; compared, never validated
    pub due_date: Option<String>,
    /// Data URI, or empty when the project has no banner
    pub banner: String,
    pub question1: String,
    pub question2: String,
    /// Data URIs in upload order
    pub files: Vec<String>,
    pub links: Vec<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

impl NewProject {
    /// An empty active project stamped with the given creation time
    pub fn new(title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            due_date: None,
            banner: String::new(),
            question1: String::new(),
            question2: String::new(),
            files: Vec::new(),
            links: Vec::new(),
            status: ProjectStatus::Active,
            created_at,
        }
    }

    /// Attach the id the store assigned to this record
    pub fn with_id(self, id: ProjectId) -> Project {
        Project {
            id,
            title: self.title,
            description: self.description,
            due_date: self.due_date,
            banner: self.banner,
            question1: self.question1,
            question2: self.question2,
            files: self.files,
            links: self.links,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// A stored project. Values handed out by the store are owned copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub description: String,
    pub due_date: Option<String>,
    pub banner: String,
    pub question1: String,
    pub question2: String,
    pub files: Vec<String>,
    pub links: Vec<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn is_submitted(&self) -> bool {
        self.status == ProjectStatus::Submitted
    }

    pub fn has_banner(&self) -> bool {
        !self.banner.is_empty()
    }

    /// Due date parsed as a calendar date, if it is one
    pub fn due_date_parsed(&self) -> Option<NaiveDate> {
        self.due_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
    }
}
