//! Create, edit, submit and delete flows.
//!
//! Images in a draft are normalized one by one, in upload order, and only once
//! every image has been processed or skipped is the record written to the
//! store. A gallery image that cannot be processed is dropped and reported in
//! a single aggregated warning; anything else aborts the whole save and leaves
//! the stored record as it was.

use std::error::Error as _;
use std::fmt;

use chrono::{NaiveDate, Utc};

use crate::analytics::{self, ProjectStats};
use crate::db::Database;
use crate::error::{ImageError, LifecycleError, StoreError};
use crate::imaging::{self, NormalizeOptions};
use crate::models::{NewProject, Project, ProjectId, ProjectStatus};

/// Most gallery images a project may carry
pub const MAX_FILES: usize = 10;

/// An image slot in a draft
#[derive(Debug, Clone, PartialEq)]
pub enum ImageInput {
    /// A file the user just picked, kept as raw bytes until save
    Picked { name: String, bytes: Vec<u8> },
    /// An already stored data URI, saved back unchanged
    Stored(String),
}

impl ImageInput {
    pub fn picked(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        ImageInput::Picked {
            name: name.into(),
            bytes,
        }
    }

    fn label(&self, position: usize) -> String {
        match self {
            ImageInput::Picked { name, .. } => name.clone(),
            ImageInput::Stored(_) => format!("image {}", position + 1),
        }
    }
}

/// Form contents for a project being created or edited
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectDraft {
    pub title: String,
    pub description: String,
    pub due_date: Option<String>,
    pub question1: String,
    pub question2: String,
    pub banner: Option<ImageInput>,
    pub gallery: Vec<ImageInput>,
    pub links: Vec<String>,
}

impl ProjectDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Draft pre-filled from a stored project
    pub fn from_existing(project: &Project) -> Self {
        Self {
            title: project.title.clone(),
            description: project.description.clone(),
            due_date: project.due_date.clone(),
            question1: project.question1.clone(),
            question2: project.question2.clone(),
            banner: project
                .has_banner()
                .then(|| ImageInput::Stored(project.banner.clone())),
            gallery: project
                .files
                .iter()
                .cloned()
                .map(ImageInput::Stored)
                .collect(),
            links: project.links.clone(),
        }
    }

    /// Append a link; blank input is ignored
    pub fn add_link(&mut self, link: &str) {
        let link = link.trim();
        if !link.is_empty() {
            self.links.push(link.to_string());
        }
    }

    /// Add one selection of picked files to the gallery.
    ///
    /// A selection of more than [`MAX_FILES`] files is rejected as a whole.
    pub fn pick_files(
        &mut self,
        files: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> Result<(), LifecycleError> {
        let files: Vec<_> = files.into_iter().collect();
        if files.len() > MAX_FILES {
            return Err(LifecycleError::TooManyFiles {
                max: MAX_FILES,
                selected: files.len(),
            });
        }

        self.gallery.extend(
            files
                .into_iter()
                .map(|(name, bytes)| ImageInput::picked(name, bytes)),
        );
        Ok(())
    }
}

/// An edit in progress on an active project
#[derive(Debug, Clone)]
pub struct EditSession {
    id: ProjectId,
    pub draft: ProjectDraft,
}

impl EditSession {
    pub fn project_id(&self) -> ProjectId {
        self.id
    }
}

/// A gallery image that was left out of the saved record
#[derive(Debug)]
pub struct SkippedImage {
    pub name: String,
    pub reason: ImageError,
}

/// Every gallery image skipped during one save
#[derive(Debug, Default)]
pub struct ImageWarnings {
    pub skipped: Vec<SkippedImage>,
}

impl ImageWarnings {
    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }
}

impl fmt::Display for ImageWarnings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error processing image: {} image(s) were left out:",
            self.skipped.len()
        )?;
        for skipped in &self.skipped {
            write!(f, "\n  {}: {}", skipped.name, skipped.reason)?;
            if let Some(source) = skipped.reason.source() {
                write!(f, " ({})", source)?;
            }
        }
        Ok(())
    }
}

/// Result of a successful create or edit
#[derive(Debug)]
pub struct SaveOutcome {
    pub id: ProjectId,
    pub warnings: Option<ImageWarnings>,
}

/// Everything the dashboard shows
#[derive(Debug)]
pub struct Dashboard {
    pub active: Vec<Project>,
    pub submitted: Vec<Project>,
    pub stats: ProjectStats,
}

/// Coordinates the image pipeline and the project store
pub struct ProjectService {
    db: Database,
    options: NormalizeOptions,
}

impl ProjectService {
    pub fn new(db: Database, options: NormalizeOptions) -> Self {
        Self { db, options }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Fetch a project for display
    pub async fn view_project(&self, id: ProjectId) -> Result<Project, LifecycleError> {
        self.db
            .get_project(id)
            .await?
            .ok_or(LifecycleError::Store(StoreError::NotFound(id)))
    }

    /// Active and submitted projects plus their counters
    pub async fn dashboard(&self, today: NaiveDate) -> Result<Dashboard, LifecycleError> {
        let projects = self.db.get_all_projects().await?;
        let stats = analytics::compute_stats(&projects, today);
        let (active, submitted) = analytics::partition_by_status(projects);

        Ok(Dashboard {
            active,
            submitted,
            stats,
        })
    }

    /// Process a new draft and store it as an active project
    pub async fn create_project(&self, draft: ProjectDraft) -> Result<SaveOutcome, LifecycleError> {
        check_gallery_size(&draft)?;

        let banner = self.process_banner(draft.banner).await?;
        let (files, warnings) = self.process_gallery(draft.gallery).await;

        let project = NewProject {
            title: draft.title,
            description: draft.description,
            due_date: normalize_due_date(draft.due_date),
            banner,
            question1: draft.question1,
            question2: draft.question2,
            files,
            links: draft.links,
            status: ProjectStatus::Active,
            created_at: Utc::now(),
        };
        let id = self.db.add_project(&project).await?;

        Ok(SaveOutcome {
            id,
            warnings: (!warnings.is_empty()).then_some(warnings),
        })
    }

    /// Start editing a project. Submitted projects cannot be edited.
    pub async fn open_for_edit(&self, id: ProjectId) -> Result<EditSession, LifecycleError> {
        let project = self.view_project(id).await?;
        if project.is_submitted() {
            return Err(LifecycleError::AlreadySubmitted(id));
        }

        Ok(EditSession {
            id,
            draft: ProjectDraft::from_existing(&project),
        })
    }

    /// Process the draft of an edit session and replace the stored project
    pub async fn save_edit(&self, session: EditSession) -> Result<SaveOutcome, LifecycleError> {
        let id = session.project_id();
        let draft = session.draft;
        check_gallery_size(&draft)?;

        let banner = self.process_banner(draft.banner).await?;
        let (files, warnings) = self.process_gallery(draft.gallery).await;

        // The project may have been submitted or deleted since the session opened
        let current = self.view_project(id).await?;
        if current.is_submitted() {
            return Err(LifecycleError::AlreadySubmitted(id));
        }

        let updated = Project {
            title: draft.title,
            description: draft.description,
            due_date: normalize_due_date(draft.due_date),
            banner,
            question1: draft.question1,
            question2: draft.question2,
            files,
            links: draft.links,
            ..current
        };
        self.db.update_project(&updated).await?;

        Ok(SaveOutcome {
            id,
            warnings: (!warnings.is_empty()).then_some(warnings),
        })
    }

    /// Mark a project as submitted. Submitting twice is a no-op.
    pub async fn submit_project(&self, id: ProjectId) -> Result<Project, LifecycleError> {
        let mut project = self.view_project(id).await?;
        if project.is_submitted() {
            return Ok(project);
        }

        project.status = ProjectStatus::Submitted;
        self.db.update_project(&project).await?;
        tracing::info!(id, "project submitted");

        Ok(project)
    }

    pub async fn delete_project(&self, id: ProjectId) -> Result<(), LifecycleError> {
        self.db.delete_project(id).await?;
        Ok(())
    }

    async fn process_banner(&self, banner: Option<ImageInput>) -> Result<String, LifecycleError> {
        match banner {
            None => Ok(String::new()),
            Some(ImageInput::Stored(data_uri)) => Ok(data_uri),
            Some(ImageInput::Picked { name, bytes }) => {
                let encoded = self
                    .normalize_picked(bytes)
                    .await
                    .map_err(LifecycleError::Banner)?;
                tracing::debug!(name = %name, quality = encoded.quality(), "banner normalized");
                Ok(encoded.into_string())
            }
        }
    }

    async fn process_gallery(&self, gallery: Vec<ImageInput>) -> (Vec<String>, ImageWarnings) {
        let mut files = Vec::with_capacity(gallery.len());
        let mut warnings = ImageWarnings::default();

        for (position, input) in gallery.into_iter().enumerate() {
            let name = input.label(position);
            match input {
                ImageInput::Stored(data_uri) => files.push(data_uri),
                ImageInput::Picked { bytes, .. } => match self.normalize_picked(bytes).await {
                    Ok(encoded) => files.push(encoded.into_string()),
                    Err(reason) => {
                        tracing::warn!(name = %name, error = %reason, "skipping gallery image");
                        warnings.skipped.push(SkippedImage { name, reason });
                    }
                },
            }
        }

        (files, warnings)
    }

    async fn normalize_picked(&self, bytes: Vec<u8>) -> Result<imaging::EncodedImage, ImageError> {
        imaging::check_input_size(&bytes)?;
        imaging::normalize_async(bytes, self.options).await
    }
}

fn check_gallery_size(draft: &ProjectDraft) -> Result<(), LifecycleError> {
    if draft.gallery.len() > MAX_FILES {
        return Err(LifecycleError::TooManyFiles {
            max: MAX_FILES,
            selected: draft.gallery.len(),
        });
    }
    Ok(())
}

// An empty date field means no due date
fn normalize_due_date(due_date: Option<String>) -> Option<String> {
    due_date
        .map(|date| date.trim().to_string())
        .filter(|date| !date.is_empty())
}
