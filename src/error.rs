use crate::models::ProjectId;

/// Failures of the image normalization pipeline
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("could not decode image")]
    Decode(#[source] image::ImageError),

    #[error("could not encode image")]
    Encode(#[source] image::ImageError),

    #[error(
        "image still {size_mb:.2}MB after {attempts} attempts (quality {last_quality:.1}), limit is {limit_mb}MB"
    )]
    CompressionLimitExceeded {
        attempts: u32,
        last_quality: f32,
        size_mb: f64,
        limit_mb: f64,
    },

    #[error("file is {size} bytes; please select files under {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("not a base64 image data URI")]
    InvalidDataUri,

    #[error("image worker stopped")]
    Worker(#[from] tokio::task::JoinError),
}

/// Failures of the project store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project store unavailable: {0}")]
    Unavailable(String),

    #[error("project {0} not found")]
    NotFound(ProjectId),

    #[error("stored project {id} is unreadable: {reason}")]
    Corrupt { id: ProjectId, reason: String },

    #[error("could not encode project: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures of a create/edit/submit/delete transaction as a whole
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Please select no more than {max} files.")]
    TooManyFiles { max: usize, selected: usize },

    #[error("Error processing image")]
    Banner(#[source] ImageError),

    #[error("project {0} has been submitted and can no longer be edited")]
    AlreadySubmitted(ProjectId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// True when the underlying cause is a missing project
    pub fn is_not_found(&self) -> bool {
        matches!(self, LifecycleError::Store(StoreError::NotFound(_)))
    }
}
