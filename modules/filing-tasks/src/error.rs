use thiserror::Error;

use crate::model::{Category, TaskId};

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Upstream index unreachable. Recoverable: the company contributes zero filings.
    #[error("Filing source unavailable for {company_id}: {reason}")]
    SourceUnavailable { company_id: String, reason: String },

    /// Assembly cannot meet a category target. Fatal, nothing is written.
    #[error("Insufficient filings for category {category}: needed {needed}, available {available}")]
    InsufficientFilings {
        category: Category,
        needed: usize,
        available: usize,
    },

    #[error("Task store {path} is unreadable: {reason}")]
    CorruptTaskStore { path: String, reason: String },

    #[error("Invalid filing listing {path}: {reason}")]
    InvalidListing { path: String, reason: String },

    #[error("Invalid company source {path}: {reason}")]
    InvalidCompanies { path: String, reason: String },

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    /// A local artifact no longer hashes to its recorded checksum.
    #[error("Checksum mismatch for {filename}: recorded {recorded}, found {actual}")]
    ChecksumMismatch {
        filename: String,
        recorded: String,
        actual: String,
    },

    #[error("Invalid client identifier {0:?}: must include a contact email address")]
    InvalidClientIdentifier(String),

    #[error("Renderer setup failed: {0}")]
    RendererSetup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
