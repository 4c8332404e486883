//! Error types for curriculum-content

use thiserror::Error;

use crate::permissions::PermissionLevel;
use crate::workflow::WorkflowStatus;

#[derive(Error, Debug)]
pub enum CurriculumError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {user} needs {required} on {target}")]
    PermissionDenied {
        user: String,
        target: String,
        required: PermissionLevel,
    },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Transition {from} -> {to} requires a comment")]
    MissingComment {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid ordering: {0}")]
    InvalidOrdering(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Variant generation failed: {0}")]
    GenerationFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CurriculumError {
    /// True for errors that reject the request itself rather than signal a fault
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CurriculumError::Validation(_)
                | CurriculumError::PermissionDenied { .. }
                | CurriculumError::InvalidTransition { .. }
                | CurriculumError::MissingComment { .. }
                | CurriculumError::InvalidState(_)
                | CurriculumError::Conflict(_)
                | CurriculumError::InvalidOrdering(_)
                | CurriculumError::NotFound(_)
        )
    }
}

pub type Result<T, E = CurriculumError> = std::result::Result<T, E>;
