//! Worker error types.

use thiserror::Error;

use vedit_models::RenderStatus;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Render not found: {0}")]
    RenderNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid render settings: {0}")]
    InvalidSettings(String),

    #[error("Render {id} is already {status}")]
    AlreadyTerminal { id: String, status: RenderStatus },

    #[error("Illegal status transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: RenderStatus,
        to: RenderStatus,
    },

    #[error("Render attempt failed: {0}")]
    AttemptFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vedit_storage::StorageError),

    #[error("Store error: {0}")]
    Store(#[from] vedit_store::StoreError),

    #[error("Media error: {0}")]
    Media(#[from] vedit_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vedit_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn render_not_found(id: impl ToString) -> Self {
        Self::RenderNotFound(id.to_string())
    }

    pub fn project_not_found(id: impl ToString) -> Self {
        Self::ProjectNotFound(id.to_string())
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }

    pub fn attempt_failed(msg: impl Into<String>) -> Self {
        Self::AttemptFailed(msg.into())
    }

    /// Failures another attempt cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WorkerError::RenderNotFound(_)
                | WorkerError::ProjectNotFound(_)
                | WorkerError::AccessDenied(_)
                | WorkerError::InvalidSettings(_)
                | WorkerError::AlreadyTerminal { .. }
                | WorkerError::IllegalTransition { .. }
        )
    }

    /// Human-readable message stored on a failed render record.
    ///
    /// Encoder failures carry a stderr tail, which is more useful to a
    /// user than the generic exit message.
    pub fn user_message(&self) -> String {
        match self {
            WorkerError::Media(e) => e.detailed_message(),
            other => other.to_string(),
        }
    }
}
