//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job is not active: {0}")]
    NotActive(String),
}

impl QueueError {
    pub fn job_not_found(id: impl ToString) -> Self {
        Self::JobNotFound(id.to_string())
    }

    pub fn not_active(id: impl ToString) -> Self {
        Self::NotActive(id.to_string())
    }
}
