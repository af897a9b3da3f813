//! In-process render job queue and progress fan-out.
//!
//! This crate provides:
//! - A priority job queue keyed by render id with retry/backoff bookkeeping
//! - Bounded history of finished jobs
//! - A per-render progress broadcaster

pub mod broadcaster;
pub mod error;
pub mod history;
pub mod queue;
pub mod retry;

pub use broadcaster::{ProgressBroadcaster, SubscriberId, Subscription};
pub use error::{QueueError, QueueResult};
pub use history::{HistoryEntry, JobOutcome};
pub use queue::{
    EnqueueOutcome, FailOutcome, JobQueue, LeasedJob, QueueConfig, QueueEntry, QueueJobState,
    QueueStats,
};
pub use retry::RetryPolicy;
