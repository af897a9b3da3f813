//! In-process render job queue keyed by render id.
//!
//! At most one job exists per render id while it is waiting, backing off or
//! running. Waiting jobs are handed out by priority (larger first), then in
//! enqueue order. Failed attempts are rescheduled with exponential backoff
//! until the attempt ceiling is reached.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vedit_models::RenderId;

use crate::error::{QueueError, QueueResult};
use crate::history::{HistoryEntry, JobHistory, JobOutcome};
use crate::retry::RetryPolicy;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub retry: RetryPolicy,
    /// How long completed jobs stay in history
    pub keep_completed: Duration,
    /// How long failed jobs stay in history
    pub keep_failed: Duration,
    /// Max entries per history list
    pub keep_count: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            keep_completed: Duration::from_secs(24 * 3600),
            keep_failed: Duration::from_secs(7 * 24 * 3600),
            keep_count: 1000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry: RetryPolicy::default()
                .with_max_attempts(env_parse("RENDER_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts))
                .with_base_delay(Duration::from_millis(
                    env_parse("RENDER_BACKOFF_BASE_MS").unwrap_or(5000),
                ))
                .with_max_delay(Duration::from_millis(
                    env_parse("RENDER_BACKOFF_MAX_MS").unwrap_or(300_000),
                )),
            keep_completed: Duration::from_secs(
                env_parse("RENDER_KEEP_COMPLETED_SECS").unwrap_or(86_400),
            ),
            keep_failed: Duration::from_secs(env_parse("RENDER_KEEP_FAILED_SECS").unwrap_or(604_800)),
            keep_count: env_parse("RENDER_KEEP_COMPLETED_COUNT").unwrap_or(defaults.keep_count),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job for this render id is already waiting or running; nothing changed.
    AlreadyActive,
}

/// Result of reporting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled; the next attempt starts after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// Attempt ceiling reached; the job left the queue.
    Exhausted { attempts: u32 },
}

/// Job state inside the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueJobState {
    Waiting,
    /// Backing off before the next attempt
    Delayed,
    Active,
}

/// A job handed to a worker for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedJob {
    pub render_id: RenderId,
    /// 1-based attempt number
    pub attempt: u32,
    pub priority: i32,
}

/// Snapshot of a job in the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub render_id: RenderId,
    pub state: QueueJobState,
    pub priority: i32,
    /// Attempts started so far
    pub attempts: u32,
    /// Live progress of the current attempt
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct Job {
    priority: i32,
    seq: u64,
    state: QueueJobState,
    attempts: u32,
    progress: u8,
    last_error: Option<String>,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct State {
    jobs: HashMap<RenderId, Job>,
    /// (priority desc, seq asc)
    waiting: BTreeSet<(Reverse<i32>, u64, RenderId)>,
    delayed: BTreeSet<(Instant, u64, RenderId)>,
    history: JobHistory,
    next_seq: u64,
    closed: bool,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Move delayed jobs whose backoff has elapsed into the waiting set.
    fn promote_due(&mut self, now: Instant) {
        while let Some(first) = self.delayed.first().cloned() {
            if first.0 > now {
                break;
            }
            self.delayed.remove(&first);
            let render_id = first.2;
            let seq = self.next_seq();
            if let Some(job) = self.jobs.get_mut(&render_id) {
                job.state = QueueJobState::Waiting;
                job.seq = seq;
                self.waiting.insert((Reverse(job.priority), seq, render_id));
            }
        }
    }

    fn pop_waiting(&mut self) -> Option<LeasedJob> {
        let (Reverse(priority), _, render_id) = self.waiting.pop_first()?;
        let job = self.jobs.get_mut(&render_id)?;
        job.state = QueueJobState::Active;
        job.attempts += 1;
        job.progress = 0;
        Some(LeasedJob {
            render_id,
            attempt: job.attempts,
            priority,
        })
    }

    fn active_job(&mut self, render_id: &RenderId) -> QueueResult<&mut Job> {
        let job = self
            .jobs
            .get_mut(render_id)
            .ok_or_else(|| QueueError::job_not_found(render_id))?;
        if job.state != QueueJobState::Active {
            return Err(QueueError::not_active(render_id));
        }
        Ok(job)
    }

    fn finish(&mut self, render_id: &RenderId, outcome: JobOutcome, error: Option<String>) -> u32 {
        let attempts = self.jobs.remove(render_id).map(|j| j.attempts).unwrap_or(0);
        self.history.record(HistoryEntry {
            render_id: render_id.clone(),
            outcome,
            attempts,
            error,
            finished_at: Utc::now(),
        });
        attempts
    }
}

/// The render job queue.
pub struct JobQueue {
    config: QueueConfig,
    state: Mutex<State>,
    notify: Notify,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let history = JobHistory::new(config.keep_completed, config.keep_failed, config.keep_count);
        Self {
            config,
            state: Mutex::new(State {
                jobs: HashMap::new(),
                waiting: BTreeSet::new(),
                delayed: BTreeSet::new(),
                history,
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a render. A render id that is already queued or running is
    /// left untouched.
    pub async fn enqueue(&self, render_id: RenderId, priority: i32) -> QueueResult<EnqueueOutcome> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.jobs.contains_key(&render_id) {
            debug!(render_id = %render_id, "Render already active, enqueue absorbed");
            return Ok(EnqueueOutcome::AlreadyActive);
        }

        let seq = state.next_seq();
        state.jobs.insert(
            render_id.clone(),
            Job {
                priority,
                seq,
                state: QueueJobState::Waiting,
                attempts: 0,
                progress: 0,
                last_error: None,
                enqueued_at: Utc::now(),
            },
        );
        state.waiting.insert((Reverse(priority), seq, render_id.clone()));
        drop(state);

        info!(render_id = %render_id, priority, "Enqueued render job");
        self.notify.notify_one();
        Ok(EnqueueOutcome::Enqueued)
    }

    /// Wait for the next job. Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<LeasedJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_ready = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(job) = state.pop_waiting() {
                    debug!(render_id = %job.render_id, attempt = job.attempt, "Dequeued render job");
                    return Some(job);
                }
                state.delayed.first().map(|d| d.0)
            };

            match next_ready {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark the active attempt as successful.
    pub async fn complete(&self, render_id: &RenderId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.active_job(render_id)?;
        let attempts = state.finish(render_id, JobOutcome::Completed, None);
        debug!(render_id = %render_id, attempts, "Render job completed");
        Ok(())
    }

    /// Record a failed attempt, rescheduling it while attempts remain.
    pub async fn fail(&self, render_id: &RenderId, error: &str) -> QueueResult<FailOutcome> {
        let mut state = self.state.lock().await;
        let closed = state.closed;
        let job = state.active_job(render_id)?;
        let attempts = job.attempts;

        if !self.config.retry.should_retry(attempts) || closed {
            let attempts = state.finish(render_id, JobOutcome::Failed, Some(error.to_string()));
            warn!(render_id = %render_id, attempts, "Render job exhausted its attempts");
            return Ok(FailOutcome::Exhausted { attempts });
        }

        let delay = self.config.retry.delay_for_attempt(attempts);
        let ready_at = Instant::now() + delay;
        job.state = QueueJobState::Delayed;
        job.progress = 0;
        job.last_error = Some(error.to_string());
        let seq = job.seq;
        state.delayed.insert((ready_at, seq, render_id.clone()));
        drop(state);

        // Wake an idle worker so it can start timing the backoff
        self.notify.notify_one();
        Ok(FailOutcome::Retrying {
            attempt: attempts,
            delay,
        })
    }

    /// Fail without retrying, for errors another attempt cannot fix.
    pub async fn fail_permanent(&self, render_id: &RenderId, error: &str) -> QueueResult<u32> {
        let mut state = self.state.lock().await;
        state.active_job(render_id)?;
        Ok(state.finish(render_id, JobOutcome::Failed, Some(error.to_string())))
    }

    /// Update live progress of the active attempt.
    ///
    /// Returns false (and changes nothing) when the job is not active or
    /// `percent` would move progress backwards.
    pub async fn report_progress(&self, render_id: &RenderId, percent: u8) -> bool {
        let mut state = self.state.lock().await;
        match state.active_job(render_id) {
            Ok(job) if percent >= job.progress => {
                job.progress = percent.min(100);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the job for `render_id`, if it is still in the queue.
    pub async fn get(&self, render_id: &RenderId) -> Option<QueueEntry> {
        let state = self.state.lock().await;
        state.jobs.get(render_id).map(|job| QueueEntry {
            render_id: render_id.clone(),
            state: job.state,
            priority: job.priority,
            attempts: job.attempts,
            progress: job.progress,
            last_error: job.last_error.clone(),
            enqueued_at: job.enqueued_at,
        })
    }

    pub async fn stats(&self) -> QueueStats {
        let mut state = self.state.lock().await;
        state.history.prune(Utc::now());
        let active = state
            .jobs
            .values()
            .filter(|j| j.state == QueueJobState::Active)
            .count();
        QueueStats {
            waiting: state.waiting.len(),
            delayed: state.delayed.len(),
            active,
            completed: state.history.completed_len(),
            failed: state.history.failed_len(),
        }
    }

    /// Recently finished jobs, newest first.
    pub async fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let mut state = self.state.lock().await;
        state.history.prune(Utc::now());
        state.history.recent(limit)
    }

    /// Stop handing out jobs and wake every waiting worker.
    ///
    /// Active attempts may still complete or fail; failures are no longer
    /// rescheduled.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if !state.closed {
            state.closed = true;
            info!(
                waiting = state.waiting.len(),
                delayed = state.delayed.len(),
                "Render queue closed"
            );
        }
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_ok, assert_pending, assert_ready, task};

    fn queue() -> JobQueue {
        JobQueue::new(QueueConfig {
            retry: RetryPolicy::default()
                .with_base_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(1)),
            ..Default::default()
        })
    }

    fn id(s: &str) -> RenderId {
        RenderId::from(s)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_while_active() {
        let queue = queue();
        assert_eq!(queue.enqueue(id("r1"), 0).await.unwrap(), EnqueueOutcome::Enqueued);
        assert_eq!(queue.enqueue(id("r1"), 5).await.unwrap(), EnqueueOutcome::AlreadyActive);
        assert_eq!(queue.stats().await.waiting, 1);

        let job = queue.dequeue().await.unwrap();
        assert_eq!(job.attempt, 1);
        assert_eq!(queue.enqueue(id("r1"), 0).await.unwrap(), EnqueueOutcome::AlreadyActive);
        assert_eq!(queue.stats().await.waiting, 0);

        queue.complete(&id("r1")).await.unwrap();
        assert_eq!(queue.enqueue(id("r1"), 0).await.unwrap(), EnqueueOutcome::Enqueued);
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue = queue();
        queue.enqueue(id("low-1"), 0).await.unwrap();
        queue.enqueue(id("high"), 10).await.unwrap();
        queue.enqueue(id("low-2"), 0).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().render_id, id("high"));
        assert_eq!(queue.dequeue().await.unwrap().render_id, id("low-1"));
        assert_eq!(queue.dequeue().await.unwrap().render_id, id("low-2"));
    }

    #[tokio::test]
    async fn test_dequeue_blocks_until_enqueue() {
        let queue = queue();
        let mut waiter = task::spawn(queue.dequeue());
        assert_pending!(waiter.poll());

        assert_ok!(queue.enqueue(id("r1"), 0).await);
        assert!(waiter.is_woken());
        let job = assert_ready!(waiter.poll()).unwrap();
        assert_eq!(job.render_id, id("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_backs_off_then_retries() {
        let queue = queue();
        queue.enqueue(id("r1"), 0).await.unwrap();

        queue.dequeue().await.unwrap();
        assert!(queue.report_progress(&id("r1"), 40).await);
        let outcome = queue.fail(&id("r1"), "boom").await.unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );

        let entry = queue.get(&id("r1")).await.unwrap();
        assert_eq!(entry.state, QueueJobState::Delayed);
        assert_eq!(entry.progress, 0);
        assert_eq!(entry.last_error.as_deref(), Some("boom"));

        let start = Instant::now();
        let job = queue.dequeue().await.unwrap();
        assert_eq!(job.attempt, 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let queue = queue();
        queue.enqueue(id("r1"), 0).await.unwrap();

        for attempt in 1..=3 {
            let job = queue.dequeue().await.unwrap();
            assert_eq!(job.attempt, attempt);
            let outcome = queue.fail(&id("r1"), "boom").await.unwrap();
            if attempt < 3 {
                assert!(matches!(outcome, FailOutcome::Retrying { .. }));
            } else {
                assert_eq!(outcome, FailOutcome::Exhausted { attempts: 3 });
            }
        }

        assert!(queue.get(&id("r1")).await.is_none());
        let stats = queue.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active + stats.waiting + stats.delayed, 0);
        assert_eq!(queue.history(10).await[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_within_attempt() {
        let queue = queue();
        queue.enqueue(id("r1"), 0).await.unwrap();
        assert!(!queue.report_progress(&id("r1"), 10).await);

        queue.dequeue().await.unwrap();
        assert!(queue.report_progress(&id("r1"), 10).await);
        assert!(queue.report_progress(&id("r1"), 10).await);
        assert!(!queue.report_progress(&id("r1"), 5).await);
        assert!(queue.report_progress(&id("r1"), 60).await);
        assert_eq!(queue.get(&id("r1")).await.unwrap().progress, 60);
    }

    #[tokio::test]
    async fn test_complete_requires_active_job() {
        let queue = queue();
        assert!(matches!(
            queue.complete(&id("missing")).await,
            Err(QueueError::JobNotFound(_))
        ));
        queue.enqueue(id("r1"), 0).await.unwrap();
        assert!(matches!(
            queue.complete(&id("r1")).await,
            Err(QueueError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_workers() {
        let queue = Arc::new(queue());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        assert!(matches!(
            queue.enqueue(id("r1"), 0).await,
            Err(QueueError::Closed)
        ));
    }
}
