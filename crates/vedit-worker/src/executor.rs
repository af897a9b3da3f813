//! Worker pool.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vedit_models::RenderEvent;
use vedit_queue::{FailOutcome, LeasedJob};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::render_job::{process_render, RenderContext};

/// Fixed-size pool of workers pulling render jobs from the queue.
///
/// Each worker runs one attempt at a time, so the pool size bounds the
/// number of concurrent encoder processes.
pub struct WorkerPool {
    ctx: Arc<RenderContext>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(ctx: RenderContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.ctx
    }

    /// Spawn the workers. Calling it again while running is a no-op.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        let concurrency = self.ctx.config.concurrency.max(1);
        info!(concurrency, work_dir = %self.ctx.config.work_dir.display(), "Starting worker pool");
        for worker_id in 0..concurrency {
            let ctx = Arc::clone(&self.ctx);
            handles.push(tokio::spawn(worker_loop(worker_id, ctx)));
        }
    }

    /// Close the queue and wait for in-flight attempts, bounded by the
    /// configured shutdown timeout. Returns false if the timeout elapsed.
    pub async fn shutdown(&self) -> bool {
        self.ctx.queue.close().await;

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        if handles.is_empty() {
            return true;
        }

        info!(workers = handles.len(), "Waiting for in-flight renders to finish...");
        match tokio::time::timeout(self.ctx.config.shutdown_timeout, join_all(handles)).await {
            Ok(_) => {
                info!("Worker pool stopped");
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.ctx.config.shutdown_timeout.as_secs(),
                    "Worker pool shutdown timed out"
                );
                false
            }
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<RenderContext>) {
    info!(worker_id, "Worker started");
    while let Some(job) = ctx.queue.dequeue().await {
        execute_job(Arc::clone(&ctx), job).await;
    }
    info!(worker_id, "Worker stopped");
}

/// Run one attempt and settle it with the queue.
///
/// The attempt runs in its own task so a panic is recorded as a failed
/// attempt instead of taking the worker down.
pub async fn execute_job(ctx: Arc<RenderContext>, job: LeasedJob) {
    let attempt_ctx = Arc::clone(&ctx);
    let attempt_job = job.clone();
    let result = tokio::spawn(async move { process_render(&attempt_ctx, &attempt_job).await })
        .await
        .unwrap_or_else(|e| Err(WorkerError::attempt_failed(format!("render task panicked: {}", e))));

    let id = &job.render_id;
    match result {
        Ok(_) => {
            if let Err(e) = ctx.queue.complete(id).await {
                error!(render_id = %id, error = %e, "Failed to complete queue job");
            }
        }
        Err(e) => {
            if let Err(settle_err) = settle_failure(&ctx, &job, &e).await {
                error!(render_id = %id, error = %settle_err, "Failed to record render failure");
            }
        }
    }
}

async fn settle_failure(ctx: &RenderContext, job: &LeasedJob, err: &WorkerError) -> WorkerResult<()> {
    let id = &job.render_id;
    let message = err.user_message();
    let permanent = err.is_permanent();

    if permanent {
        let attempts = ctx.queue.fail_permanent(id, &message).await?;
        error!(render_id = %id, attempts, error = %message, "Render failed permanently");
    } else {
        match ctx.queue.fail(id, &message).await? {
            FailOutcome::Retrying { attempt, delay } => {
                metrics::record_render_retried();
                warn!(
                    render_id = %id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %message,
                    "Render attempt failed, retrying"
                );
                return Ok(());
            }
            FailOutcome::Exhausted { attempts } => {
                error!(render_id = %id, attempts, error = %message, "Render failed after retries");
            }
        }
    }

    metrics::record_render_failed(permanent);
    match ctx.orchestrator.fail(id, &message).await {
        Ok(_) => {}
        // A record that already completed or failed keeps its state
        Err(WorkerError::AlreadyTerminal { .. }) => {
            warn!(render_id = %id, "Render record already terminal, failure not recorded");
            return Ok(());
        }
        Err(e) => return Err(e),
    }
    ctx.broadcaster
        .publish(RenderEvent::error(id.clone(), message))
        .await;
    Ok(())
}
