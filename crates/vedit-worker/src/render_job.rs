//! One render attempt: compile, encode, store, finalize.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn, Instrument};

use vedit_media::{compile, PlanEncoder};
use vedit_models::{RenderEvent, RenderId};
use vedit_queue::{JobQueue, LeasedJob, ProgressBroadcaster};
use vedit_storage::{extension_for, render_output_key, OutputStore};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::orchestrator::RenderOrchestrator;

/// Highest percent reported while the encoder is still running.
pub const MAX_IN_FLIGHT_PROGRESS: u8 = 99;

/// Services shared by every render attempt.
pub struct RenderContext {
    pub config: WorkerConfig,
    pub orchestrator: Arc<RenderOrchestrator>,
    pub queue: Arc<JobQueue>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub encoder: Arc<dyn PlanEncoder>,
    pub output_store: Arc<dyn OutputStore>,
}

/// Run one attempt for a leased job and return the stored output location.
///
/// Queue bookkeeping (complete/fail) is left to the caller; this function
/// drives the render record and publishes events.
pub async fn process_render(ctx: &RenderContext, job: &LeasedJob) -> WorkerResult<String> {
    let logger = JobLogger::new(&job.render_id, job.attempt);
    let span = logger.create_span();
    run_attempt(ctx, job, &logger).instrument(span).await
}

async fn run_attempt(ctx: &RenderContext, job: &LeasedJob, logger: &JobLogger) -> WorkerResult<String> {
    let id = &job.render_id;

    ctx.orchestrator.begin_attempt(id).await?;
    metrics::record_attempt_started();
    ctx.broadcaster.publish(RenderEvent::progress(id.clone(), 0)).await;

    let (record, timeline) = ctx.orchestrator.load_render_input(id).await?;
    let settings = record.settings;

    let plan = compile(&timeline, &settings);
    logger.log_start(&format!(
        "{} inputs, {} stages, {}s at {}",
        plan.inputs.len(),
        plan.stages.len(),
        plan.duration,
        plan.resolution
    ));

    tokio::fs::create_dir_all(&ctx.config.work_dir).await?;
    let scratch = tempfile::Builder::new()
        .prefix(&format!("render-{}-", id))
        .tempdir_in(&ctx.config.work_dir)?;
    let output = scratch
        .path()
        .join(format!("output.{}", extension_for(settings.codec)));

    let started = Instant::now();
    let (tx, rx) = mpsc::unbounded_channel();
    let encode = ctx.encoder.encode(&plan, &settings, &output, tx);
    let forward = forward_progress(ctx, id, rx, logger);
    let (encoded, last_percent) = tokio::join!(encode, forward);
    encoded?;
    let encode_secs = started.elapsed().as_secs_f64();
    debug!(render_id = %id, last_percent, encode_secs, "Encode finished");

    let location = store_output(ctx, id, &output, settings.codec).await?;

    ctx.orchestrator.complete(id, &location).await?;
    ctx.broadcaster
        .publish(RenderEvent::complete(id.clone(), location.clone()))
        .await;
    metrics::record_render_completed(encode_secs);
    logger.log_completion(&location);

    if let Err(e) = scratch.close() {
        logger.log_warning(&format!("Failed to remove scratch dir: {}", e));
    }
    Ok(location)
}

async fn store_output(
    ctx: &RenderContext,
    id: &RenderId,
    output: &Path,
    codec: vedit_models::VideoCodec,
) -> WorkerResult<String> {
    let key = render_output_key(id, codec);
    let location = ctx.output_store.store(output, &key).await?;
    debug!(render_id = %id, store = ctx.output_store.name(), key, "Output stored");
    Ok(location)
}

/// Relay encoder percentages to the queue, the record and subscribers.
///
/// Only strictly increasing values below 100 are forwarded. Returns the
/// last forwarded percent once the encoder drops its sender.
async fn forward_progress(
    ctx: &RenderContext,
    id: &RenderId,
    mut rx: mpsc::UnboundedReceiver<u8>,
    logger: &JobLogger,
) -> u8 {
    let mut last = 0u8;
    while let Some(percent) = rx.recv().await {
        let percent = percent.min(MAX_IN_FLIGHT_PROGRESS);
        if percent <= last {
            continue;
        }
        last = percent;

        ctx.queue.report_progress(id, percent).await;
        if let Err(e) = ctx.orchestrator.update_progress(id, percent).await {
            warn!(render_id = %id, error = %e, "Failed to persist progress");
        }
        ctx.broadcaster
            .publish(RenderEvent::progress(id.clone(), percent))
            .await;

        if percent % 25 == 0 {
            logger.log_progress(&format!("{}%", percent));
        }
    }
    last
}
