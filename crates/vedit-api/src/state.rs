//! Application state and service wiring.

use std::sync::Arc;

use tracing::{info, warn};

use vedit_media::{check_ffmpeg, check_ffprobe, FfmpegEncoder, PlanEncoder};
use vedit_queue::{JobQueue, ProgressBroadcaster};
use vedit_storage::{LocalOutputStore, OutputStore, R2Client};
use vedit_store::{
    InMemoryProjectRepository, InMemoryRenderRepository, JsonProjectRepository,
    JsonRenderRepository, ProjectRepository, RenderRepository,
};
use vedit_worker::{RenderContext, RenderOrchestrator, RenderService, WorkerConfig, WorkerPool};

use crate::auth::JwtVerifier;
use crate::config::ApiConfig;

/// Per-subscriber event buffer on the progress channel.
const PROGRESS_BUFFER: usize = 64;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub renders: Arc<RenderService>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub auth: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        renders: Arc<RenderService>,
        broadcaster: Arc<ProgressBroadcaster>,
        auth: Arc<JwtVerifier>,
    ) -> Self {
        Self {
            config,
            renders,
            broadcaster,
            auth,
        }
    }

    /// Build every service from the environment.
    ///
    /// Returns the state for the router plus the (not yet started) worker
    /// pool; the caller owns the pool's lifecycle.
    pub async fn from_env(config: ApiConfig) -> Result<(Self, WorkerPool), Box<dyn std::error::Error>> {
        let secret = config
            .jwt_secret
            .clone()
            .ok_or("JWT_SECRET must be set")?;

        let renders: Arc<dyn RenderRepository> = match std::env::var("RENDERS_DIR") {
            Ok(dir) => Arc::new(JsonRenderRepository::open(dir).await?),
            Err(_) => {
                warn!("RENDERS_DIR not set, render records are kept in memory");
                Arc::new(InMemoryRenderRepository::new())
            }
        };
        let projects: Arc<dyn ProjectRepository> = match std::env::var("PROJECTS_DIR") {
            Ok(dir) => Arc::new(JsonProjectRepository::open(dir).await?),
            Err(_) => {
                warn!("PROJECTS_DIR not set, projects are kept in memory");
                Arc::new(InMemoryProjectRepository::new())
            }
        };

        let output_store: Arc<dyn OutputStore> = match std::env::var("STORAGE_PROVIDER")
            .unwrap_or_else(|_| "local".to_string())
            .as_str()
        {
            "r2" => Arc::new(R2Client::from_env()?),
            "local" => Arc::new(LocalOutputStore::from_env()),
            other => return Err(format!("unknown STORAGE_PROVIDER '{}'", other).into()),
        };
        info!(store = output_store.name(), "Output store configured");

        let worker_config = WorkerConfig::from_env();
        if let Err(e) = check_ffmpeg().and_then(|_| check_ffprobe()) {
            warn!("{}; renders will fail until it is installed", e);
        }
        let encoder: Arc<dyn PlanEncoder> = Arc::new(
            FfmpegEncoder::new().with_timeout(worker_config.encode_timeout.map(|d| d.as_secs())),
        );

        let queue = Arc::new(JobQueue::from_env());
        let broadcaster = Arc::new(ProgressBroadcaster::new(PROGRESS_BUFFER));
        let orchestrator = Arc::new(RenderOrchestrator::new(renders, Arc::clone(&projects)));
        let service = Arc::new(RenderService::new(
            projects,
            Arc::clone(&orchestrator),
            Arc::clone(&queue),
        ));

        let resumed = service.resume_unfinished().await?;
        if resumed > 0 {
            info!(resumed, "Re-enqueued unfinished renders from a previous run");
        }

        let pool = WorkerPool::new(RenderContext {
            config: worker_config,
            orchestrator,
            queue,
            broadcaster: Arc::clone(&broadcaster),
            encoder,
            output_store,
        });

        let state = Self::new(config, service, broadcaster, Arc::new(JwtVerifier::new(&secret)));
        Ok((state, pool))
    }
}
