//! Shared fixtures for router and socket tests.

use std::sync::Arc;

use vedit_models::{Project, Resolution, Timeline};
use vedit_queue::{JobQueue, ProgressBroadcaster, QueueConfig};
use vedit_store::{InMemoryProjectRepository, InMemoryRenderRepository, ProjectRepository};
use vedit_worker::{RenderOrchestrator, RenderService};

use crate::auth::JwtVerifier;
use crate::config::ApiConfig;
use crate::state::AppState;

pub const SECRET: &str = "router-test-secret";

/// State with "project-1" owned by "alice", plus the orchestrator a worker
/// would drive.
pub async fn test_app() -> (AppState, Arc<RenderOrchestrator>) {
    let projects = Arc::new(InMemoryProjectRepository::new());
    projects
        .put(&Project::new(
            "project-1",
            "alice",
            Timeline::new(Resolution::new(1280, 720), 4.0),
        ))
        .await
        .unwrap();
    let orchestrator = Arc::new(RenderOrchestrator::new(
        Arc::new(InMemoryRenderRepository::new()),
        projects.clone(),
    ));
    let queue = Arc::new(JobQueue::new(QueueConfig::default()));
    let renders = Arc::new(RenderService::new(projects, orchestrator.clone(), queue));

    let state = AppState::new(
        ApiConfig::default(),
        renders,
        Arc::new(ProgressBroadcaster::new(8)),
        Arc::new(JwtVerifier::new(SECRET)),
    );
    (state, orchestrator)
}

pub async fn test_state() -> AppState {
    test_app().await.0
}

pub fn token(user: &str) -> String {
    JwtVerifier::new(SECRET)
        .issue_token(user, chrono::Duration::minutes(5))
        .unwrap()
}
