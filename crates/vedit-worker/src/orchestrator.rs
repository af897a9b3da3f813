//! Render Orchestrator: the only writer of render records.
//!
//! Every status change goes through [`RenderOrchestrator::update`], which
//! refuses to touch a record that already reached a terminal state and
//! refuses backwards transitions.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use vedit_models::{RenderId, RenderRecord, RenderStatus, Timeline};
use vedit_store::{ProjectRepository, RenderRepository};

use crate::error::{WorkerError, WorkerResult};

pub struct RenderOrchestrator {
    renders: Arc<dyn RenderRepository>,
    projects: Arc<dyn ProjectRepository>,
}

impl RenderOrchestrator {
    pub fn new(renders: Arc<dyn RenderRepository>, projects: Arc<dyn ProjectRepository>) -> Self {
        Self { renders, projects }
    }

    /// Persist a freshly created pending record.
    pub async fn register(&self, record: &RenderRecord) -> WorkerResult<()> {
        if record.status != RenderStatus::Pending {
            return Err(WorkerError::IllegalTransition {
                id: record.id.to_string(),
                from: record.status,
                to: RenderStatus::Pending,
            });
        }
        self.renders.create(record).await?;
        debug!(render_id = %record.id, project_id = %record.project_id, "Registered render record");
        Ok(())
    }

    pub async fn get(&self, id: &RenderId) -> WorkerResult<Option<RenderRecord>> {
        Ok(self.renders.get(id).await?)
    }

    /// Pending or interrupted records, oldest first.
    pub async fn unfinished(&self) -> WorkerResult<Vec<RenderRecord>> {
        Ok(self.renders.list_unfinished().await?)
    }

    /// Record plus the timeline it renders, re-checking project ownership.
    pub async fn load_render_input(&self, id: &RenderId) -> WorkerResult<(RenderRecord, Timeline)> {
        let record = self
            .renders
            .get(id)
            .await?
            .ok_or_else(|| WorkerError::render_not_found(id))?;
        let project = self
            .projects
            .get(&record.project_id)
            .await?
            .ok_or_else(|| WorkerError::project_not_found(&record.project_id))?;
        if !project.is_owned_by(&record.owner_id) {
            return Err(WorkerError::access_denied(format!(
                "project {} is not owned by {}",
                project.id, record.owner_id
            )));
        }
        Ok((record, project.timeline))
    }

    /// Start a processing attempt: `pending|processing -> processing`,
    /// progress back to 0.
    pub async fn begin_attempt(&self, id: &RenderId) -> WorkerResult<RenderRecord> {
        let record = self
            .update(id, RenderStatus::Processing, |record| {
                record.progress = 0;
                record.attempts += 1;
                record.started_at.get_or_insert_with(Utc::now);
            })
            .await?;
        info!(render_id = %id, attempt = record.attempts, "Render attempt started");
        Ok(record)
    }

    /// Raise progress of the running attempt.
    ///
    /// Returns `Ok(false)` without writing when `percent` does not move
    /// progress forward. Values are capped at 99; 100 belongs to
    /// [`complete`](Self::complete).
    pub async fn update_progress(&self, id: &RenderId, percent: u8) -> WorkerResult<bool> {
        let percent = percent.min(99);
        let current = self
            .renders
            .get(id)
            .await?
            .ok_or_else(|| WorkerError::render_not_found(id))?;
        if current.status != RenderStatus::Processing {
            return Err(WorkerError::IllegalTransition {
                id: id.to_string(),
                from: current.status,
                to: RenderStatus::Processing,
            });
        }
        if percent <= current.progress {
            return Ok(false);
        }

        self.apply(current, RenderStatus::Processing, |record| {
            record.progress = percent;
        })
        .await?;
        Ok(true)
    }

    /// `processing -> completed` with the stored output location.
    pub async fn complete(&self, id: &RenderId, output_location: &str) -> WorkerResult<RenderRecord> {
        let record = self
            .update(id, RenderStatus::Completed, |record| {
                record.progress = 100;
                record.output_location = Some(output_location.to_string());
                record.error_message = None;
                record.completed_at = Some(Utc::now());
            })
            .await?;
        info!(render_id = %id, output = output_location, "Render completed");
        Ok(record)
    }

    /// Move to the terminal `failed` state.
    pub async fn fail(&self, id: &RenderId, message: &str) -> WorkerResult<RenderRecord> {
        let record = self
            .update(id, RenderStatus::Failed, |record| {
                record.error_message = Some(message.to_string());
                record.completed_at = Some(Utc::now());
            })
            .await?;
        warn!(render_id = %id, error = message, "Render failed");
        Ok(record)
    }

    /// Load, check the transition, mutate, save.
    async fn update<F>(&self, id: &RenderId, next: RenderStatus, mutate: F) -> WorkerResult<RenderRecord>
    where
        F: FnOnce(&mut RenderRecord),
    {
        let current = self
            .renders
            .get(id)
            .await?
            .ok_or_else(|| WorkerError::render_not_found(id))?;
        self.apply(current, next, mutate).await
    }

    async fn apply<F>(&self, mut record: RenderRecord, next: RenderStatus, mutate: F) -> WorkerResult<RenderRecord>
    where
        F: FnOnce(&mut RenderRecord),
    {
        if record.is_terminal() {
            return Err(WorkerError::AlreadyTerminal {
                id: record.id.to_string(),
                status: record.status,
            });
        }
        if !record.status.can_transition_to(next) {
            return Err(WorkerError::IllegalTransition {
                id: record.id.to_string(),
                from: record.status,
                to: next,
            });
        }

        record.status = next;
        mutate(&mut record);
        self.renders.save(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vedit_models::{Project, RenderSettings, Resolution};
    use vedit_store::{InMemoryProjectRepository, InMemoryRenderRepository};

    async fn setup() -> (RenderOrchestrator, RenderId) {
        let renders = Arc::new(InMemoryRenderRepository::new());
        let projects = Arc::new(InMemoryProjectRepository::new());
        let timeline = Timeline::new(Resolution::new(1280, 720), 5.0);
        projects
            .put(&Project::new("p1", "u1", timeline.clone()))
            .await
            .unwrap();

        let orchestrator = RenderOrchestrator::new(renders, projects);
        let record = RenderRecord::new("p1", "u1", RenderSettings::defaults_for(&timeline));
        orchestrator.register(&record).await.unwrap();
        (orchestrator, record.id)
    }

    #[tokio::test]
    async fn test_happy_path() {
        let (orch, id) = setup().await;

        let record = orch.begin_attempt(&id).await.unwrap();
        assert_eq!(record.status, RenderStatus::Processing);
        assert_eq!(record.attempts, 1);
        assert!(record.started_at.is_some());

        assert!(orch.update_progress(&id, 40).await.unwrap());
        assert!(!orch.update_progress(&id, 30).await.unwrap());
        assert!(orch.update_progress(&id, 100).await.unwrap());
        assert_eq!(orch.get(&id).await.unwrap().unwrap().progress, 99);

        let done = orch.complete(&id, "https://cdn.test/r.mp4").await.unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.output_location.as_deref(), Some("https://cdn.test/r.mp4"));
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_terminal_records_are_immutable() {
        let (orch, id) = setup().await;
        orch.begin_attempt(&id).await.unwrap();
        orch.fail(&id, "boom").await.unwrap();

        assert!(matches!(
            orch.complete(&id, "x").await,
            Err(WorkerError::AlreadyTerminal { .. })
        ));
        assert!(matches!(orch.begin_attempt(&id).await, Err(WorkerError::AlreadyTerminal { .. })));
        assert!(orch.update_progress(&id, 50).await.is_err());

        let record = orch.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RenderStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_retry_resets_progress() {
        let (orch, id) = setup().await;
        orch.begin_attempt(&id).await.unwrap();
        orch.update_progress(&id, 60).await.unwrap();

        let first_start = orch.get(&id).await.unwrap().unwrap().started_at;
        let record = orch.begin_attempt(&id).await.unwrap();
        assert_eq!(record.progress, 0);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.started_at, first_start);
    }

    #[tokio::test]
    async fn test_progress_requires_processing() {
        let (orch, id) = setup().await;
        assert!(matches!(
            orch.update_progress(&id, 10).await,
            Err(WorkerError::IllegalTransition { .. })
        ));
        assert!(matches!(
            orch.complete(&RenderId::from_string("missing"), "x").await,
            Err(WorkerError::RenderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_render_input() {
        let (orch, id) = setup().await;
        let (record, timeline) = orch.load_render_input(&id).await.unwrap();
        assert_eq!(record.id, id);
        assert_eq!(timeline.duration, 5.0);
    }
}
