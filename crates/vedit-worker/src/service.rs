//! Render-start and render-status operations.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use vedit_models::{
    RenderId, RenderJobView, RenderRecord, RenderSettings, RenderSettingsPatch, RenderStatus,
    RenderStatusView,
};
use vedit_queue::{EnqueueOutcome, JobQueue, QueueJobState, QueueStats};
use vedit_store::ProjectRepository;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::orchestrator::RenderOrchestrator;

/// Body of a render-start request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRenderRequest {
    pub project_id: String,
    #[serde(default)]
    pub settings: Option<RenderSettingsPatch>,
    /// Higher values are dequeued first.
    #[serde(default)]
    pub priority: i32,
}

/// Front door of the pipeline: validates, records and enqueues renders and
/// answers status queries.
pub struct RenderService {
    projects: Arc<dyn ProjectRepository>,
    orchestrator: Arc<RenderOrchestrator>,
    queue: Arc<JobQueue>,
}

impl RenderService {
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        orchestrator: Arc<RenderOrchestrator>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            projects,
            orchestrator,
            queue,
        }
    }

    /// Create a pending render for `project_id` and enqueue it.
    ///
    /// A missing or foreign project is rejected before any record exists.
    pub async fn start_render(
        &self,
        owner_id: &str,
        request: StartRenderRequest,
    ) -> WorkerResult<RenderJobView> {
        let project = self
            .projects
            .get(&request.project_id)
            .await?
            .ok_or_else(|| WorkerError::project_not_found(&request.project_id))?;
        if !project.is_owned_by(owner_id) {
            return Err(WorkerError::access_denied(format!(
                "project {} is not accessible",
                request.project_id
            )));
        }

        let mut settings = RenderSettings::defaults_for(&project.timeline);
        if let Some(patch) = &request.settings {
            settings = settings.merged(patch);
        }
        settings
            .validate()
            .map_err(|e| WorkerError::invalid_settings(e.to_string()))?;

        let record = RenderRecord::new(&project.id, owner_id, settings);
        self.orchestrator.register(&record).await?;

        match self.queue.enqueue(record.id.clone(), request.priority).await {
            Ok(EnqueueOutcome::Enqueued) => {}
            Ok(EnqueueOutcome::AlreadyActive) => {
                warn!(render_id = %record.id, "Fresh render id was already queued");
            }
            Err(e) => {
                // Never leave a pending record that no worker will pick up
                if let Err(fail_err) = self.orchestrator.fail(&record.id, &e.to_string()).await {
                    warn!(render_id = %record.id, error = %fail_err, "Failed to mark unqueued render");
                }
                return Err(e.into());
            }
        }

        metrics::record_render_enqueued();
        info!(
            render_id = %record.id,
            project_id = %project.id,
            owner_id,
            resolution = %record.settings.resolution,
            "Render queued"
        );
        Ok(RenderJobView::from(&record))
    }

    /// Re-enqueue every render a previous process accepted but never
    /// finished. Run once at startup, before workers start pulling.
    ///
    /// Interrupted `processing` records get a fresh attempt; the queue's
    /// attempt count starts over.
    pub async fn resume_unfinished(&self) -> WorkerResult<usize> {
        let mut resumed = 0;
        for record in self.orchestrator.unfinished().await? {
            match self.queue.enqueue(record.id.clone(), 0).await? {
                EnqueueOutcome::Enqueued => {
                    resumed += 1;
                    info!(
                        render_id = %record.id,
                        status = %record.status,
                        attempts = record.attempts,
                        "Resumed unfinished render"
                    );
                }
                EnqueueOutcome::AlreadyActive => {}
            }
        }
        if resumed > 0 {
            metrics::record_renders_resumed(resumed as u64);
        }
        Ok(resumed)
    }

    /// Current status of a render owned by `caller_id`.
    pub async fn status(&self, id: &RenderId, caller_id: &str) -> WorkerResult<RenderStatusView> {
        let record = self
            .orchestrator
            .get(id)
            .await?
            .ok_or_else(|| WorkerError::render_not_found(id))?;
        if record.owner_id != caller_id {
            return Err(WorkerError::access_denied(format!("render {} is not accessible", id)));
        }

        if record.is_terminal() {
            return Ok(record.view());
        }

        let Some(entry) = self.queue.get(id).await else {
            return Ok(record.view());
        };

        let (status, progress) = match entry.state {
            QueueJobState::Active => (RenderStatus::Processing, entry.progress),
            QueueJobState::Waiting
                if entry.attempts == 0 && record.status != RenderStatus::Processing =>
            {
                (RenderStatus::Queued, 0)
            }
            // Backing off between attempts; the next attempt restarts at 0
            QueueJobState::Waiting | QueueJobState::Delayed => (RenderStatus::Processing, 0),
        };

        let mut view = record.view();
        view.status = status;
        view.progress = progress;
        Ok(view)
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use vedit_models::{Project, Resolution, Timeline, VideoCodec};
    use vedit_queue::QueueConfig;
    use vedit_store::{InMemoryProjectRepository, InMemoryRenderRepository};

    struct Fixture {
        service: RenderService,
        renders: Arc<InMemoryRenderRepository>,
        orchestrator: Arc<RenderOrchestrator>,
        queue: Arc<JobQueue>,
    }

    async fn fixture() -> Fixture {
        let renders = Arc::new(InMemoryRenderRepository::new());
        let projects = Arc::new(InMemoryProjectRepository::new());
        let mut timeline = Timeline::new(Resolution::new(1080, 1920), 8.0);
        timeline.fps = 24;
        projects.put(&Project::new("p1", "alice", timeline)).await.unwrap();

        let orchestrator = Arc::new(RenderOrchestrator::new(renders.clone(), projects.clone()));
        let queue = Arc::new(JobQueue::new(QueueConfig::default()));
        let service = RenderService::new(projects, orchestrator.clone(), queue.clone());
        Fixture {
            service,
            renders,
            orchestrator,
            queue,
        }
    }

    fn request() -> StartRenderRequest {
        StartRenderRequest {
            project_id: "p1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_wire_format() {
        let req: StartRenderRequest = serde_json::from_str(
            r#"{"projectId":"p1","settings":{"fps":25,"includeCaptions":false}}"#,
        )
        .unwrap();
        assert_eq!(req.project_id, "p1");
        assert_eq!(req.priority, 0);
        let patch = req.settings.unwrap();
        assert_eq!(patch.fps, Some(25));
        assert_eq!(patch.include_captions, Some(false));
    }

    #[tokio::test]
    async fn test_start_derives_defaults_from_timeline() {
        let f = fixture().await;
        let view = f.service.start_render("alice", request()).await.unwrap();

        assert_eq!(view.status, RenderStatus::Pending);
        assert_eq!(view.progress, 0);
        assert_eq!(view.settings.resolution, Resolution::new(1080, 1920));
        assert_eq!(view.settings.fps, 24);
        assert_eq!(f.queue.stats().await.waiting, 1);
    }

    #[tokio::test]
    async fn test_start_merges_patch() {
        let f = fixture().await;
        let req = StartRenderRequest {
            settings: Some(RenderSettingsPatch {
                codec: Some(VideoCodec::H265),
                fps: Some(60),
                ..Default::default()
            }),
            ..request()
        };
        let view = f.service.start_render("alice", req).await.unwrap();

        assert_eq!(view.settings.codec, VideoCodec::H265);
        assert_eq!(view.settings.fps, 60);
        assert_eq!(view.settings.resolution, Resolution::new(1080, 1920));
    }

    #[tokio::test]
    async fn test_foreign_project_rejected_before_record() {
        let f = fixture().await;

        let err = f.service.start_render("mallory", request()).await.unwrap_err();
        assert!(matches!(err, WorkerError::AccessDenied(_)));

        let missing = StartRenderRequest {
            project_id: "nope".into(),
            ..Default::default()
        };
        let err = f.service.start_render("alice", missing).await.unwrap_err();
        assert!(matches!(err, WorkerError::ProjectNotFound(_)));

        assert!(f.renders.is_empty().await);
        assert_eq!(f.queue.stats().await.waiting, 0);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let f = fixture().await;
        let req = StartRenderRequest {
            settings: Some(RenderSettingsPatch {
                fps: Some(0),
                ..Default::default()
            }),
            ..request()
        };
        let err = f.service.start_render("alice", req).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidSettings(_)));
        assert!(f.renders.is_empty().await);
    }

    #[tokio::test]
    async fn test_status_precedence() {
        let f = fixture().await;
        let view = f.service.start_render("alice", request()).await.unwrap();
        let id = view.id;

        let status = f.service.status(&id, "alice").await.unwrap();
        assert_eq!(status.status, RenderStatus::Queued);

        let job = f.queue.dequeue().await.unwrap();
        f.orchestrator.begin_attempt(&job.render_id).await.unwrap();
        f.queue.report_progress(&id, 35).await;
        let status = f.service.status(&id, "alice").await.unwrap();
        assert_eq!(status.status, RenderStatus::Processing);
        assert_eq!(status.progress, 35);

        f.orchestrator.complete(&id, "https://cdn.test/out.mp4").await.unwrap();
        let status = f.service.status(&id, "alice").await.unwrap();
        assert_eq!(status.status, RenderStatus::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.output_location.as_deref(), Some("https://cdn.test/out.mp4"));

        assert!(matches!(
            f.service.status(&id, "bob").await,
            Err(WorkerError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_unfinished_after_restart() {
        let f = fixture().await;
        let waiting = assert_ok!(f.service.start_render("alice", request()).await);
        let interrupted = assert_ok!(f.service.start_render("alice", request()).await);
        let done = assert_ok!(f.service.start_render("alice", request()).await);
        assert_ok!(f.orchestrator.begin_attempt(&interrupted.id).await);
        assert_ok!(f.orchestrator.begin_attempt(&done.id).await);
        assert_ok!(f.orchestrator.complete(&done.id, "https://cdn.test/done.mp4").await);

        // Same records, fresh queue: what a new process sees
        let queue = Arc::new(JobQueue::new(QueueConfig::default()));
        let service = RenderService::new(
            Arc::clone(&f.service.projects),
            f.orchestrator.clone(),
            queue.clone(),
        );

        assert_eq!(assert_ok!(service.resume_unfinished().await), 2);
        assert_eq!(queue.stats().await.waiting, 2);
        assert_eq!(assert_ok!(service.resume_unfinished().await), 0);

        let status = assert_ok!(service.status(&waiting.id, "alice").await);
        assert_eq!(status.status, RenderStatus::Queued);
        // An interrupted render never reads as queued again
        let status = assert_ok!(service.status(&interrupted.id, "alice").await);
        assert_eq!(status.status, RenderStatus::Processing);
        assert_eq!(status.progress, 0);
        let status = assert_ok!(service.status(&done.id, "alice").await);
        assert_eq!(status.status, RenderStatus::Completed);
    }

    #[tokio::test]
    async fn test_closed_queue_fails_record() {
        let f = fixture().await;
        f.queue.close().await;

        let err = f.service.start_render("alice", request()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Queue(_)));
        assert_eq!(f.renders.len().await, 1);
    }
}
