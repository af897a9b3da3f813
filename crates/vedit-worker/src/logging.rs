//! Structured per-render logging.

use tracing::{error, info, warn, Span};
use vedit_models::RenderId;

/// Logs render lifecycle events with the render id and attempt attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    render_id: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(render_id: &RenderId, attempt: u32) -> Self {
        Self {
            render_id: render_id.to_string(),
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            attempt = self.attempt,
            "Render started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            attempt = self.attempt,
            "Render progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            render_id = %self.render_id,
            attempt = self.attempt,
            "Render warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            render_id = %self.render_id,
            attempt = self.attempt,
            "Render error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            attempt = self.attempt,
            "Render completed: {}", message
        );
    }

    pub fn render_id(&self) -> &str {
        &self.render_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span wrapping one render attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "render",
            render_id = %self.render_id,
            attempt = self.attempt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let id = RenderId::from_string("r-42");
        let logger = JobLogger::new(&id, 2);

        assert_eq!(logger.render_id(), "r-42");
        assert_eq!(logger.attempt(), 2);
    }
}
