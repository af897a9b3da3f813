//! Render progress events.
//!
//! Wire shape matches the editor client:
//! `{"event": "render:progress", "data": {"renderId": .., "progress": .., "timestamp": ..}}`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::render::RenderId;

/// Event fanned out to subscribers of one render id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", content = "data")]
pub enum RenderEvent {
    #[serde(rename = "render:progress", rename_all = "camelCase")]
    Progress {
        render_id: RenderId,
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "render:complete", rename_all = "camelCase")]
    Complete {
        render_id: RenderId,
        output_url: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "render:error", rename_all = "camelCase")]
    Error {
        render_id: RenderId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl RenderEvent {
    pub fn progress(render_id: RenderId, progress: u8) -> Self {
        Self::Progress {
            render_id,
            progress: progress.min(100),
            timestamp: Utc::now(),
        }
    }

    pub fn complete(render_id: RenderId, output_url: impl Into<String>) -> Self {
        Self::Complete {
            render_id,
            output_url: output_url.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(render_id: RenderId, error: impl Into<String>) -> Self {
        Self::Error {
            render_id,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn render_id(&self) -> &RenderId {
        match self {
            RenderEvent::Progress { render_id, .. }
            | RenderEvent::Complete { render_id, .. }
            | RenderEvent::Error { render_id, .. } => render_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderEvent::Progress { .. } => "render:progress",
            RenderEvent::Complete { .. } => "render:complete",
            RenderEvent::Error { .. } => "render:error",
        }
    }

    /// Complete and Error end the stream for the current render.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RenderEvent::Progress { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_wire_format() {
        let event = RenderEvent::progress(RenderId::from("r1"), 42);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "render:progress");
        assert_eq!(json["data"]["renderId"], "r1");
        assert_eq!(json["data"]["progress"], 42);
        assert!(json["data"]["timestamp"].is_string());
    }

    #[test]
    fn test_terminal_events() {
        let complete = RenderEvent::complete(RenderId::from("r1"), "https://cdn/out.mp4");
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["event"], "render:complete");
        assert_eq!(json["data"]["outputUrl"], "https://cdn/out.mp4");
        assert!(complete.is_terminal());

        let error = RenderEvent::error(RenderId::from("r1"), "boom");
        assert_eq!(error.name(), "render:error");
        assert!(error.is_terminal());
        assert!(!RenderEvent::progress(RenderId::from("r1"), 1).is_terminal());
    }
}
