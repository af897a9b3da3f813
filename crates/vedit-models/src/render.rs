//! Render records and output settings.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::encoding::{
    DEFAULT_BITRATE, DEFAULT_INCLUDE_CAPTIONS, DEFAULT_PRESET, DEFAULT_QUALITY,
    DEFAULT_WATERMARK_OPACITY,
};
use crate::timeline::{Resolution, Timeline};

/// Unique identifier for a render. Also the queue key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RenderId(pub String);

impl RenderId {
    /// Generate a new random render ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RenderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RenderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a render record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    /// Record created, job not yet picked up
    #[default]
    Pending,
    /// Waiting in the queue (reported from live queue state)
    Queued,
    /// A worker is compiling/encoding
    Processing,
    /// Output stored
    Completed,
    /// Retries exhausted or unrecoverable error
    Failed,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::Pending => "pending",
            RenderStatus::Queued => "queued",
            RenderStatus::Processing => "processing",
            RenderStatus::Completed => "completed",
            RenderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderStatus::Completed | RenderStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            RenderStatus::Pending => 0,
            RenderStatus::Queued => 1,
            RenderStatus::Processing => 2,
            RenderStatus::Completed | RenderStatus::Failed => 3,
        }
    }

    /// Whether a record may move from `self` to `next`.
    ///
    /// Transitions only go forward. `processing -> processing` is allowed so a
    /// retry can start a fresh attempt on the same record.
    pub fn can_transition_to(&self, next: RenderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == RenderStatus::Processing && next == RenderStatus::Processing {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for RenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Vp9,
}

impl VideoCodec {
    /// FFmpeg encoder name.
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
        }
    }
}

/// Encoder speed/quality tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncodePreset {
    Ultrafast,
    Fast,
    #[default]
    Medium,
    Slow,
}

impl EncodePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodePreset::Ultrafast => "ultrafast",
            EncodePreset::Fast => "fast",
            EncodePreset::Medium => "medium",
            EncodePreset::Slow => "slow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

/// Watermark image composited over the final canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    #[validate(length(min = 1))]
    pub url: String,
    #[serde(default)]
    pub position: WatermarkPosition,
    #[serde(default = "default_watermark_opacity")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub opacity: f64,
}

fn default_watermark_opacity() -> f64 {
    DEFAULT_WATERMARK_OPACITY
}

/// Output settings snapshot attached to a render record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettings {
    #[validate(custom(function = "validate_resolution"))]
    pub resolution: Resolution,
    #[validate(range(min = 1, max = 120))]
    pub fps: u32,
    pub codec: VideoCodec,
    /// Target bitrate, FFmpeg syntax ("5M", "800k").
    pub bitrate: String,
    /// CRF. Lower is higher fidelity.
    #[validate(range(max = 51))]
    pub quality: u8,
    pub preset: EncodePreset,
    pub include_captions: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub watermark: Option<Watermark>,
}

fn validate_resolution(resolution: &Resolution) -> Result<(), validator::ValidationError> {
    if resolution.width < 2 || resolution.height < 2 || resolution.width > 7680 || resolution.height > 7680 {
        return Err(validator::ValidationError::new("resolution_out_of_range"));
    }
    Ok(())
}

impl RenderSettings {
    /// Platform defaults derived from a timeline's own resolution and fps.
    pub fn defaults_for(timeline: &Timeline) -> Self {
        Self {
            resolution: timeline.authored_resolution(),
            fps: if timeline.fps == 0 { 30 } else { timeline.fps },
            codec: VideoCodec::default(),
            bitrate: DEFAULT_BITRATE.to_string(),
            quality: DEFAULT_QUALITY,
            preset: DEFAULT_PRESET,
            include_captions: DEFAULT_INCLUDE_CAPTIONS,
            watermark: None,
        }
    }

    /// Shallow merge: every field present in `patch` replaces the default.
    pub fn merged(mut self, patch: &RenderSettingsPatch) -> Self {
        if let Some(resolution) = patch.resolution {
            self.resolution = resolution;
        }
        if let Some(fps) = patch.fps {
            self.fps = fps;
        }
        if let Some(codec) = patch.codec {
            self.codec = codec;
        }
        if let Some(bitrate) = &patch.bitrate {
            self.bitrate = bitrate.clone();
        }
        if let Some(quality) = patch.quality {
            self.quality = quality;
        }
        if let Some(preset) = patch.preset {
            self.preset = preset;
        }
        if let Some(include_captions) = patch.include_captions {
            self.include_captions = include_captions;
        }
        if let Some(watermark) = &patch.watermark {
            self.watermark = Some(watermark.clone());
        }
        self
    }
}

/// Caller-supplied partial settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<VideoCodec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<EncodePreset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_captions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<Watermark>,
}

/// Durable render record. Only the orchestrator mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderRecord {
    pub id: RenderId,
    pub project_id: String,
    pub owner_id: String,
    pub status: RenderStatus,
    /// 0 - 100
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub settings: RenderSettings,
    /// Number of processing attempts started.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RenderRecord {
    /// New pending record.
    pub fn new(
        project_id: impl Into<String>,
        owner_id: impl Into<String>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            id: RenderId::new(),
            project_id: project_id.into(),
            owner_id: owner_id.into(),
            status: RenderStatus::Pending,
            progress: 0,
            output_location: None,
            error_message: None,
            settings,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, id: RenderId) -> Self {
        self.id = id;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn view(&self) -> RenderStatusView {
        RenderStatusView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            output_location: self.output_location.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

/// Answer to a render-status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatusView {
    pub id: RenderId,
    pub status: RenderStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Render-start acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderJobView {
    pub id: RenderId,
    pub status: RenderStatus,
    pub progress: u8,
    pub settings: RenderSettings,
}

impl From<&RenderRecord> for RenderJobView {
    fn from(record: &RenderRecord) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            progress: record.progress,
            settings: record.settings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline() -> Timeline {
        let mut t = Timeline::new(Resolution::new(1080, 1920), 10.0);
        t.fps = 24;
        t
    }

    #[test]
    fn test_defaults_follow_timeline() {
        let settings = RenderSettings::defaults_for(&timeline());
        assert_eq!(settings.resolution, Resolution::new(1080, 1920));
        assert_eq!(settings.fps, 24);
        assert_eq!(settings.codec, VideoCodec::H264);
        assert_eq!(settings.bitrate, "5M");
        assert_eq!(settings.quality, 23);
        assert_eq!(settings.preset, EncodePreset::Medium);
        assert!(settings.include_captions);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_patch_is_shallow_merge() {
        let patch: RenderSettingsPatch = serde_json::from_str(
            r#"{"resolution": {"width": 1280, "height": 720}, "includeCaptions": false}"#,
        )
        .unwrap();

        let settings = RenderSettings::defaults_for(&timeline()).merged(&patch);
        assert_eq!(settings.resolution, Resolution::new(1280, 720));
        assert!(!settings.include_captions);
        assert_eq!(settings.fps, 24);
        assert_eq!(settings.quality, 23);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = RenderSettings::defaults_for(&timeline());
        settings.quality = 60;
        assert!(settings.validate().is_err());

        let mut settings = RenderSettings::defaults_for(&timeline());
        settings.resolution = Resolution::new(0, 720);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_status_transitions() {
        use RenderStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = RenderRecord::new("p1", "u1", RenderSettings::defaults_for(&timeline()));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["projectId"], "p1");
        assert!(json.get("outputLocation").is_none());
        assert_eq!(json["settings"]["includeCaptions"], true);
    }
}
