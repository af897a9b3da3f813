//! Shared data models for the VEdit render pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Timeline snapshots (layers, transitions, captions)
//! - Render settings and render records
//! - Progress events streamed to subscribers
//! - Encoding defaults

pub mod encoding;
pub mod events;
pub mod project;
pub mod render;
pub mod timeline;

// Re-export common types
pub use events::RenderEvent;
pub use project::Project;
pub use render::{
    EncodePreset, RenderId, RenderJobView, RenderRecord, RenderSettings, RenderSettingsPatch,
    RenderStatus, RenderStatusView, VideoCodec, Watermark, WatermarkPosition,
};
pub use timeline::{
    AspectRatio, AudioLayer, BackgroundMusic, CaptionStyle, ImageLayer, Layer, LayerCommon,
    LayerKind, Position, Resolution, TextAlignment, TextLayer, TimeWindow, Timeline, Transition,
    TransitionType, VideoLayer,
};
