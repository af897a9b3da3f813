//! Render encoding defaults.

use crate::render::EncodePreset;

/// Default target bitrate
pub const DEFAULT_BITRATE: &str = "5M";
/// Default CRF
pub const DEFAULT_QUALITY: u8 = 23;
/// Default encoding preset
pub const DEFAULT_PRESET: EncodePreset = EncodePreset::Medium;
/// Captions are burned in unless the caller opts out
pub const DEFAULT_INCLUDE_CAPTIONS: bool = true;

/// Audio codec for every output
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Output pixel format
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Canvas colour behind every composition
pub const BACKGROUND_COLOR: &str = "black";

pub const DEFAULT_WATERMARK_OPACITY: f64 = 0.8;
/// Distance between watermark and frame edge, in output pixels
pub const WATERMARK_MARGIN: u32 = 10;
/// Watermark width as a fraction of output width
pub const WATERMARK_WIDTH_RATIO: f64 = 0.15;
