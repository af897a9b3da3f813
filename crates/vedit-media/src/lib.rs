//! Media layer for the VEdit render pipeline.
//!
//! - `graph`: compiles a timeline into an FFmpeg filter graph plan
//! - `command`: FFmpeg command builder and progress-aware runner
//! - `encoder`: `PlanEncoder` seam and the FFmpeg implementation
//! - `probe`: ffprobe inspection of produced files

pub mod command;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoder::{build_render_command, FfmpegEncoder, PlanEncoder};
pub use error::{MediaError, MediaResult};
pub use graph::{compile, CompositionPlan, PlanInput, Stage, StageKind};
pub use probe::{probe_media, MediaInfo};
pub use progress::FfmpegProgress;
