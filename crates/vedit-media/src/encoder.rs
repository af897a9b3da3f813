//! Plan execution against the external encoder.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info};

use vedit_models::encoding::{DEFAULT_AUDIO_BITRATE, DEFAULT_AUDIO_CODEC, DEFAULT_PIXEL_FORMAT};
use vedit_models::RenderSettings;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::graph::CompositionPlan;
use crate::probe::probe_media;

/// Executes a composition plan and reports whole-percent progress.
///
/// Percent values are sent in the order the encoder produces them; callers
/// decide how to cap and deduplicate them.
#[async_trait]
pub trait PlanEncoder: Send + Sync {
    async fn encode(
        &self,
        plan: &CompositionPlan,
        settings: &RenderSettings,
        output: &Path,
        progress: mpsc::UnboundedSender<u8>,
    ) -> MediaResult<()>;
}

/// Build the full FFmpeg invocation for a plan.
pub fn build_render_command(
    plan: &CompositionPlan,
    settings: &RenderSettings,
    output: &Path,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(output);
    for input in &plan.inputs {
        cmd = cmd.input_with_args(input.args(), input.source.clone());
    }

    cmd = cmd
        .filter_complex(plan.filter_complex())
        .map_label(&plan.video_output);

    cmd = match &plan.audio_output {
        Some(label) => cmd
            .map_label(label)
            .audio_codec(DEFAULT_AUDIO_CODEC)
            .audio_bitrate(DEFAULT_AUDIO_BITRATE),
        None => cmd.no_audio(),
    };

    cmd = cmd
        .video_codec(settings.codec.encoder())
        .preset(settings.preset.as_str())
        .crf(settings.quality)
        .output_arg("-r")
        .output_arg(settings.fps.to_string())
        .output_arg("-pix_fmt")
        .output_arg(DEFAULT_PIXEL_FORMAT);

    if !settings.bitrate.trim().is_empty() {
        cmd = cmd.video_bitrate(settings.bitrate.trim());
    }

    cmd.output_arg("-t")
        .output_arg(format!("{:.3}", plan.duration))
        .output_arg("-movflags")
        .output_arg("+faststart")
}

/// FFmpeg-backed encoder.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    timeout_secs: Option<u64>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, secs: Option<u64>) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[async_trait]
impl PlanEncoder for FfmpegEncoder {
    async fn encode(
        &self,
        plan: &CompositionPlan,
        settings: &RenderSettings,
        output: &Path,
        progress: mpsc::UnboundedSender<u8>,
    ) -> MediaResult<()> {
        if plan.duration <= 0.0 {
            return Err(MediaError::invalid_output("timeline has zero duration"));
        }

        let cmd = build_render_command(plan, settings, output);
        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        let total_ms = (plan.duration * 1000.0).round() as i64;
        info!(
            inputs = plan.inputs.len(),
            stages = plan.stages.len(),
            duration = plan.duration,
            "Starting encode"
        );

        runner
            .run_with_progress(&cmd, move |p| {
                let _ = progress.send(p.percent(total_ms));
            })
            .await?;

        // Never hand back an output the encoder did not actually produce
        let info = probe_media(output).await?;
        if info.duration <= 0.0 || info.size == 0 {
            return Err(MediaError::invalid_output(format!(
                "encoder produced an empty file ({} bytes, {:.3}s)",
                info.size, info.duration
            )));
        }
        debug!(duration = info.duration, size = info.size, "Encode verified");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::compile;
    use vedit_models::{Resolution, Timeline, VideoCodec};

    #[test]
    fn test_render_command_without_audio() {
        let timeline = Timeline::new(Resolution::new(1280, 720), 4.0);
        let mut settings = RenderSettings::defaults_for(&timeline);
        settings.codec = VideoCodec::Vp9;

        let plan = compile(&timeline, &settings);
        let args = build_render_command(&plan, &settings, Path::new("/tmp/out.mp4")).build_args();

        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.contains(&"[vout]".to_string()));
        assert!(!args.contains(&"[aout]".to_string()));
        let t = args.iter().rposition(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "4.000");
        let b = args.iter().position(|a| a == "-b:v").unwrap();
        assert_eq!(args[b + 1], "5M");
    }
}
