//! Filter graph compiler.
//!
//! [`compile`] turns a timeline snapshot plus output settings into a
//! [`CompositionPlan`]: the encoder inputs and the ordered filter stages that
//! composite them into one video (and optionally one audio) stream.
//!
//! Compilation is pure. The same `(timeline, settings)` pair always yields the
//! same plan, down to the rendered `-filter_complex` string, regardless of the
//! order layers are stored in.
//!
//! Malformed layer data never fails a plan: layers are clamped to the
//! timeline, and layers that cannot be drawn (no source, empty window,
//! invisible) are skipped.

use vedit_models::encoding::{BACKGROUND_COLOR, WATERMARK_MARGIN, WATERMARK_WIDTH_RATIO};
use vedit_models::timeline::VisualFilters;
use vedit_models::{
    Layer, Position, RenderSettings, Resolution, TextAlignment, TimeWindow, Timeline,
    TransitionType, WatermarkPosition,
};

/// Label of the solid background canvas.
pub const BACKGROUND_LABEL: &str = "bg";
/// Label of the final video stream.
pub const VIDEO_OUTPUT_LABEL: &str = "vout";
/// Label of the final audio stream.
pub const AUDIO_OUTPUT_LABEL: &str = "aout";

/// What an encoder input carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Video,
    /// Still image, looped for the layer's duration
    Image,
    Audio,
    Watermark,
}

/// One `-i` input of the encoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanInput {
    /// Position in the encoder's input list
    pub index: usize,
    pub kind: InputKind,
    pub source: String,
    /// Layer that owns the input, if any
    pub layer_id: Option<String>,
    /// Seconds to skip into the source
    pub seek: Option<f64>,
    /// Seconds of source to read
    pub duration: Option<f64>,
}

impl PlanInput {
    /// Arguments placed before this input's `-i`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if matches!(self.kind, InputKind::Image | InputKind::Watermark) {
            args.push("-loop".to_string());
            args.push("1".to_string());
        }
        if let Some(seek) = self.seek {
            args.push("-ss".to_string());
            args.push(fmt_num(seek));
        }
        if let Some(duration) = self.duration {
            args.push("-t".to_string());
            args.push(fmt_num(duration));
        }
        args
    }

    fn video_pad(&self) -> String {
        format!("{}:v", self.index)
    }

    fn audio_pad(&self) -> String {
        format!("{}:a", self.index)
    }
}

/// Per-layer preparation chain: scale, colour, rotation, opacity, re-timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleStage {
    pub input: String,
    pub output: String,
    pub layer_id: String,
    pub width: u32,
    pub height: u32,
    /// Output-timeline second at which the layer's first frame appears
    pub start: f64,
    pub adjust: Option<VisualFilters>,
    /// Degrees
    pub rotation: Option<f64>,
    pub opacity: Option<f64>,
    /// Fade-in length in seconds, from a `fade` transition into the layer
    pub fade_in: Option<f64>,
}

/// Caption drawn onto the running canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawTextStage {
    pub input: String,
    pub output: String,
    pub layer_id: String,
    /// Unescaped text content
    pub text: String,
    pub font_size: f64,
    pub color: String,
    pub background_color: Option<String>,
    pub x: f64,
    pub y: f64,
    pub alignment: TextAlignment,
    pub window: TimeWindow,
}

/// Volume, fades and start delay for one audio source.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDelayStage {
    pub input: String,
    pub output: String,
    /// None for background music
    pub layer_id: Option<String>,
    pub volume: f64,
    pub delay_ms: u64,
    pub fade_in: Option<f64>,
    /// `(start, length)` relative to the source's first sample
    pub fade_out: Option<(f64, f64)>,
}

/// A single filter-graph stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Solid canvas every visual layer is composited onto
    Background {
        output: String,
        color: String,
        resolution: Resolution,
        fps: u32,
        window: TimeWindow,
    },
    Scale(ScaleStage),
    /// Composite a prepared layer onto the canvas while its window is active
    Overlay {
        base: String,
        layer: String,
        output: String,
        layer_id: String,
        x: f64,
        y: f64,
        window: TimeWindow,
    },
    DrawText(DrawTextStage),
    Watermark {
        base: String,
        input: String,
        output: String,
        position: WatermarkPosition,
        opacity: f64,
        width: u32,
    },
    /// Normalize the composed canvas to the output resolution
    Resize {
        input: String,
        output: String,
        resolution: Resolution,
    },
    AudioDelay(AudioDelayStage),
    AudioMix {
        inputs: Vec<String>,
        output: String,
    },
    AudioPassthrough {
        input: String,
        output: String,
    },
}

/// Stage discriminant, handy for inspecting plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Background,
    Scale,
    Overlay,
    DrawText,
    Watermark,
    Resize,
    AudioDelay,
    AudioMix,
    AudioPassthrough,
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Background { .. } => StageKind::Background,
            Stage::Scale(_) => StageKind::Scale,
            Stage::Overlay { .. } => StageKind::Overlay,
            Stage::DrawText(_) => StageKind::DrawText,
            Stage::Watermark { .. } => StageKind::Watermark,
            Stage::Resize { .. } => StageKind::Resize,
            Stage::AudioDelay(_) => StageKind::AudioDelay,
            Stage::AudioMix { .. } => StageKind::AudioMix,
            Stage::AudioPassthrough { .. } => StageKind::AudioPassthrough,
        }
    }

    /// Label of the stream this stage produces.
    pub fn output(&self) -> &str {
        match self {
            Stage::Background { output, .. }
            | Stage::Overlay { output, .. }
            | Stage::Watermark { output, .. }
            | Stage::Resize { output, .. }
            | Stage::AudioMix { output, .. }
            | Stage::AudioPassthrough { output, .. } => output,
            Stage::Scale(s) => &s.output,
            Stage::DrawText(s) => &s.output,
            Stage::AudioDelay(s) => &s.output,
        }
    }

    /// Layer the stage belongs to, if any.
    pub fn layer_id(&self) -> Option<&str> {
        match self {
            Stage::Scale(s) => Some(&s.layer_id),
            Stage::Overlay { layer_id, .. } => Some(layer_id),
            Stage::DrawText(s) => Some(&s.layer_id),
            Stage::AudioDelay(s) => s.layer_id.as_deref(),
            _ => None,
        }
    }

    /// Active window for time-gated stages.
    pub fn window(&self) -> Option<TimeWindow> {
        match self {
            Stage::Background { window, .. } | Stage::Overlay { window, .. } => Some(*window),
            Stage::DrawText(s) => Some(s.window),
            _ => None,
        }
    }

    /// Render as one FFmpeg filter chain.
    pub fn to_filter(&self) -> String {
        match self {
            Stage::Background {
                output,
                color,
                resolution,
                fps,
                window,
            } => format!(
                "color=c={}:s={}:r={}:d={}[{}]",
                color,
                resolution,
                fps,
                fmt_num(window.duration()),
                output
            ),
            Stage::Scale(s) => {
                let mut chain = vec![format!("scale={}:{}", s.width, s.height)];
                if let Some(adjust) = &s.adjust {
                    chain.push(eq_filter(adjust));
                }
                if s.rotation.is_some() || s.opacity.is_some() || s.fade_in.is_some() {
                    chain.push("format=rgba".to_string());
                }
                if let Some(degrees) = s.rotation {
                    let rad = fmt_num(degrees.to_radians());
                    chain.push(format!(
                        "rotate={rad}:c=none:ow=rotw({rad}):oh=roth({rad})"
                    ));
                }
                if let Some(opacity) = s.opacity {
                    chain.push(format!("colorchannelmixer=aa={}", fmt_num(opacity)));
                }
                chain.push(format!("setpts=PTS-STARTPTS+{}/TB", fmt_num(s.start)));
                if let Some(fade) = s.fade_in {
                    chain.push(format!(
                        "fade=t=in:st={}:d={}:alpha=1",
                        fmt_num(s.start),
                        fmt_num(fade)
                    ));
                }
                format!("[{}]{}[{}]", s.input, chain.join(","), s.output)
            }
            Stage::Overlay {
                base,
                layer,
                output,
                x,
                y,
                window,
                ..
            } => format!(
                "[{}][{}]overlay={}:{}:eof_action=pass:enable='{}'[{}]",
                base,
                layer,
                fmt_num(*x),
                fmt_num(*y),
                between(window),
                output
            ),
            Stage::DrawText(s) => {
                let x = match s.alignment {
                    TextAlignment::Left => fmt_num(s.x),
                    TextAlignment::Center => format!("{}-text_w/2", fmt_num(s.x)),
                    TextAlignment::Right => format!("{}-text_w", fmt_num(s.x)),
                };
                let mut options = vec![
                    format!("text='{}'", escape_drawtext(&s.text)),
                    format!("fontsize={}", fmt_num(s.font_size)),
                    format!("fontcolor={}", s.color),
                    format!("x={}", x),
                    format!("y={}", fmt_num(s.y)),
                ];
                if let Some(box_color) = &s.background_color {
                    options.push("box=1".to_string());
                    options.push(format!("boxcolor={}", box_color));
                    options.push("boxborderw=8".to_string());
                }
                options.push(format!("enable='{}'", between(&s.window)));
                format!("[{}]drawtext={}[{}]", s.input, options.join(":"), s.output)
            }
            Stage::Watermark {
                base,
                input,
                output,
                position,
                opacity,
                width,
            } => {
                let m = WATERMARK_MARGIN;
                let (x, y) = match position {
                    WatermarkPosition::TopLeft => (format!("{m}"), format!("{m}")),
                    WatermarkPosition::TopRight => (format!("W-w-{m}"), format!("{m}")),
                    WatermarkPosition::BottomLeft => (format!("{m}"), format!("H-h-{m}")),
                    WatermarkPosition::BottomRight => (format!("W-w-{m}"), format!("H-h-{m}")),
                };
                format!(
                    "[{}]scale={}:-2,format=rgba,colorchannelmixer=aa={}[wm];[{}][wm]overlay={}:{}[{}]",
                    input,
                    width,
                    fmt_num(*opacity),
                    base,
                    x,
                    y,
                    output
                )
            }
            Stage::Resize {
                input,
                output,
                resolution,
            } => format!(
                "[{}]scale={}:{}[{}]",
                input, resolution.width, resolution.height, output
            ),
            Stage::AudioDelay(s) => {
                let mut chain = vec![format!("volume={}", fmt_num(s.volume))];
                if let Some(fade) = s.fade_in {
                    chain.push(format!("afade=t=in:st=0:d={}", fmt_num(fade)));
                }
                if let Some((start, length)) = s.fade_out {
                    chain.push(format!(
                        "afade=t=out:st={}:d={}",
                        fmt_num(start),
                        fmt_num(length)
                    ));
                }
                chain.push(format!("adelay={}|{}", s.delay_ms, s.delay_ms));
                format!("[{}]{}[{}]", s.input, chain.join(","), s.output)
            }
            Stage::AudioMix { inputs, output } => {
                let pads: String = inputs.iter().map(|i| format!("[{}]", i)).collect();
                format!(
                    "{}amix=inputs={}:duration=longest[{}]",
                    pads,
                    inputs.len(),
                    output
                )
            }
            Stage::AudioPassthrough { input, output } => format!("[{}]acopy[{}]", input, output),
        }
    }
}

/// Ordered composition plan for one render.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionPlan {
    pub resolution: Resolution,
    pub fps: u32,
    /// Output length in seconds
    pub duration: f64,
    pub inputs: Vec<PlanInput>,
    pub stages: Vec<Stage>,
    pub video_output: String,
    pub audio_output: Option<String>,
}

impl CompositionPlan {
    /// The `-filter_complex` argument.
    pub fn filter_complex(&self) -> String {
        self.stages
            .iter()
            .map(Stage::to_filter)
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn has_audio(&self) -> bool {
        self.audio_output.is_some()
    }

    pub fn stages_of(&self, kind: StageKind) -> impl Iterator<Item = &Stage> + '_ {
        self.stages.iter().filter(move |s| s.kind() == kind)
    }

    /// Index of the first stage belonging to `layer_id` with the given kind.
    pub fn position_of(&self, kind: StageKind, layer_id: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.kind() == kind && s.layer_id() == Some(layer_id))
    }
}

/// Compile a timeline snapshot and output settings into a composition plan.
pub fn compile(timeline: &Timeline, settings: &RenderSettings) -> CompositionPlan {
    Compiler::new(timeline, settings).run()
}

struct Compiler<'a> {
    timeline: &'a Timeline,
    settings: &'a RenderSettings,
    duration: f64,
    authored: Resolution,
    inputs: Vec<PlanInput>,
    stages: Vec<Stage>,
}

/// Visual fields shared by video and image layers.
struct VisualSource<'a> {
    kind: InputKind,
    src: Option<&'a str>,
    trim_start: f64,
    trim_end: Option<f64>,
    position: Position,
    scale: f64,
    rotation: f64,
    filters: Option<&'a VisualFilters>,
}

impl<'a> Compiler<'a> {
    fn new(timeline: &'a Timeline, settings: &'a RenderSettings) -> Self {
        let duration = if timeline.duration.is_finite() {
            timeline.duration.max(0.0)
        } else {
            0.0
        };
        Self {
            timeline,
            settings,
            duration,
            authored: timeline.authored_resolution(),
            inputs: Vec::new(),
            stages: Vec::new(),
        }
    }

    fn run(mut self) -> CompositionPlan {
        let mut visual: Vec<&Layer> = Vec::new();
        let mut text: Vec<&Layer> = Vec::new();
        let mut audio: Vec<&Layer> = Vec::new();
        let timeline = self.timeline;
        for layer in timeline.layers.iter().filter(|l| l.common().visible) {
            match layer {
                Layer::Video(_) | Layer::Image(_) => visual.push(layer),
                Layer::Text(_) => text.push(layer),
                Layer::Audio(_) => audio.push(layer),
            }
        }
        for group in [&mut visual, &mut text, &mut audio] {
            group.sort_by(|a, b| a.paint_key().cmp(&b.paint_key()));
        }

        self.stages.push(Stage::Background {
            output: BACKGROUND_LABEL.to_string(),
            color: BACKGROUND_COLOR.to_string(),
            resolution: self.settings.resolution,
            fps: self.settings.fps,
            window: TimeWindow::new(0.0, self.duration),
        });

        let mut canvas = BACKGROUND_LABEL.to_string();
        let mut composed = 0usize;

        for layer in visual {
            if let Some(label) = self.visual_layer(layer, &canvas, composed) {
                canvas = label;
                composed += 1;
            }
        }

        if self.settings.include_captions {
            for layer in text {
                if let Some(label) = self.text_layer(layer, &canvas, composed) {
                    canvas = label;
                    composed += 1;
                }
            }
        }

        if let Some(label) = self.watermark(&canvas, composed) {
            canvas = label;
        }

        self.stages.push(Stage::Resize {
            input: canvas,
            output: VIDEO_OUTPUT_LABEL.to_string(),
            resolution: self.settings.resolution,
        });

        let mut tracks = Vec::new();
        for layer in audio {
            if let Some(label) = self.audio_layer(layer, tracks.len()) {
                tracks.push(label);
            }
        }
        if let Some(label) = self.background_music(tracks.len()) {
            tracks.push(label);
        }

        let audio_output = match tracks.len() {
            0 => None,
            1 => {
                self.stages.push(Stage::AudioPassthrough {
                    input: tracks.remove(0),
                    output: AUDIO_OUTPUT_LABEL.to_string(),
                });
                Some(AUDIO_OUTPUT_LABEL.to_string())
            }
            _ => {
                self.stages.push(Stage::AudioMix {
                    inputs: tracks,
                    output: AUDIO_OUTPUT_LABEL.to_string(),
                });
                Some(AUDIO_OUTPUT_LABEL.to_string())
            }
        };

        CompositionPlan {
            resolution: self.settings.resolution,
            fps: self.settings.fps,
            duration: self.duration,
            inputs: self.inputs,
            stages: self.stages,
            video_output: VIDEO_OUTPUT_LABEL.to_string(),
            audio_output,
        }
    }

    fn add_input(
        &mut self,
        kind: InputKind,
        source: &str,
        layer_id: Option<&str>,
        seek: Option<f64>,
        duration: Option<f64>,
    ) -> PlanInput {
        let input = PlanInput {
            index: self.inputs.len(),
            kind,
            source: source.to_string(),
            layer_id: layer_id.map(str::to_string),
            seek: seek.filter(|s| *s > 0.0),
            duration,
        };
        self.inputs.push(input.clone());
        input
    }

    fn width_ratio(&self) -> f64 {
        self.settings.resolution.width as f64 / self.authored.width as f64
    }

    fn height_ratio(&self) -> f64 {
        self.settings.resolution.height as f64 / self.authored.height as f64
    }

    fn visual_layer(&mut self, layer: &Layer, canvas: &str, n: usize) -> Option<String> {
        let source = match layer {
            Layer::Video(v) => VisualSource {
                kind: InputKind::Video,
                src: v.src.as_deref(),
                trim_start: v.trim_start,
                trim_end: v.trim_end,
                position: v.position,
                scale: v.scale,
                rotation: v.rotation,
                filters: v.filters.as_ref(),
            },
            Layer::Image(i) => VisualSource {
                kind: InputKind::Image,
                src: i.src.as_deref(),
                trim_start: 0.0,
                trim_end: None,
                position: i.position,
                scale: i.scale,
                rotation: i.rotation,
                filters: i.filters.as_ref(),
            },
            Layer::Text(_) | Layer::Audio(_) => return None,
        };

        let src = source.src.filter(|s| !s.trim().is_empty())?;
        let common = layer.common();
        let window = self.timeline.clamped_window(layer);
        if window.is_empty() {
            return None;
        }

        let (seek, length) = match source.kind {
            InputKind::Video => {
                source_span(common.start_time, window, source.trim_start, source.trim_end)?
            }
            _ => (0.0, window.duration()),
        };
        let input = self.add_input(source.kind, src, Some(&common.id), Some(seek), Some(length));

        let scale = if source.scale.is_finite() && source.scale > 0.0 {
            source.scale
        } else {
            1.0
        };
        let opacity = common.opacity.clamp(0.0, 1.0);
        let fade_in = self
            .timeline
            .transitions_into(&common.id)
            .find(|t| t.transition_type == TransitionType::Fade && t.duration > 0.0)
            .map(|t| t.duration.min(length));

        let prepared = format!("v{}", n);
        self.stages.push(Stage::Scale(ScaleStage {
            input: input.video_pad(),
            output: prepared.clone(),
            layer_id: common.id.clone(),
            width: even(self.settings.resolution.width as f64 * scale),
            height: even(self.settings.resolution.height as f64 * scale),
            start: window.start,
            adjust: source
                .filters
                .filter(|f| f.brightness.is_some() || f.contrast.is_some() || f.saturation.is_some())
                .copied(),
            rotation: Some(source.rotation).filter(|r| r.is_finite() && *r % 360.0 != 0.0),
            opacity: Some(opacity).filter(|o| *o < 1.0),
            fade_in,
        }));

        let output = format!("c{}", n);
        self.stages.push(Stage::Overlay {
            base: canvas.to_string(),
            layer: prepared,
            output: output.clone(),
            layer_id: common.id.clone(),
            x: source.position.x * self.width_ratio(),
            y: source.position.y * self.height_ratio(),
            window,
        });
        Some(output)
    }

    fn text_layer(&mut self, layer: &Layer, canvas: &str, n: usize) -> Option<String> {
        let Layer::Text(text) = layer else {
            return None;
        };
        let window = self.timeline.clamped_window(layer);
        if window.is_empty() || text.content.is_empty() {
            return None;
        }

        let output = format!("c{}", n);
        self.stages.push(Stage::DrawText(DrawTextStage {
            input: canvas.to_string(),
            output: output.clone(),
            layer_id: text.common.id.clone(),
            text: text.content.clone(),
            font_size: text.font_size.max(1.0) * self.width_ratio(),
            color: text.color.clone(),
            background_color: text.background_color.clone(),
            x: text.position.x * self.width_ratio(),
            y: text.position.y * self.height_ratio(),
            alignment: text.alignment,
            window,
        }));
        Some(output)
    }

    fn watermark(&mut self, canvas: &str, n: usize) -> Option<String> {
        let settings = self.settings;
        let watermark = settings.watermark.as_ref()?;
        if watermark.url.trim().is_empty() {
            return None;
        }
        let input = self.add_input(
            InputKind::Watermark,
            &watermark.url,
            None,
            None,
            Some(self.duration),
        );
        let output = format!("c{}", n);
        self.stages.push(Stage::Watermark {
            base: canvas.to_string(),
            input: input.video_pad(),
            output: output.clone(),
            position: watermark.position,
            opacity: watermark.opacity.clamp(0.0, 1.0),
            width: even(settings.resolution.width as f64 * WATERMARK_WIDTH_RATIO),
        });
        Some(output)
    }

    fn audio_layer(&mut self, layer: &Layer, n: usize) -> Option<String> {
        let Layer::Audio(audio) = layer else {
            return None;
        };
        let src = audio.src.as_deref().filter(|s| !s.trim().is_empty())?;
        let window = self.timeline.clamped_window(layer);
        if window.is_empty() {
            return None;
        }
        let (seek, length) =
            source_span(audio.common.start_time, window, audio.trim_start, audio.trim_end)?;
        let input = self.add_input(
            InputKind::Audio,
            src,
            Some(&audio.common.id),
            Some(seek),
            Some(length),
        );

        let output = format!("a{}", n);
        self.stages.push(Stage::AudioDelay(AudioDelayStage {
            input: input.audio_pad(),
            output: output.clone(),
            layer_id: Some(audio.common.id.clone()),
            volume: audio.volume.clamp(0.0, 1.0),
            delay_ms: (window.start * 1000.0).round() as u64,
            fade_in: fade_length(audio.fade_in, length),
            fade_out: fade_length(audio.fade_out, length).map(|f| (length - f, f)),
        }));
        Some(output)
    }

    fn background_music(&mut self, n: usize) -> Option<String> {
        let music = self.timeline.background_music.as_ref()?;
        let src = music.src.as_deref().filter(|s| !s.trim().is_empty())?;
        if self.duration <= 0.0 {
            return None;
        }
        let length = self.duration;
        let input = self.add_input(InputKind::Audio, src, None, None, Some(length));

        let output = format!("a{}", n);
        self.stages.push(Stage::AudioDelay(AudioDelayStage {
            input: input.audio_pad(),
            output: output.clone(),
            layer_id: None,
            volume: music.volume.clamp(0.0, 1.0),
            delay_ms: 0,
            fade_in: fade_length(music.fade_in, length),
            fade_out: fade_length(music.fade_out, length).map(|f| (length - f, f)),
        }));
        Some(output)
    }
}

/// Source seek and length for a trimmed layer clamped to `window`.
///
/// When the layer starts before the timeline origin the skipped part is
/// added to the seek. Returns None when nothing of the source remains.
fn source_span(
    start_time: f64,
    window: TimeWindow,
    trim_start: f64,
    trim_end: Option<f64>,
) -> Option<(f64, f64)> {
    let trim_start = if trim_start.is_finite() { trim_start.max(0.0) } else { 0.0 };
    let seek = trim_start + (window.start - start_time).max(0.0);
    let mut length = window.duration();
    if let Some(end) = trim_end.filter(|e| e.is_finite()) {
        length = length.min(end - seek);
    }
    (length > 0.0).then_some((seek, length))
}

fn fade_length(fade: Option<f64>, length: f64) -> Option<f64> {
    fade.filter(|f| f.is_finite() && *f > 0.0).map(|f| f.min(length))
}

fn between(window: &TimeWindow) -> String {
    format!("between(t,{},{})", fmt_num(window.start), fmt_num(window.end))
}

fn eq_filter(adjust: &VisualFilters) -> String {
    let mut parts = Vec::new();
    if let Some(b) = adjust.brightness {
        parts.push(format!("brightness={}", fmt_num(b)));
    }
    if let Some(c) = adjust.contrast {
        parts.push(format!("contrast={}", fmt_num(c)));
    }
    if let Some(s) = adjust.saturation {
        parts.push(format!("saturation={}", fmt_num(s)));
    }
    format!("eq={}", parts.join(":"))
}

/// Escape text for the drawtext `text` option.
///
/// Backslash first so the escapes added for `:` and `'` are not doubled.
pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Fixed three-decimal formatting with trailing zeros removed.
fn fmt_num(value: f64) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    let s = format!("{:.3}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Nearest even pixel size, at least 2.
fn even(value: f64) -> u32 {
    let n = if value.is_finite() { value.round().max(2.0) as u32 } else { 2 };
    n - n % 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use vedit_models::{
        AudioLayer, BackgroundMusic, ImageLayer, LayerCommon, Transition, VideoLayer,
        Watermark,
    };

    fn settings(width: u32, height: u32) -> RenderSettings {
        let mut settings = RenderSettings::defaults_for(&Timeline::new(Resolution::new(width, height), 1.0));
        settings.fps = 30;
        settings
    }

    fn video(id: &str, start: f64, duration: f64, z: i32) -> Layer {
        Layer::Video(VideoLayer {
            common: LayerCommon::new(id, start, duration, z),
            media_id: None,
            src: Some(format!("https://cdn.example.com/{}.mp4", id)),
            trim_start: 0.0,
            trim_end: None,
            position: Position::default(),
            scale: 1.0,
            rotation: 0.0,
            filters: None,
        })
    }

    fn image(id: &str, src: Option<&str>, z: i32) -> Layer {
        Layer::Image(ImageLayer {
            common: LayerCommon::new(id, 0.0, 3.0, z),
            media_id: None,
            src: src.map(str::to_string),
            position: Position { x: 100.0, y: 50.0 },
            scale: 0.5,
            rotation: 0.0,
            filters: None,
        })
    }

    fn text(id: &str, content: &str, start: f64, duration: f64, z: i32) -> Layer {
        let json = serde_json::json!({
            "type": "text",
            "id": id,
            "startTime": start,
            "duration": duration,
            "zIndex": z,
            "content": content,
            "fontSize": 48,
            "color": "#ffffff",
            "position": {"x": 960, "y": 540}
        });
        serde_json::from_value(json).unwrap()
    }

    fn audio(id: &str, start: f64, volume: f64) -> Layer {
        Layer::Audio(AudioLayer {
            common: LayerCommon::new(id, start, 4.0, 0),
            media_id: None,
            src: Some(format!("https://cdn.example.com/{}.mp3", id)),
            trim_start: 0.0,
            trim_end: None,
            volume,
            fade_in: None,
            fade_out: None,
        })
    }

    #[test]
    fn test_empty_timeline_is_single_background() {
        let timeline = Timeline::new(Resolution::new(1280, 720), 10.0);
        let plan = compile(&timeline, &settings(1280, 720));

        let backgrounds: Vec<_> = plan.stages_of(StageKind::Background).collect();
        assert_eq!(backgrounds.len(), 1);
        assert_eq!(backgrounds[0].window(), Some(TimeWindow::new(0.0, 10.0)));
        assert_eq!(plan.stages_of(StageKind::Overlay).count(), 0);
        assert!(plan.inputs.is_empty());
        assert!(!plan.has_audio());
        assert_eq!(
            plan.filter_complex(),
            "color=c=black:s=1280x720:r=30:d=10[bg];[bg]scale=1280:720[vout]"
        );
    }

    #[test]
    fn test_video_then_caption() {
        let timeline = Timeline::new(Resolution::new(1920, 1080), 10.0)
            .with_layer(text("t1", "Hello", 2.0, 2.0, 1))
            .with_layer(video("v1", 0.0, 5.0, 0));
        let plan = compile(&timeline, &settings(1920, 1080));

        let overlay = plan.position_of(StageKind::Overlay, "v1").unwrap();
        let caption = plan.position_of(StageKind::DrawText, "t1").unwrap();
        assert!(caption > overlay);
        assert_eq!(plan.stages[overlay].window(), Some(TimeWindow::new(0.0, 5.0)));
        assert_eq!(plan.stages[caption].window(), Some(TimeWindow::new(2.0, 4.0)));

        let filter = plan.filter_complex();
        assert!(filter.contains("[bg][v0]overlay=0:0:eof_action=pass:enable='between(t,0,5)'[c0]"));
        assert!(filter.contains("[c0]drawtext=text='Hello':fontsize=48:fontcolor=#ffffff:x=960:y=540:enable='between(t,2,4)'[c1]"));
        assert!(filter.ends_with("[c1]scale=1920:1080[vout]"));
    }

    #[test]
    fn test_captions_disabled() {
        let timeline = Timeline::new(Resolution::new(1920, 1080), 10.0)
            .with_layer(text("t1", "Hello", 2.0, 2.0, 1));
        let mut settings = settings(1920, 1080);
        settings.include_captions = false;

        let plan = compile(&timeline, &settings);
        assert_eq!(plan.stages_of(StageKind::DrawText).count(), 0);
    }

    #[test]
    fn test_audio_mix_and_passthrough() {
        let two = Timeline::new(Resolution::new(1280, 720), 10.0)
            .with_layer(audio("a1", 0.0, 0.5))
            .with_layer(audio("a2", 1.5, 1.0));
        let plan = compile(&two, &settings(1280, 720));
        assert_eq!(plan.stages_of(StageKind::AudioDelay).count(), 2);
        assert_eq!(plan.stages_of(StageKind::AudioMix).count(), 1);
        assert_eq!(plan.stages_of(StageKind::AudioPassthrough).count(), 0);
        let filter = plan.filter_complex();
        assert!(filter.contains("[0:a]volume=0.5,adelay=0|0[a0]"));
        assert!(filter.contains("[1:a]volume=1,adelay=1500|1500[a1]"));
        assert!(filter.contains("[a0][a1]amix=inputs=2:duration=longest[aout]"));

        let one = Timeline::new(Resolution::new(1280, 720), 10.0).with_layer(audio("a1", 0.0, 0.5));
        let plan = compile(&one, &settings(1280, 720));
        assert_eq!(plan.stages_of(StageKind::AudioDelay).count(), 1);
        assert_eq!(plan.stages_of(StageKind::AudioMix).count(), 0);
        assert_eq!(plan.stages_of(StageKind::AudioPassthrough).count(), 1);
        assert!(plan.filter_complex().ends_with("[a0]acopy[aout]"));
    }

    #[test]
    fn test_higher_z_composites_later() {
        let timeline = Timeline::new(Resolution::new(1280, 720), 5.0)
            .with_layer(video("top", 0.0, 5.0, 2))
            .with_layer(video("bottom", 0.0, 5.0, 1));
        let plan = compile(&timeline, &settings(1280, 720));

        let bottom = plan.position_of(StageKind::Overlay, "bottom").unwrap();
        let top = plan.position_of(StageKind::Overlay, "top").unwrap();
        assert!(top > bottom);
        assert_eq!(plan.inputs[0].layer_id.as_deref(), Some("bottom"));
    }

    #[test]
    fn test_equal_z_breaks_ties_by_id() {
        let timeline = Timeline::new(Resolution::new(1280, 720), 5.0)
            .with_layer(video("b", 0.0, 5.0, 0))
            .with_layer(video("a", 0.0, 5.0, 0));
        let plan = compile(&timeline, &settings(1280, 720));
        assert!(plan.position_of(StageKind::Overlay, "a") < plan.position_of(StageKind::Overlay, "b"));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let layers = vec![
            video("v1", 0.0, 5.0, 0),
            image("i1", Some("https://cdn.example.com/logo.png"), 3),
            text("t1", "It's 10:30", 1.0, 3.0, 5),
            audio("a1", 0.5, 0.8),
            audio("a2", 0.0, 0.3),
        ];
        let mut forward = Timeline::new(Resolution::new(1920, 1080), 8.0);
        forward.layers = layers.clone();
        let mut reversed = forward.clone();
        reversed.layers.reverse();

        let settings = settings(1280, 720);
        let first = compile(&forward, &settings);
        let second = compile(&forward, &settings);
        assert_eq!(first, second);
        assert_eq!(first.filter_complex(), second.filter_complex());
        assert_eq!(first.filter_complex(), compile(&reversed, &settings).filter_complex());
    }

    #[test]
    fn test_degenerate_layers_are_skipped() {
        let timeline = Timeline::new(Resolution::new(1280, 720), 5.0)
            .with_layer(video("zero", 1.0, 0.0, 0))
            .with_layer(video("negative", 1.0, -2.0, 1))
            .with_layer(video("late", 9.0, 2.0, 2))
            .with_layer(image("nosrc", None, 3));
        let plan = compile(&timeline, &settings(1280, 720));

        assert_eq!(plan.stages_of(StageKind::Overlay).count(), 0);
        assert!(plan.inputs.is_empty());
        assert_eq!(plan.stages_of(StageKind::Background).count(), 1);
    }

    #[test]
    fn test_layer_clamped_to_timeline() {
        let timeline = Timeline::new(Resolution::new(1280, 720), 5.0).with_layer(video("v1", -1.0, 10.0, 0));
        let plan = compile(&timeline, &settings(1280, 720));

        let overlay = plan.position_of(StageKind::Overlay, "v1").unwrap();
        assert_eq!(plan.stages[overlay].window(), Some(TimeWindow::new(0.0, 5.0)));
        assert_eq!(plan.inputs[0].seek, Some(1.0));
        assert_eq!(plan.inputs[0].duration, Some(5.0));
    }

    #[test]
    fn test_positions_rescaled_to_output() {
        let timeline = Timeline::new(Resolution::new(1920, 1080), 5.0)
            .with_layer(image("i1", Some("https://cdn.example.com/logo.png"), 0))
            .with_layer(text("t1", "Hi", 0.0, 5.0, 1));
        let plan = compile(&timeline, &settings(960, 540));
        let filter = plan.filter_complex();

        assert!(filter.contains("[0:v]scale=480:270,setpts=PTS-STARTPTS+0/TB[v0]"));
        assert!(filter.contains("overlay=50:25:"));
        assert!(filter.contains("fontsize=24:fontcolor=#ffffff:x=480:y=270"));
        assert_eq!(plan.inputs[0].args(), vec!["-loop", "1", "-t", "3"]);
    }

    #[test]
    fn test_drawtext_escaping() {
        assert_eq!(escape_drawtext("a:b"), "a\\:b");
        assert_eq!(escape_drawtext("it's"), "it\\'s");
        assert_eq!(escape_drawtext("c:\\d"), "c\\:\\\\d");
    }

    #[test]
    fn test_opacity_rotation_and_fade() {
        let mut layer = video("v1", 1.0, 4.0, 0);
        if let Layer::Video(v) = &mut layer {
            v.common.opacity = 0.5;
            v.rotation = 90.0;
        }
        let mut timeline = Timeline::new(Resolution::new(1280, 720), 5.0).with_layer(layer);
        timeline.transitions.push(Transition {
            id: "x1".to_string(),
            from_layer_id: "v0".to_string(),
            to_layer_id: "v1".to_string(),
            transition_type: TransitionType::Fade,
            duration: 0.5,
        });

        let plan = compile(&timeline, &settings(1280, 720));
        let filter = plan.filter_complex();
        assert!(filter.contains("format=rgba,rotate=1.571:c=none:ow=rotw(1.571):oh=roth(1.571)"));
        assert!(filter.contains("colorchannelmixer=aa=0.5,setpts=PTS-STARTPTS+1/TB,fade=t=in:st=1:d=0.5:alpha=1"));
    }

    #[test]
    fn test_invisible_layers_excluded() {
        let mut layer = video("v1", 0.0, 5.0, 0);
        layer.common_mut().visible = false;
        let timeline = Timeline::new(Resolution::new(1280, 720), 5.0).with_layer(layer);
        let plan = compile(&timeline, &settings(1280, 720));
        assert_eq!(plan.stages_of(StageKind::Scale).count(), 0);
    }

    #[test]
    fn test_watermark_and_music() {
        let mut timeline = Timeline::new(Resolution::new(1280, 720), 6.0).with_layer(audio("a1", 0.0, 1.0));
        timeline.background_music = Some(BackgroundMusic {
            media_id: None,
            src: Some("https://cdn.example.com/music.mp3".to_string()),
            volume: 0.2,
            fade_in: None,
            fade_out: Some(2.0),
        });
        let mut settings = settings(1280, 720);
        settings.watermark = Some(Watermark {
            url: "https://cdn.example.com/wm.png".to_string(),
            position: WatermarkPosition::BottomRight,
            opacity: 0.8,
        });

        let plan = compile(&timeline, &settings);
        let filter = plan.filter_complex();
        assert!(filter.contains("[0:v]scale=192:-2,format=rgba,colorchannelmixer=aa=0.8[wm];[bg][wm]overlay=W-w-10:H-h-10[c0]"));
        assert!(filter.contains("[c0]scale=1280:720[vout]"));
        assert!(filter.contains("[2:a]volume=0.2,afade=t=out:st=4:d=2,adelay=0|0[a1]"));
        assert_eq!(plan.stages_of(StageKind::AudioMix).count(), 1);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(fmt_num(2.0), "2");
        assert_eq!(fmt_num(0.5), "0.5");
        assert_eq!(fmt_num(1.23456), "1.235");
        assert_eq!(fmt_num(-0.0001), "0");
        assert_eq!(fmt_num(f64::NAN), "0");
        assert_eq!(even(641.0), 640);
        assert_eq!(even(0.2), 2);
    }
}
