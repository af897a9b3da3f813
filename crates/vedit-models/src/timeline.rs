//! Timeline (editor state) snapshot.
//!
//! The timeline is the declarative editing state captured for one render:
//! layers with time windows and paint order, transitions, caption style and
//! optional background music. Field names match the editor's JSON.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Authored resolution assumed when a timeline omits (or zeroes) its own.
pub const FALLBACK_AUTHORED_WIDTH: u32 = 1920;
pub const FALLBACK_AUTHORED_HEIGHT: u32 = 1080;

/// Target aspect ratio of the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:5")]
    Vertical,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Vertical => "4:5",
        }
    }
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(FALLBACK_AUTHORED_WIDTH, FALLBACK_AUTHORED_HEIGHT)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Position in authored pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Closed time interval `[start, end]` in seconds on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// A window with no extent is never active.
    pub fn is_empty(&self) -> bool {
        !(self.end > self.start)
    }

    /// Whether `t` lies inside the window (inclusive on both ends).
    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t <= self.end
    }

    /// Clamp to `[0, limit]`. Non-finite bounds collapse to an empty window.
    pub fn clamp_to(&self, limit: f64) -> Self {
        let limit = if limit.is_finite() { limit.max(0.0) } else { 0.0 };
        if !self.start.is_finite() || !self.end.is_finite() {
            return Self::new(0.0, 0.0);
        }
        let start = self.start.clamp(0.0, limit);
        let end = self.end.clamp(start, limit);
        Self::new(start, end)
    }
}

/// Fields shared by every layer kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LayerCommon {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Seconds from the timeline origin.
    pub start_time: f64,
    /// Seconds.
    pub duration: f64,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    /// 0.0 - 1.0
    #[serde(default = "default_one")]
    pub opacity: f64,
    /// Paint order, ascending = painted first.
    #[serde(default)]
    pub z_index: i32,
}

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

impl LayerCommon {
    pub fn new(id: impl Into<String>, start_time: f64, duration: f64, z_index: i32) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            start_time,
            duration,
            visible: true,
            locked: false,
            opacity: 1.0,
            z_index,
        }
    }

    /// Raw `[startTime, startTime + duration]` window.
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_time, self.start_time + self.duration.max(0.0))
    }
}

/// Optional colour adjustments on visual layers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct VisualFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoLayer {
    #[serde(flatten)]
    pub common: LayerCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Seconds into the source where playback begins.
    #[serde(default)]
    pub trim_start: f64,
    /// Seconds into the source where playback ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_end: Option<f64>,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_one")]
    pub scale: f64,
    /// Degrees.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<VisualFilters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageLayer {
    #[serde(flatten)]
    pub common: LayerCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_one")]
    pub scale: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<VisualFilters>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextAlignment {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextAnimation {
    #[default]
    None,
    Fade,
    Slide,
    Typewriter,
    Zoom,
}

/// Font weight as either a CSS number or keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FontWeight {
    Numeric(u32),
    Named(String),
}

impl Default for FontWeight {
    fn default() -> Self {
        FontWeight::Numeric(400)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextLayer {
    #[serde(flatten)]
    pub common: LayerCommon,
    pub content: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default)]
    pub font_weight: FontWeight,
    #[serde(default = "default_text_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub alignment: TextAlignment,
    #[serde(default)]
    pub animation: TextAnimation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_duration: Option<f64>,
}

fn default_font_family() -> String {
    "Inter".to_string()
}

fn default_font_size() -> f64 {
    48.0
}

fn default_text_color() -> String {
    "#ffffff".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AudioLayer {
    #[serde(flatten)]
    pub common: LayerCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default)]
    pub trim_start: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_end: Option<f64>,
    /// 0.0 - 1.0
    #[serde(default = "default_one")]
    pub volume: f64,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in: Option<f64>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out: Option<f64>,
}

/// A single timeline element. The set of kinds is closed; every consumer
/// matches exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Layer {
    Video(VideoLayer),
    Image(ImageLayer),
    Text(TextLayer),
    Audio(AudioLayer),
}

/// Layer kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Video,
    Image,
    Text,
    Audio,
}

impl Layer {
    pub fn common(&self) -> &LayerCommon {
        match self {
            Layer::Video(l) => &l.common,
            Layer::Image(l) => &l.common,
            Layer::Text(l) => &l.common,
            Layer::Audio(l) => &l.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut LayerCommon {
        match self {
            Layer::Video(l) => &mut l.common,
            Layer::Image(l) => &mut l.common,
            Layer::Text(l) => &mut l.common,
            Layer::Audio(l) => &mut l.common,
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Video(_) => LayerKind::Video,
            Layer::Image(_) => LayerKind::Image,
            Layer::Text(_) => LayerKind::Text,
            Layer::Audio(_) => LayerKind::Audio,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn z_index(&self) -> i32 {
        self.common().z_index
    }

    /// Paint-order key: z-index ascending, ties broken by id.
    pub fn paint_key(&self) -> (i32, &str) {
        (self.z_index(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransitionType {
    Cut,
    Fade,
    Zoom,
    Slide,
    Wipe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: String,
    pub from_layer_id: String,
    pub to_layer_id: String,
    #[serde(rename = "type")]
    pub transition_type: TransitionType,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptionPosition {
    Top,
    Center,
    #[default]
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptionStyle {
    pub font_family: String,
    pub font_size: f64,
    #[serde(default)]
    pub font_weight: FontWeight,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default)]
    pub position: CaptionPosition,
    #[serde(default)]
    pub animation: TextAnimation,
    #[serde(default)]
    pub word_by_word: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundMusic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default = "default_one")]
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct TimelineMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Immutable-per-render snapshot of the editor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub resolution: Resolution,
    /// Total output length in seconds.
    pub duration: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_style: Option<CaptionStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music: Option<BackgroundMusic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TimelineMetadata>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_fps() -> u32 {
    30
}

impl Timeline {
    /// Empty timeline of the given size and length.
    pub fn new(resolution: Resolution, duration: f64) -> Self {
        Self {
            version: default_version(),
            aspect_ratio: AspectRatio::default(),
            resolution,
            duration,
            fps: default_fps(),
            layers: Vec::new(),
            transitions: Vec::new(),
            caption_style: None,
            background_music: None,
            metadata: None,
        }
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Authored resolution with zero dimensions replaced by the fallback.
    pub fn authored_resolution(&self) -> Resolution {
        let width = if self.resolution.width == 0 {
            FALLBACK_AUTHORED_WIDTH
        } else {
            self.resolution.width
        };
        let height = if self.resolution.height == 0 {
            FALLBACK_AUTHORED_HEIGHT
        } else {
            self.resolution.height
        };
        Resolution::new(width, height)
    }

    /// Layer window clamped to the timeline. Empty windows are never active.
    pub fn clamped_window(&self, layer: &Layer) -> TimeWindow {
        layer.common().window().clamp_to(self.duration)
    }

    /// Transitions that lead into the given layer.
    pub fn transitions_into<'a>(&'a self, layer_id: &'a str) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions
            .iter()
            .filter(move |t| t.to_layer_id == layer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_json_uses_type_tag() {
        let json = r##"{
            "type": "text",
            "id": "t1",
            "startTime": 2,
            "duration": 2,
            "zIndex": 1,
            "content": "Hello",
            "fontSize": 32,
            "color": "#ff0000"
        }"##;

        let layer: Layer = serde_json::from_str(json).unwrap();
        assert_eq!(layer.kind(), LayerKind::Text);
        assert_eq!(layer.id(), "t1");
        assert!(layer.common().visible);
        assert_eq!(layer.common().opacity, 1.0);

        let back = serde_json::to_value(&layer).unwrap();
        assert_eq!(back["type"], "text");
        assert_eq!(back["startTime"], 2.0);
    }

    #[test]
    fn test_timeline_deserializes_editor_state() {
        let json = r#"{
            "version": "1.0",
            "aspectRatio": "9:16",
            "resolution": {"width": 1080, "height": 1920},
            "duration": 12.5,
            "fps": 30,
            "layers": [
                {"type": "video", "id": "v1", "startTime": 0, "duration": 5, "zIndex": 0,
                 "src": "https://cdn/a.mp4", "trimStart": 1, "trimEnd": 6,
                 "position": {"x": 0, "y": 0}, "scale": 1, "rotation": 0},
                {"type": "audio", "id": "a1", "startTime": 0, "duration": 12.5, "zIndex": 0,
                 "src": "https://cdn/a.mp3", "volume": 0.4, "fadeIn": 1}
            ],
            "transitions": [
                {"id": "x1", "fromLayerId": "v0", "toLayerId": "v1", "type": "fade", "duration": 0.5}
            ]
        }"#;

        let timeline: Timeline = serde_json::from_str(json).unwrap();
        assert_eq!(timeline.aspect_ratio, AspectRatio::Portrait);
        assert_eq!(timeline.layers.len(), 2);
        assert_eq!(timeline.transitions_into("v1").count(), 1);
        match &timeline.layers[0] {
            Layer::Video(v) => {
                assert_eq!(v.trim_start, 1.0);
                assert_eq!(v.trim_end, Some(6.0));
            }
            other => panic!("unexpected layer {:?}", other.kind()),
        }
    }

    #[test]
    fn test_window_clamping() {
        let w = TimeWindow::new(-2.0, 4.0).clamp_to(3.0);
        assert_eq!(w, TimeWindow::new(0.0, 3.0));

        let past_end = TimeWindow::new(5.0, 8.0).clamp_to(3.0);
        assert!(past_end.is_empty());

        let zero = LayerCommon::new("z", 1.0, 0.0, 0).window();
        assert!(zero.is_empty());

        let negative = LayerCommon::new("n", 1.0, -3.0, 0).window();
        assert!(negative.is_empty());
    }

    #[test]
    fn test_authored_resolution_fallback() {
        let timeline = Timeline::new(Resolution::new(0, 0), 1.0);
        assert_eq!(timeline.authored_resolution(), Resolution::new(1920, 1080));
    }
}
