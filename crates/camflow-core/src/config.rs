//! JSON configuration for hosts.
//!
//! Every field has a default, so `{}` is a valid config file and a missing file is not an error
//! for [`CamflowConfig::load_or_default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::geometry::{ScaleType, Size};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CamflowConfig {
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub watermark: WatermarkSettings,
    #[serde(default)]
    pub recording: RecordingSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Preview resolution preset; the producer must support it exactly.
    #[serde(default)]
    pub video_type: VideoType,

    /// Host window is landscape. Portrait hosts see the sensor rotated, so the data size
    /// reported to the pipeline has width and height exchanged.
    #[serde(default)]
    pub landscape: bool,

    #[serde(default)]
    pub scale_type: ScaleType,

    #[serde(default = "default_fps")]
    pub fps: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoType {
    #[serde(rename = "480p")]
    P480,
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl VideoType {
    pub fn size(&self) -> Size {
        match self {
            VideoType::P480 => Size::new(640, 480),
            VideoType::P720 => Size::new(1280, 720),
            VideoType::P1080 => Size::new(1920, 1080),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Glyph cell size in pixels; the `km/h` suffix cell is twice as wide.
    #[serde(default = "default_glyph_width")]
    pub glyph_width: u32,

    #[serde(default = "default_glyph_height")]
    pub glyph_height: u32,

    /// Horizontal advance between glyphs.
    #[serde(default = "default_cadence")]
    pub cadence: u32,

    #[serde(default = "default_margin")]
    pub margin: u32,

    /// Bounds for the synthetic readout, as `[min, max)`.
    #[serde(default = "default_readout_range")]
    pub readout_range: [f32; 2],

    /// Readout hold interval bounds in milliseconds, as `[min, max)`.
    #[serde(default = "default_hold_ms")]
    pub hold_ms: [u64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// Record an audio track next to video (two muxer tracks instead of one).
    #[serde(default = "default_true")]
    pub audio: bool,

    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_bpp")]
    pub bits_per_pixel: f32,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u32,

    /// Per-dequeue wait while draining encoder output.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Edge length of the square thumbnail written next to each capture.
    #[serde(default = "default_thumbnail")]
    pub thumbnail: u32,
}

fn default_true() -> bool {
    true
}
fn default_fps() -> u32 {
    25
}
fn default_glyph_width() -> u32 {
    100
}
fn default_glyph_height() -> u32 {
    150
}
fn default_cadence() -> u32 {
    18
}
fn default_margin() -> u32 {
    10
}
fn default_readout_range() -> [f32; 2] {
    [80.0, 120.0]
}
fn default_hold_ms() -> [u64; 2] {
    [1_000, 3_000]
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("captures")
}
fn default_prefix() -> String {
    "camflow".to_string()
}
fn default_bpp() -> f32 {
    0.25
}
fn default_sample_rate() -> u32 {
    44_100
}
fn default_audio_bitrate() -> u32 {
    64_000
}
fn default_drain_timeout_ms() -> u64 {
    10
}
fn default_thumbnail() -> u32 {
    160
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            video_type: VideoType::default(),
            landscape: false,
            scale_type: ScaleType::default(),
            fps: default_fps(),
        }
    }
}

impl CameraSettings {
    pub fn requested_size(&self) -> Size {
        self.video_type.size()
    }

    /// Size the pipeline renders at for a given producer preview size.
    pub fn data_size(&self, preview: Size) -> Size {
        if self.landscape {
            preview
        } else {
            preview.swapped()
        }
    }
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            glyph_width: default_glyph_width(),
            glyph_height: default_glyph_height(),
            cadence: default_cadence(),
            margin: default_margin(),
            readout_range: default_readout_range(),
            hold_ms: default_hold_ms(),
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_prefix(),
            audio: true,
            fps: default_fps(),
            bits_per_pixel: default_bpp(),
            sample_rate: default_sample_rate(),
            audio_bitrate: default_audio_bitrate(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl RecordingSettings {
    /// Number of tracks the muxer must see before it starts.
    pub fn expected_tracks(&self) -> usize {
        if self.audio {
            2
        } else {
            1
        }
    }

    /// Target video bitrate for a frame size.
    pub fn video_bitrate(&self, size: Size) -> u32 {
        (self.bits_per_pixel * self.fps as f32 * size.width as f32 * size.height as f32) as u32
    }

    /// `<output_dir>/<prefix>_<unix seconds>.mp4`
    pub fn output_path(&self, unix_secs: u64) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.mp4", self.file_prefix, unix_secs))
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            thumbnail: default_thumbnail(),
        }
    }
}

impl CamflowConfig {
    pub fn from_json_str(text: &str, origin: &Path) -> Result<Self, EngineError> {
        let cfg: CamflowConfig = serde_json::from_str(text).map_err(|source| EngineError::Json {
            path: origin.to_path_buf(),
            source,
        })?;
        cfg.validate(origin)?;
        Ok(cfg)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text, path)
    }

    /// Defaults when `path` does not exist; parse and validation errors still surface.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::from_json_path(path)
    }

    fn validate(&self, origin: &Path) -> Result<(), EngineError> {
        let invalid = |msg: &str| EngineError::InvalidConfig {
            path: origin.to_path_buf(),
            msg: msg.to_string(),
        };

        if self.camera.fps == 0 || self.recording.fps == 0 {
            return Err(invalid("fps must be > 0"));
        }
        let w = &self.watermark;
        if w.glyph_width == 0 || w.glyph_height == 0 {
            return Err(invalid("watermark glyph size must be > 0"));
        }
        if w.readout_range[0] >= w.readout_range[1] {
            return Err(invalid("watermark readout_range must be [min, max) with min < max"));
        }
        if w.hold_ms[0] >= w.hold_ms[1] {
            return Err(invalid("watermark hold_ms must be [min, max) with min < max"));
        }
        if self.recording.file_prefix.trim().is_empty() {
            return Err(invalid("recording file_prefix is empty"));
        }
        if self.recording.sample_rate == 0 {
            return Err(invalid("recording sample_rate must be > 0"));
        }
        Ok(())
    }
}
