//! Seams to the platform media stack: encoder codecs, PCM input, audio capture and the
//! container writer. Implementations live with the host; `crate::testing` has scripted ones.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use camflow_core::Size;

use crate::error::RecordError;

pub const VIDEO_MIME: &str = "video/avc";
pub const AUDIO_MIME: &str = "audio/mp4a-latm";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    Video,
    Audio,
}

/// Output format reported by an encoder once it knows it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub kind: EncoderKind,
    pub mime: String,
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub fps: u32,
    #[serde(default)]
    pub sample_rate: u32,
    pub bitrate: u32,
}

impl TrackFormat {
    pub fn video(size: Size, fps: u32, bitrate: u32) -> Self {
        Self {
            kind: EncoderKind::Video,
            mime: VIDEO_MIME.to_string(),
            size,
            fps,
            sample_rate: 0,
            bitrate,
        }
    }

    pub fn audio(sample_rate: u32, bitrate: u32) -> Self {
        Self {
            kind: EncoderKind::Audio,
            mime: AUDIO_MIME.to_string(),
            size: Size::default(),
            fps: 0,
            sample_rate,
            bitrate,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub pts_us: u64,
    /// Codec-specific data (SPS/PPS, ESDS); carried by the track format, never written.
    pub codec_config: bool,
    pub key_frame: bool,
    pub end_of_stream: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrainStatus {
    /// Nothing ready within the timeout.
    TryAgain,
    FormatChanged(TrackFormat),
    Sample(EncodedSample),
}

/// Output side of a hardware encoder.
pub trait EncoderCodec: Send {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<DrainStatus, RecordError>;

    /// Surface-fed encoders end their input here. PCM-fed encoders end it with an empty
    /// [`PcmInput::queue_pcm`] instead and may leave this a no-op.
    fn signal_end_of_input(&mut self) -> Result<(), RecordError>;

    fn release(&mut self);
}

/// Input side of a PCM-fed encoder. An empty `pcm` marks end of stream.
pub trait PcmInput: Send {
    fn queue_pcm(&mut self, pcm: &[u8], pts_us: u64) -> Result<(), RecordError>;
}

/// Microphone or any other PCM producer. `read` blocks until data is available.
pub trait AudioSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecordError>;
    fn stop(&mut self) {}
}

/// Container writer. Tracks are added before `start`; samples only between `start` and `stop`.
pub trait MuxerWriter: Send {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, RecordError>;
    fn start(&mut self) -> Result<(), RecordError>;
    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecordError>;
    fn stop(&mut self) -> Result<(), RecordError>;
}
