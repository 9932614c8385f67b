//! Uncompressed video path for hosts without a hardware encoder.
//!
//! The bridge thread reads each composed frame back from its shared context and hands the
//! RGBA bytes to [`RawVideoCodec`], which passes them to the muxer unchanged. Paired with
//! [`FramedFileWriter`] this records on any desktop GL.

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, trace};

use camflow_core::Size;
use camflow_runtime_glow::{Gpu, TextureId};

use crate::bridge::{GpuBlitTarget, RecordTarget, RecordTargetFactory};
use crate::codec::{DrainStatus, EncodedSample, EncoderCodec, MuxerWriter, TrackFormat};
use crate::container::FramedFileWriter;
use crate::error::RecordError;
use crate::recorder::{AudioInput, MediaBackend, VideoInput};

pub const RAW_VIDEO_MIME: &str = "video/raw";

/// Frames buffered between the bridge and the drain thread before new ones are dropped.
pub const RAW_QUEUE_DEPTH: usize = 4;

/// Builds the frame queue for one recording: the bridge side and the codec side.
pub fn raw_video_channel(format: &TrackFormat, depth: usize) -> (RawFrameSink, RawVideoCodec) {
    let (tx, rx) = bounded(depth.max(1));
    let format = TrackFormat {
        mime: RAW_VIDEO_MIME.to_string(),
        bitrate: (format.size.rgba_len() as u64 * 8 * u64::from(format.fps.max(1)))
            .min(u64::from(u32::MAX)) as u32,
        ..format.clone()
    };
    (
        RawFrameSink {
            tx,
            size: format.size,
        },
        RawVideoCodec {
            rx,
            format: Some(format),
            end_of_input: false,
            finished: false,
        },
    )
}

/// Producer end, owned by the record target on the bridge thread.
#[derive(Clone, Debug)]
pub struct RawFrameSink {
    tx: Sender<Vec<u8>>,
    size: Size,
}

impl RawFrameSink {
    pub fn size(&self) -> Size {
        self.size
    }

    /// Queues one frame. A full queue drops the frame; a released codec is an error.
    pub fn push(&self, rgba: Vec<u8>) -> Result<(), RecordError> {
        match self.tx.try_send(rgba) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                trace!("raw frame dropped; encoder behind");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(RecordError::Target("raw encoder released".into()))
            }
        }
    }
}

/// Reports its format first, then one key frame per queued buffer. After end of input the
/// queue is drained and a final end-of-stream sample follows.
#[derive(Debug)]
pub struct RawVideoCodec {
    rx: Receiver<Vec<u8>>,
    format: Option<TrackFormat>,
    end_of_input: bool,
    finished: bool,
}

impl RawVideoCodec {
    fn finish(&mut self) -> DrainStatus {
        self.finished = true;
        DrainStatus::Sample(EncodedSample {
            end_of_stream: true,
            ..Default::default()
        })
    }
}

impl EncoderCodec for RawVideoCodec {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<DrainStatus, RecordError> {
        if let Some(format) = self.format.take() {
            return Ok(DrainStatus::FormatChanged(format));
        }
        if self.finished {
            std::thread::sleep(timeout);
            return Ok(DrainStatus::TryAgain);
        }
        if self.end_of_input {
            return Ok(match self.rx.try_recv() {
                Ok(data) => key_frame(data),
                Err(_) => self.finish(),
            });
        }
        match self.rx.recv_timeout(timeout) {
            Ok(data) => Ok(key_frame(data)),
            Err(RecvTimeoutError::Timeout) => Ok(DrainStatus::TryAgain),
            Err(RecvTimeoutError::Disconnected) => {
                debug!("raw frame source gone; ending stream");
                Ok(self.finish())
            }
        }
    }

    fn signal_end_of_input(&mut self) -> Result<(), RecordError> {
        self.end_of_input = true;
        Ok(())
    }

    fn release(&mut self) {
        self.finished = true;
    }
}

fn key_frame(data: Vec<u8>) -> DrainStatus {
    DrainStatus::Sample(EncodedSample {
        data,
        key_frame: true,
        ..Default::default()
    })
}

/// Blits the shared texture into the current surface, reads it back and queues the pixels.
pub struct ReadbackTarget<G: Gpu> {
    blit: GpuBlitTarget<G>,
    size: Size,
    sink: RawFrameSink,
}

impl<G: Gpu + std::fmt::Debug> std::fmt::Debug for ReadbackTarget<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadbackTarget")
            .field("blit", &self.blit)
            .field("size", &self.size)
            .finish()
    }
}

impl<G: Gpu> ReadbackTarget<G> {
    /// The context behind `gpu` must be current on the calling thread, with a default
    /// framebuffer of at least `size`.
    pub fn new(gpu: G, size: Size, sink: RawFrameSink) -> Result<Self, RecordError> {
        Ok(Self {
            blit: GpuBlitTarget::new(gpu, size, Box::new(|| Ok(())))?,
            size,
            sink,
        })
    }
}

impl<G: Gpu> RecordTarget for ReadbackTarget<G> {
    fn draw_texture(&mut self, texture: TextureId) -> Result<(), RecordError> {
        self.blit.draw_texture(texture)?;
        let mut rgba = vec![0u8; self.size.rgba_len()];
        self.blit.gpu().read_pixels(self.size, &mut rgba);
        self.sink.push(rgba)
    }

    fn release(&mut self) {
        self.blit.release();
    }
}

/// Builds the bridge-side factory for one recording from its frame sink.
pub type TargetMaker = Box<dyn FnMut(RawFrameSink) -> Box<dyn RecordTargetFactory> + Send>;

/// [`MediaBackend`] writing uncompressed video into a [`FramedFileWriter`]. Video only.
pub struct RawBackend {
    make_target: TargetMaker,
    depth: usize,
}

impl std::fmt::Debug for RawBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBackend").field("depth", &self.depth).finish()
    }
}

impl RawBackend {
    pub fn new(make_target: TargetMaker) -> Self {
        Self {
            make_target,
            depth: RAW_QUEUE_DEPTH,
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }
}

impl MediaBackend for RawBackend {
    fn muxer_writer(&mut self, path: &Path) -> Result<Box<dyn MuxerWriter>, RecordError> {
        Ok(Box::new(FramedFileWriter::new(path)))
    }

    fn video_encoder(&mut self, format: &TrackFormat) -> Result<VideoInput, RecordError> {
        let (sink, codec) = raw_video_channel(format, self.depth);
        Ok(VideoInput {
            codec: Box::new(codec),
            target: (self.make_target)(sink),
        })
    }

    fn audio_encoder(&mut self, _format: &TrackFormat) -> Result<AudioInput, RecordError> {
        Err(RecordError::Codec(
            "raw backend records video only; disable recording.audio".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::sync::Arc;

    use crossbeam_channel::unbounded;

    use camflow_core::{MonotonicClock, RecordingSettings};
    use camflow_runtime_glow::testing::FakeGpu;
    use camflow_runtime_glow::{ExternalRender, TextureId};

    use super::*;
    use crate::container::read_framed;
    use crate::recorder::{Recorder, RecorderEvent};

    const WAIT: Duration = Duration::from_secs(10);

    fn tex(n: u32) -> TextureId {
        TextureId(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn codec_reports_format_then_frames_then_end_of_stream() {
        let format = TrackFormat::video(Size::new(2, 2), 30, 1);
        let (sink, mut codec) = raw_video_channel(&format, 2);
        let t = Duration::from_millis(1);

        match codec.dequeue_output(t).unwrap() {
            DrainStatus::FormatChanged(f) => {
                assert_eq!(f.mime, RAW_VIDEO_MIME);
                assert_eq!(f.size, Size::new(2, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(codec.dequeue_output(t).unwrap(), DrainStatus::TryAgain);

        sink.push(vec![1; 16]).unwrap();
        sink.push(vec![2; 16]).unwrap();
        sink.push(vec![3; 16]).unwrap();
        codec.signal_end_of_input().unwrap();

        let mut payloads = Vec::new();
        loop {
            match codec.dequeue_output(t).unwrap() {
                DrainStatus::Sample(s) if s.end_of_stream => break,
                DrainStatus::Sample(s) => {
                    assert!(s.key_frame);
                    payloads.push(s.data[0]);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(payloads, vec![1, 2], "third frame dropped by the full queue");

        drop(codec);
        assert!(sink.push(vec![4; 16]).is_err());
    }

    struct FakeReadbackFactory {
        sink: RawFrameSink,
    }

    impl RecordTargetFactory for FakeReadbackFactory {
        fn create(&mut self, size: Size) -> Result<Box<dyn RecordTarget>, RecordError> {
            let gpu = FakeGpu::new();
            gpu.set_read_fill(0xAB);
            Ok(Box::new(ReadbackTarget::new(gpu, size, self.sink.clone())?))
        }
    }

    #[test]
    fn recording_writes_read_back_frames_to_framed_file() {
        let backend = RawBackend::new(Box::new(|sink: RawFrameSink| {
            Box::new(FakeReadbackFactory { sink }) as Box<dyn RecordTargetFactory>
        }));
        let settings = RecordingSettings {
            output_dir: std::env::temp_dir().join(format!("camflow-raw-{}", std::process::id())),
            audio: false,
            drain_timeout_ms: 2,
            ..RecordingSettings::default()
        };
        let (tx, rx) = unbounded();
        let mut recorder = Recorder::spawn(
            Box::new(backend),
            settings,
            Arc::new(MonotonicClock::new()),
            tx,
        )
        .unwrap();

        let size = Size::new(4, 2);
        recorder.prepare(size).unwrap();
        let session = match rx.recv_timeout(WAIT).unwrap() {
            RecorderEvent::Prepared(s) => s,
            other => panic!("unexpected {other:?}"),
        };
        let gate = session.gate.clone();
        let mut bridge = session.into_bridge().unwrap();
        recorder.start_recording().unwrap();
        let deadline = std::time::Instant::now() + WAIT;
        while !gate.is_capturing() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        bridge.on_created();
        bridge.on_prepared(size);
        bridge.draw(tex(3));
        while bridge.renders() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        recorder.stop_recording().unwrap();
        let path = match rx.recv_timeout(WAIT).unwrap() {
            RecorderEvent::Stopped(p) => p,
            other => panic!("unexpected {other:?}"),
        };
        bridge.release();
        recorder.release();

        let (tracks, samples) = read_framed(&path).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].mime, RAW_VIDEO_MIME);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].data, vec![0xAB; size.rgba_len()]);
        assert!(samples[0].key_frame);
        let _ = std::fs::remove_file(path);
    }
}
