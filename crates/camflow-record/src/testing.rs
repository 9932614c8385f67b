//! Scripted media stack for tests: codecs that replay queued outputs, an in-memory container
//! writer, a silent audio source, record targets that report over channels, and a
//! [`MediaBackend`] wiring them together.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use camflow_core::Size;
use camflow_runtime_glow::TextureId;

use crate::bridge::{RecordTarget, RecordTargetFactory};
use crate::codec::{
    AudioSource, DrainStatus, EncodedSample, EncoderCodec, MuxerWriter, PcmInput, TrackFormat,
};
use crate::encoder::FrameGate;
use crate::error::RecordError;
use crate::recorder::{AudioInput, MediaBackend, VideoInput};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ScriptState {
    outputs: VecDeque<DrainStatus>,
    released: bool,
    end_of_input: bool,
}

/// Shared view of a [`ScriptedCodec`]'s queue.
#[derive(Clone, Debug, Default)]
pub struct Script {
    inner: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub fn push(&self, status: DrainStatus) {
        lock(&self.inner).outputs.push_back(status);
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner).outputs.len()
    }

    pub fn released(&self) -> bool {
        lock(&self.inner).released
    }

    pub fn end_of_input_signalled(&self) -> bool {
        lock(&self.inner).end_of_input
    }

    fn push_end_of_stream(&self) {
        let mut s = lock(&self.inner);
        s.end_of_input = true;
        s.outputs.push_back(DrainStatus::Sample(EncodedSample {
            end_of_stream: true,
            ..Default::default()
        }));
    }
}

/// Replays queued outputs; reports `TryAgain` after `timeout` when the queue is empty.
/// End of input queues a final end-of-stream sample.
#[derive(Debug, Default)]
pub struct ScriptedCodec {
    script: Script,
}

impl ScriptedCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Script) -> Self {
        Self { script }
    }

    pub fn script(&self) -> Script {
        self.script.clone()
    }
}

impl EncoderCodec for ScriptedCodec {
    fn dequeue_output(&mut self, timeout: Duration) -> Result<DrainStatus, RecordError> {
        if let Some(next) = lock(&self.script.inner).outputs.pop_front() {
            return Ok(next);
        }
        thread::sleep(timeout);
        Ok(DrainStatus::TryAgain)
    }

    fn signal_end_of_input(&mut self) -> Result<(), RecordError> {
        self.script.push_end_of_stream();
        Ok(())
    }

    fn release(&mut self) {
        lock(&self.script.inner).released = true;
    }
}

/// Turns each PCM chunk into one encoded sample on the same script.
#[derive(Debug)]
pub struct ScriptedPcm {
    script: Script,
}

impl ScriptedPcm {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

impl PcmInput for ScriptedPcm {
    fn queue_pcm(&mut self, pcm: &[u8], pts_us: u64) -> Result<(), RecordError> {
        if pcm.is_empty() {
            self.script.push_end_of_stream();
            return Ok(());
        }
        self.script.push(DrainStatus::Sample(EncodedSample {
            data: pcm.to_vec(),
            pts_us,
            ..Default::default()
        }));
        Ok(())
    }
}

/// Yields `chunk` zero bytes every `period`.
#[derive(Debug)]
pub struct SilenceSource {
    chunk: usize,
    period: Duration,
}

impl SilenceSource {
    pub fn new(chunk: usize, period: Duration) -> Self {
        Self { chunk, period }
    }
}

impl AudioSource for SilenceSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecordError> {
        thread::sleep(self.period);
        let n = self.chunk.min(buf.len());
        buf[..n].fill(0);
        Ok(n)
    }
}

#[derive(Debug, Default)]
struct WriterState {
    tracks: Vec<TrackFormat>,
    starts: usize,
    stops: usize,
    samples: Vec<(usize, EncodedSample)>,
}

/// Observer for a [`MemoryWriter`].
#[derive(Clone, Debug, Default)]
pub struct WriterLog {
    inner: Arc<Mutex<WriterState>>,
}

impl WriterLog {
    pub fn tracks(&self) -> Vec<TrackFormat> {
        lock(&self.inner).tracks.clone()
    }

    pub fn starts(&self) -> usize {
        lock(&self.inner).starts
    }

    pub fn stops(&self) -> usize {
        lock(&self.inner).stops
    }

    pub fn samples(&self) -> Vec<(usize, EncodedSample)> {
        lock(&self.inner).samples.clone()
    }
}

#[derive(Debug, Default)]
pub struct MemoryWriter {
    log: WriterLog,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> WriterLog {
        self.log.clone()
    }
}

impl MuxerWriter for MemoryWriter {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, RecordError> {
        let mut s = lock(&self.log.inner);
        s.tracks.push(format.clone());
        Ok(s.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), RecordError> {
        lock(&self.log.inner).starts += 1;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecordError> {
        lock(&self.log.inner).samples.push((track, sample.clone()));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RecordError> {
        lock(&self.log.inner).stops += 1;
        Ok(())
    }
}

/// Always accepts frames.
#[derive(Debug, Clone, Copy)]
pub struct OpenGate;

impl FrameGate for OpenGate {
    fn frame_available_soon(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    Created(Size),
    Entered(TextureId),
    Released,
}

/// Record targets whose `draw_texture` reports `Entered` and then parks until the test sends
/// on the resume channel (or drops it).
#[derive(Debug)]
pub struct BlockingTargetFactory {
    events: Sender<TargetEvent>,
    resume: Receiver<()>,
    block: bool,
}

impl BlockingTargetFactory {
    pub fn new() -> (Self, Receiver<TargetEvent>, Sender<()>) {
        let (events, events_rx) = unbounded();
        let (resume_tx, resume) = unbounded();
        (
            Self {
                events,
                resume,
                block: true,
            },
            events_rx,
            resume_tx,
        )
    }

    /// Targets that report but never park.
    pub fn non_blocking() -> (Self, Receiver<TargetEvent>) {
        let (mut f, rx, _resume) = Self::new();
        f.block = false;
        (f, rx)
    }
}

struct BlockingTarget {
    events: Sender<TargetEvent>,
    resume: Receiver<()>,
    block: bool,
}

impl RecordTargetFactory for BlockingTargetFactory {
    fn create(&mut self, size: Size) -> Result<Box<dyn RecordTarget>, RecordError> {
        let _ = self.events.send(TargetEvent::Created(size));
        Ok(Box::new(BlockingTarget {
            events: self.events.clone(),
            resume: self.resume.clone(),
            block: self.block,
        }))
    }
}

impl RecordTarget for BlockingTarget {
    fn draw_texture(&mut self, texture: TextureId) -> Result<(), RecordError> {
        let _ = self.events.send(TargetEvent::Entered(texture));
        if self.block {
            let _ = self.resume.recv();
        }
        Ok(())
    }

    fn release(&mut self) {
        let _ = self.events.send(TargetEvent::Released);
    }
}

/// Handles onto everything a [`FakeBackend`] hands out.
#[derive(Debug, Clone)]
pub struct BackendHandles {
    pub writer: WriterLog,
    pub video: Script,
    pub audio: Script,
    pub targets: Receiver<TargetEvent>,
    pub paths: Arc<Mutex<Vec<PathBuf>>>,
}

/// Scripted codecs start by announcing their format, so the muxer can start as soon as
/// every encoder has been drained once.
#[derive(Debug)]
pub struct FakeBackend {
    handles: BackendHandles,
    target_events: Sender<TargetEvent>,
}

impl FakeBackend {
    pub fn new() -> (Self, BackendHandles) {
        let (target_events, targets) = unbounded();
        let handles = BackendHandles {
            writer: WriterLog::default(),
            video: Script::default(),
            audio: Script::default(),
            targets,
            paths: Arc::default(),
        };
        (
            Self {
                handles: handles.clone(),
                target_events,
            },
            handles,
        )
    }
}

impl MediaBackend for FakeBackend {
    fn muxer_writer(&mut self, path: &Path) -> Result<Box<dyn MuxerWriter>, RecordError> {
        lock(&self.handles.paths).push(path.to_path_buf());
        Ok(Box::new(MemoryWriter {
            log: self.handles.writer.clone(),
        }))
    }

    fn video_encoder(&mut self, format: &TrackFormat) -> Result<VideoInput, RecordError> {
        self.handles
            .video
            .push(DrainStatus::FormatChanged(format.clone()));
        let (_resume_tx, resume) = unbounded();
        Ok(VideoInput {
            codec: Box::new(ScriptedCodec::with_script(self.handles.video.clone())),
            target: Box::new(BlockingTargetFactory {
                events: self.target_events.clone(),
                resume,
                block: false,
            }),
        })
    }

    fn audio_encoder(&mut self, format: &TrackFormat) -> Result<AudioInput, RecordError> {
        self.handles
            .audio
            .push(DrainStatus::FormatChanged(format.clone()));
        Ok(AudioInput {
            codec: Box::new(ScriptedCodec::with_script(self.handles.audio.clone())),
            pcm: Box::new(ScriptedPcm::new(self.handles.audio.clone())),
            source: Box::new(SilenceSource::new(256, Duration::from_millis(2))),
        })
    }
}
