//! Recorder controller: a command thread that owns one recording at a time.
//!
//! `prepare` opens the container and spawns the encoders. Once every encoder reported ready the
//! host receives [`RecorderEvent::Prepared`] with what it needs to attach a [`RecordBridge`] to
//! the pipeline. When every encoder has stopped the host receives the output path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use camflow_core::{Clock, RecordingSettings, Size};

use crate::bridge::{RecordBridge, RecordTargetFactory};
use crate::codec::{AudioSource, EncoderCodec, EncoderKind, MuxerWriter, PcmInput, TrackFormat};
use crate::encoder::{AudioEncoder, EncoderContext, EncoderEvent, EncoderHandle, MediaEncoder};
use crate::error::RecordError;
use crate::muxer::MuxerCoordinator;

/// Surface-fed video encoder plus the factory that binds its input surface on the bridge thread.
pub struct VideoInput {
    pub codec: Box<dyn EncoderCodec>,
    pub target: Box<dyn RecordTargetFactory>,
}

pub struct AudioInput {
    pub codec: Box<dyn EncoderCodec>,
    pub pcm: Box<dyn PcmInput>,
    pub source: Box<dyn AudioSource>,
}

/// Platform media stack.
pub trait MediaBackend: Send {
    fn muxer_writer(&mut self, path: &Path) -> Result<Box<dyn MuxerWriter>, RecordError>;
    fn video_encoder(&mut self, format: &TrackFormat) -> Result<VideoInput, RecordError>;
    fn audio_encoder(&mut self, format: &TrackFormat) -> Result<AudioInput, RecordError>;
}

/// Everything needed to feed the video encoder from the frame loop.
pub struct RecordSession {
    pub size: Size,
    pub output: PathBuf,
    pub target: Box<dyn RecordTargetFactory>,
    pub gate: EncoderHandle,
}

impl std::fmt::Debug for RecordSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSession")
            .field("size", &self.size)
            .field("output", &self.output)
            .field("gate", &self.gate)
            .finish()
    }
}

impl RecordSession {
    /// Spawns the bridge; add it to the pipeline's external sinks.
    pub fn into_bridge(self) -> Result<RecordBridge, RecordError> {
        RecordBridge::spawn(self.target, Arc::new(self.gate))
    }
}

#[derive(Debug)]
pub enum RecorderEvent {
    Prepared(RecordSession),
    Stopped(PathBuf),
    Error(String),
}

#[derive(Debug)]
enum Command {
    Prepare(Size),
    Start,
    Stop,
    Release,
}

pub struct Recorder {
    commands: Sender<Command>,
    released: AtomicBool,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}

impl Recorder {
    pub fn spawn(
        backend: Box<dyn MediaBackend>,
        settings: RecordingSettings,
        clock: Arc<dyn Clock>,
        events: Sender<RecorderEvent>,
    ) -> Result<Self, RecordError> {
        let (commands, command_rx) = unbounded();
        let (encoder_tx, encoder_rx) = unbounded();
        let worker = Worker {
            backend,
            settings,
            clock,
            events,
            encoder_tx,
            session: None,
        };
        let name = "camflow-recorder";
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker.run(command_rx, encoder_rx))
            .map_err(|source| RecordError::Spawn { name, source })?;
        Ok(Self {
            commands,
            released: AtomicBool::new(false),
            thread: Some(thread),
        })
    }

    fn post(&self, cmd: Command) -> Result<(), RecordError> {
        if self.released.load(Ordering::Acquire) {
            warn!(?cmd, "recorder already released");
            return Err(RecordError::Released);
        }
        self.commands.send(cmd).map_err(|_| RecordError::Released)
    }

    /// Opens a recording for frames of `size`. Ignored while one is open.
    pub fn prepare(&self, size: Size) -> Result<(), RecordError> {
        self.post(Command::Prepare(size))
    }

    pub fn start_recording(&self) -> Result<(), RecordError> {
        self.post(Command::Start)
    }

    pub fn stop_recording(&self) -> Result<(), RecordError> {
        self.post(Command::Stop)
    }

    /// Tears down any open recording and joins the command thread. Terminal.
    pub fn release(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(Command::Release);
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                error!("recorder thread panicked");
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.release();
    }
}

struct Session {
    size: Size,
    output: PathBuf,
    muxer: Arc<MuxerCoordinator>,
    video: MediaEncoder,
    audio: Option<AudioEncoder>,
    target: Option<Box<dyn RecordTargetFactory>>,
    prepared: Vec<EncoderKind>,
    stopped: Vec<EncoderKind>,
}

struct Worker {
    backend: Box<dyn MediaBackend>,
    settings: RecordingSettings,
    clock: Arc<dyn Clock>,
    events: Sender<RecorderEvent>,
    encoder_tx: Sender<EncoderEvent>,
    session: Option<Session>,
}

impl Worker {
    fn run(mut self, commands: Receiver<Command>, encoder_events: Receiver<EncoderEvent>) {
        loop {
            select! {
                recv(commands) -> msg => match msg {
                    Ok(Command::Release) | Err(_) => break,
                    Ok(cmd) => self.on_command(cmd),
                },
                recv(encoder_events) -> msg => {
                    if let Ok(ev) = msg {
                        self.on_encoder_event(ev);
                    }
                }
            }
        }
        if self.session.take().is_some() {
            info!("open recording discarded on release");
        }
        debug!("recorder thread exiting");
    }

    fn emit(&self, event: RecorderEvent) {
        if self.events.send(event).is_err() {
            debug!("recorder event dropped; receiver gone");
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Prepare(size) => {
                if self.session.is_some() {
                    debug!("prepare ignored; recording already open");
                    return;
                }
                match self.open(size) {
                    Ok(s) => self.session = Some(s),
                    Err(e) => {
                        error!(error = %e, "recording prepare failed");
                        self.emit(RecorderEvent::Error(e.to_string()));
                    }
                }
            }
            Command::Start => {
                let Some(s) = self.session.as_mut() else {
                    warn!("start ignored; no recording prepared");
                    return;
                };
                if let Some(audio) = s.audio.as_mut() {
                    if let Err(e) = audio.start_recording() {
                        error!(error = %e, "audio capture failed to start");
                        let msg = e.to_string();
                        self.emit(RecorderEvent::Error(msg));
                        return;
                    }
                }
                s.video.start_recording();
                info!(path = %s.output.display(), "recording started");
            }
            Command::Stop => {
                let Some(s) = self.session.as_ref() else {
                    return;
                };
                if let Some(audio) = s.audio.as_ref() {
                    audio.stop_recording();
                }
                s.video.stop_recording();
            }
            Command::Release => {}
        }
    }

    fn open(&mut self, size: Size) -> Result<Session, RecordError> {
        if !size.is_known() {
            return Err(RecordError::Engine(camflow_core::EngineError::Unsupported(
                format!("recording size {size}"),
            )));
        }
        let dir = &self.settings.output_dir;
        std::fs::create_dir_all(dir).map_err(|source| RecordError::Io {
            path: dir.clone(),
            source,
        })?;
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let output = self.settings.output_path(secs);

        let writer = self.backend.muxer_writer(&output)?;
        let muxer = Arc::new(MuxerCoordinator::new(writer, &output));
        let ctx = EncoderContext {
            muxer: Arc::clone(&muxer),
            clock: Arc::clone(&self.clock),
            events: self.encoder_tx.clone(),
            drain_timeout: Duration::from_millis(self.settings.drain_timeout_ms),
        };

        let bitrate = self.settings.video_bitrate(size);
        let video_format = TrackFormat::video(size, self.settings.fps, bitrate);
        let video_input = self.backend.video_encoder(&video_format)?;
        let video = MediaEncoder::spawn(EncoderKind::Video, video_input.codec, &ctx)?;

        let audio = if self.settings.audio {
            let format = TrackFormat::audio(self.settings.sample_rate, self.settings.audio_bitrate);
            let input = self.backend.audio_encoder(&format)?;
            Some(AudioEncoder::spawn(input.codec, input.pcm, input.source, &ctx)?)
        } else {
            None
        };

        info!(path = %output.display(), %size, bitrate, audio = audio.is_some(), "recording prepared");
        Ok(Session {
            size,
            output,
            muxer,
            video,
            audio,
            target: Some(video_input.target),
            prepared: Vec::new(),
            stopped: Vec::new(),
        })
    }

    fn on_encoder_event(&mut self, ev: EncoderEvent) {
        let Some(s) = self.session.as_mut() else {
            debug!(?ev, "encoder event without a recording");
            return;
        };
        let expected = s.muxer.expected_tracks();
        match ev {
            EncoderEvent::Prepared(kind) => {
                if !s.prepared.contains(&kind) {
                    s.prepared.push(kind);
                }
                if s.prepared.len() < expected {
                    return;
                }
                let Some(target) = s.target.take() else {
                    return;
                };
                let session = RecordSession {
                    size: s.size,
                    output: s.output.clone(),
                    target,
                    gate: s.video.handle(),
                };
                self.emit(RecorderEvent::Prepared(session));
            }
            EncoderEvent::Stopped(kind) => {
                if !s.stopped.contains(&kind) {
                    s.stopped.push(kind);
                }
                if s.stopped.len() < expected {
                    return;
                }
                let output = s.output.clone();
                self.session = None;
                info!(path = %output.display(), "recording stopped");
                self.emit(RecorderEvent::Stopped(output));
            }
            EncoderEvent::Failed(kind, msg) => {
                self.emit(RecorderEvent::Error(format!("{kind:?} encoder: {msg}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DrainStatus, EncodedSample};
    use crate::encoder::FrameGate;
    use crate::testing::FakeBackend;
    use camflow_core::MonotonicClock;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(10);

    fn settings(tag: &str, audio: bool) -> RecordingSettings {
        RecordingSettings {
            output_dir: std::env::temp_dir().join(format!("camflow-rec-{tag}-{}", std::process::id())),
            audio,
            drain_timeout_ms: 1,
            ..RecordingSettings::default()
        }
    }

    fn until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn records_video_and_audio_then_reports_path() {
        let (backend, handles) = FakeBackend::new();
        let (tx, rx) = unbounded();
        let settings = settings("av", true);
        let expected_bitrate = settings.video_bitrate(Size::new(64, 48));
        let mut rec = Recorder::spawn(
            Box::new(backend),
            settings,
            Arc::new(MonotonicClock::new()),
            tx,
        )
        .unwrap();

        rec.prepare(Size::new(64, 48)).unwrap();
        let session = match rx.recv_timeout(WAIT).unwrap() {
            RecorderEvent::Prepared(s) => s,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(session.size, Size::new(64, 48));
        let gate = session.gate.clone();

        rec.start_recording().unwrap();
        assert!(until(|| gate.frame_available_soon()));
        handles.video.push(DrainStatus::Sample(EncodedSample {
            data: vec![0xAA],
            key_frame: true,
            ..Default::default()
        }));
        assert!(until(|| {
            gate.frame_available_soon();
            handles.writer.samples().iter().any(|(_, s)| s.data == vec![0xAA])
        }));

        rec.stop_recording().unwrap();
        let path = match rx.recv_timeout(WAIT).unwrap() {
            RecorderEvent::Stopped(p) => p,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(handles.paths.lock().unwrap().as_slice(), &[path.clone()]);
        assert!(path.extension().is_some_and(|e| e == "mp4"));

        assert_eq!(handles.writer.starts(), 1);
        assert_eq!(handles.writer.stops(), 1);
        let tracks = handles.writer.tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks.iter().filter(|t| t.kind == EncoderKind::Video).count(), 1);
        assert!(tracks.iter().any(|t| t.bitrate == expected_bitrate));
        assert!(handles.video.released() && handles.audio.released());

        rec.release();
        assert!(matches!(rec.prepare(Size::new(1, 1)), Err(RecordError::Released)));
    }

    #[test]
    fn video_only_recording_uses_one_track() {
        let (backend, handles) = FakeBackend::new();
        let (tx, rx) = unbounded();
        let rec = Recorder::spawn(
            Box::new(backend),
            settings("v", false),
            Arc::new(MonotonicClock::new()),
            tx,
        )
        .unwrap();

        rec.prepare(Size::new(16, 16)).unwrap();
        let session = match rx.recv_timeout(WAIT).unwrap() {
            RecorderEvent::Prepared(s) => s,
            other => panic!("unexpected {other:?}"),
        };
        rec.start_recording().unwrap();
        assert!(until(|| session.gate.frame_available_soon()));
        assert!(until(|| handles.writer.starts() == 1));
        rec.stop_recording().unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), RecorderEvent::Stopped(_)));
        assert_eq!(handles.writer.tracks().len(), 1);
        assert_eq!(handles.audio.pending(), 0);
    }

    #[test]
    fn unknown_size_is_reported_without_side_effects() {
        let (backend, handles) = FakeBackend::new();
        let (tx, rx) = unbounded();
        let rec = Recorder::spawn(
            Box::new(backend),
            settings("bad", false),
            Arc::new(MonotonicClock::new()),
            tx,
        )
        .unwrap();
        rec.prepare(Size::new(0, 10)).unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), RecorderEvent::Error(_)));
        assert!(handles.paths.lock().unwrap().is_empty());
    }
}
