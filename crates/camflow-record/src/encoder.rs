//! Encoder drain threads.
//!
//! Each encoder owns one thread that sleeps on a monitor until it is asked to drain or stop.
//! `capturing` and `end_of_stream` are atomics written by one side only; `request_stop` and
//! the coalesced drain counter live under the monitor because several threads post to them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use camflow_core::Clock;

use crate::codec::{AudioSource, DrainStatus, EncoderCodec, EncoderKind, PcmInput};
use crate::error::RecordError;
use crate::muxer::MuxerCoordinator;
use crate::pts::PtsCorrector;

/// Consecutive empty polls tolerated before a drain pass yields.
pub const TRY_AGAIN_LIMIT: u32 = 5;
/// Same, once end of stream was signalled and the final sample is still in flight.
pub const EOS_TRY_AGAIN_LIMIT: u32 = 100;

const MUXER_WAIT_SLICE: Duration = Duration::from_millis(100);

/// PCM bytes read per audio chunk.
pub const SAMPLES_PER_FRAME: usize = 1024;
const SILENT_FRAMES: u32 = 5;
const SILENT_FRAME_GAP: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderEvent {
    Prepared(EncoderKind),
    Stopped(EncoderKind),
    Failed(EncoderKind, String),
}

/// Something the recording bridge asks before publishing a frame to the encoder.
pub trait FrameGate: Send + Sync {
    /// Requests a drain. `false` when the encoder is not accepting frames.
    fn frame_available_soon(&self) -> bool;
}

pub type SharedPcm = Arc<Mutex<Box<dyn PcmInput>>>;

/// Dependencies every encoder of one recording shares.
#[derive(Clone)]
pub struct EncoderContext {
    pub muxer: Arc<MuxerCoordinator>,
    pub clock: Arc<dyn Clock>,
    pub events: Sender<EncoderEvent>,
    pub drain_timeout: Duration,
}

impl std::fmt::Debug for EncoderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderContext")
            .field("muxer", &self.muxer)
            .field("clock", &self.clock)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Requests {
    request_stop: bool,
    pending_drain: u32,
    exited: bool,
}

#[derive(Debug)]
struct Shared {
    kind: EncoderKind,
    capturing: AtomicBool,
    end_of_stream: AtomicBool,
    requests: Mutex<Requests>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Requests> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable control handle for one encoder.
#[derive(Clone, Debug)]
pub struct EncoderHandle {
    shared: Arc<Shared>,
}

impl EncoderHandle {
    pub fn kind(&self) -> EncoderKind {
        self.shared.kind
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::Acquire)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.lock().request_stop
    }

    pub fn end_of_stream(&self) -> bool {
        self.shared.end_of_stream.load(Ordering::Acquire)
    }

    pub fn start_recording(&self) {
        let mut r = self.shared.lock();
        if r.exited {
            return;
        }
        self.shared.capturing.store(true, Ordering::Release);
        r.request_stop = false;
        self.shared.cv.notify_all();
    }

    /// Ignored unless capturing and not already stopping.
    pub fn stop_recording(&self) {
        let mut r = self.shared.lock();
        if !self.is_capturing() || r.request_stop {
            return;
        }
        r.request_stop = true;
        self.shared.cv.notify_all();
    }

    /// Stops the thread whether or not it ever captured.
    fn shutdown(&self) {
        let mut r = self.shared.lock();
        r.request_stop = true;
        self.shared.cv.notify_all();
    }
}

impl FrameGate for EncoderHandle {
    fn frame_available_soon(&self) -> bool {
        let mut r = self.shared.lock();
        if !self.is_capturing() || r.request_stop {
            return false;
        }
        r.pending_drain = r.pending_drain.saturating_add(1);
        self.shared.cv.notify_all();
        true
    }
}

enum EndOfInput {
    Codec,
    Pcm(SharedPcm),
}

struct Drainer {
    shared: Arc<Shared>,
    codec: Box<dyn EncoderCodec>,
    end_of_input: EndOfInput,
    ctx: EncoderContext,
    track: Option<usize>,
    muxer_started: bool,
    pts: PtsCorrector,
}

impl Drainer {
    fn run(mut self) {
        let kind = self.shared.kind;
        let result = self.run_loop();
        if let Err(e) = &result {
            error!(?kind, error = %e, "encoder halted");
            self.shared.capturing.store(false, Ordering::Release);
            let _ = self.ctx.events.send(EncoderEvent::Failed(kind, e.to_string()));
            if !self.muxer_started {
                self.ctx.muxer.abandon(kind);
            }
        }
        self.release();

        let mut r = self.shared.lock();
        r.request_stop = true;
        r.exited = true;
        self.shared.capturing.store(false, Ordering::Release);
        self.shared.cv.notify_all();
    }

    fn run_loop(&mut self) -> Result<(), RecordError> {
        loop {
            let (stop, drain) = {
                let guard = self.shared.lock();
                let mut r = self
                    .shared
                    .cv
                    .wait_while(guard, |r| !r.request_stop && r.pending_drain == 0)
                    .unwrap_or_else(PoisonError::into_inner);
                let drain = r.pending_drain > 0;
                r.pending_drain = 0;
                (r.request_stop, drain)
            };

            if stop {
                self.drain()?;
                self.signal_end_of_input()?;
                self.drain()?;
                return Ok(());
            }
            if drain {
                self.drain()?;
            }
        }
    }

    /// Blocks until every peer has started the muxer. Gives up once the muxer is finalized
    /// or abandoned, or this encoder is told to stop.
    fn wait_for_muxer(&self) {
        let kind = self.shared.kind;
        while !self.ctx.muxer.wait_started(MUXER_WAIT_SLICE) {
            if self.ctx.muxer.is_finalized() {
                warn!(?kind, "muxer finalized before start");
                return;
            }
            if self.shared.lock().request_stop || !self.shared.capturing.load(Ordering::Acquire) {
                debug!(?kind, "stopped while waiting for the muxer");
                return;
            }
        }
    }

    fn signal_end_of_input(&mut self) -> Result<(), RecordError> {
        match &self.end_of_input {
            EndOfInput::Codec => self.codec.signal_end_of_input()?,
            EndOfInput::Pcm(pcm) => {
                if self.shared.capturing.load(Ordering::Acquire) {
                    let pts = self.ctx.clock.now_us();
                    pcm.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .queue_pcm(&[], pts)?;
                }
            }
        }
        self.shared.end_of_stream.store(true, Ordering::Release);
        debug!(kind = ?self.shared.kind, "end of input signalled");
        Ok(())
    }

    fn drain(&mut self) -> Result<(), RecordError> {
        let mut idle = 0u32;
        while self.shared.capturing.load(Ordering::Acquire) {
            match self.codec.dequeue_output(self.ctx.drain_timeout)? {
                DrainStatus::TryAgain => {
                    idle += 1;
                    let limit = if self.shared.end_of_stream.load(Ordering::Acquire) {
                        EOS_TRY_AGAIN_LIMIT
                    } else {
                        TRY_AGAIN_LIMIT
                    };
                    if idle > limit {
                        break;
                    }
                }
                DrainStatus::FormatChanged(format) => {
                    if self.muxer_started {
                        return Err(RecordError::FormatChangedTwice);
                    }
                    self.track = Some(self.ctx.muxer.add_track(&format)?);
                    self.muxer_started = true;
                    if !self.ctx.muxer.start()? {
                        self.wait_for_muxer();
                    }
                }
                DrainStatus::Sample(mut sample) => {
                    if sample.codec_config {
                        sample.data.clear();
                    }
                    if !sample.data.is_empty() {
                        idle = 0;
                        let track = match self.track {
                            Some(t) if self.muxer_started => t,
                            _ => return Err(RecordError::MuxerNotStarted),
                        };
                        sample.pts_us = self.pts.next(self.ctx.clock.now_us());
                        self.ctx.muxer.write_sample(track, &sample)?;
                    }
                    if sample.end_of_stream {
                        self.shared.capturing.store(false, Ordering::Release);
                    }
                }
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        let kind = self.shared.kind;
        self.shared.capturing.store(false, Ordering::Release);
        self.codec.release();
        if self.muxer_started {
            self.muxer_started = false;
            if let Err(e) = self.ctx.muxer.stop() {
                error!(?kind, error = %e, "muxer stop failed");
            }
        }
        info!(?kind, last_pts_us = self.pts.last(), "encoder stopped");
        let _ = self.ctx.events.send(EncoderEvent::Stopped(kind));
    }
}

/// An encoder and its drain thread. Dropping it stops and joins the thread.
#[derive(Debug)]
pub struct MediaEncoder {
    handle: EncoderHandle,
    thread: Option<JoinHandle<()>>,
}

impl MediaEncoder {
    /// Registers with the muxer, starts the drain thread and reports `Prepared`.
    /// Surface-fed encoders end their input through the codec.
    pub fn spawn(
        kind: EncoderKind,
        codec: Box<dyn EncoderCodec>,
        ctx: &EncoderContext,
    ) -> Result<Self, RecordError> {
        Self::spawn_inner(kind, codec, EndOfInput::Codec, ctx)
    }

    fn spawn_inner(
        kind: EncoderKind,
        codec: Box<dyn EncoderCodec>,
        end_of_input: EndOfInput,
        ctx: &EncoderContext,
    ) -> Result<Self, RecordError> {
        ctx.muxer.register_encoder(kind)?;

        let shared = Arc::new(Shared {
            kind,
            capturing: AtomicBool::new(false),
            end_of_stream: AtomicBool::new(false),
            requests: Mutex::new(Requests::default()),
            cv: Condvar::new(),
        });
        let drainer = Drainer {
            shared: Arc::clone(&shared),
            codec,
            end_of_input,
            ctx: ctx.clone(),
            track: None,
            muxer_started: false,
            pts: PtsCorrector::new(),
        };
        let name = match kind {
            EncoderKind::Video => "camflow-video-encoder",
            EncoderKind::Audio => "camflow-audio-encoder",
        };
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || drainer.run())
            .map_err(|source| RecordError::Spawn { name, source })?;

        debug!(?kind, "encoder prepared");
        let _ = ctx.events.send(EncoderEvent::Prepared(kind));
        Ok(Self {
            handle: EncoderHandle { shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> EncoderHandle {
        self.handle.clone()
    }

    pub fn kind(&self) -> EncoderKind {
        self.handle.kind()
    }

    pub fn start_recording(&self) {
        self.handle.start_recording();
    }

    pub fn stop_recording(&self) {
        self.handle.stop_recording();
    }

    pub fn frame_available_soon(&self) -> bool {
        self.handle.frame_available_soon()
    }

    pub fn is_capturing(&self) -> bool {
        self.handle.is_capturing()
    }

    /// Stops the drain thread (if still running) and waits for it.
    pub fn join(&mut self) {
        self.handle.shutdown();
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                error!(kind = ?self.kind(), "encoder thread panicked");
            }
        }
    }
}

impl Drop for MediaEncoder {
    fn drop(&mut self) {
        self.join();
    }
}

/// PCM-fed encoder with its own capture thread reading from an [`AudioSource`].
pub struct AudioEncoder {
    encoder: MediaEncoder,
    pcm: SharedPcm,
    source: Option<Box<dyn AudioSource>>,
    clock: Arc<dyn Clock>,
    capture: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AudioEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEncoder")
            .field("encoder", &self.encoder)
            .field("capture_started", &self.source.is_none())
            .finish()
    }
}

impl AudioEncoder {
    pub fn spawn(
        codec: Box<dyn EncoderCodec>,
        pcm: Box<dyn PcmInput>,
        source: Box<dyn AudioSource>,
        ctx: &EncoderContext,
    ) -> Result<Self, RecordError> {
        let pcm: SharedPcm = Arc::new(Mutex::new(pcm));
        let encoder = MediaEncoder::spawn_inner(
            EncoderKind::Audio,
            codec,
            EndOfInput::Pcm(Arc::clone(&pcm)),
            ctx,
        )?;
        Ok(Self {
            encoder,
            pcm,
            source: Some(source),
            clock: Arc::clone(&ctx.clock),
            capture: None,
        })
    }

    pub fn handle(&self) -> EncoderHandle {
        self.encoder.handle()
    }

    /// Arms the encoder and starts the capture thread on first use.
    pub fn start_recording(&mut self) -> Result<(), RecordError> {
        self.encoder.start_recording();
        let Some(source) = self.source.take() else {
            return Ok(());
        };
        let capture = AudioCapture {
            handle: self.encoder.handle(),
            pcm: Arc::clone(&self.pcm),
            source,
            clock: Arc::clone(&self.clock),
        };
        let name = "camflow-audio-capture";
        let t = thread::Builder::new()
            .name(name.into())
            .spawn(move || capture.run())
            .map_err(|source| RecordError::Spawn { name, source })?;
        self.capture = Some(t);
        Ok(())
    }

    pub fn stop_recording(&self) {
        self.encoder.stop_recording();
    }

    pub fn join(&mut self) {
        self.encoder.join();
        if let Some(t) = self.capture.take() {
            if t.join().is_err() {
                error!("audio capture thread panicked");
            }
        }
    }
}

impl Drop for AudioEncoder {
    fn drop(&mut self) {
        self.join();
    }
}

struct AudioCapture {
    handle: EncoderHandle,
    pcm: SharedPcm,
    source: Box<dyn AudioSource>,
    clock: Arc<dyn Clock>,
}

impl AudioCapture {
    fn running(&self) -> bool {
        self.handle.is_capturing() && !self.handle.is_stop_requested() && !self.handle.end_of_stream()
    }

    fn encode(&self, pcm: &[u8]) -> Result<(), RecordError> {
        if !self.handle.is_capturing() {
            return Ok(());
        }
        let pts = self.clock.now_us();
        self.pcm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue_pcm(pcm, pts)?;
        self.handle.frame_available_soon();
        Ok(())
    }

    fn run(mut self) {
        let mut buf = vec![0u8; SAMPLES_PER_FRAME];
        let mut chunks = 0u64;
        while self.running() {
            match self.source.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if let Err(e) = self.encode(&buf[..n]) {
                        warn!(error = %e, "pcm chunk dropped");
                        break;
                    }
                    chunks += 1;
                }
                Err(e) => {
                    warn!(error = %e, "audio source failed");
                    break;
                }
            }
        }
        self.source.stop();
        self.handle.frame_available_soon();

        // A track that never produced data still needs a format for the muxer to start.
        if chunks == 0 {
            let silence = vec![0u8; SAMPLES_PER_FRAME];
            for _ in 0..SILENT_FRAMES {
                if !self.handle.is_capturing() {
                    break;
                }
                if let Err(e) = self.encode(&silence) {
                    warn!(error = %e, "silent chunk dropped");
                    break;
                }
                thread::sleep(SILENT_FRAME_GAP);
            }
        }
        debug!(chunks, "audio capture finished");
    }
}
