//! Shared muxer guarded by one monitor.
//!
//! Every encoder registers once, adds its track when its output format is known, then calls
//! [`MuxerCoordinator::start`]. The underlying writer starts when the last expected encoder
//! does; earlier callers block in [`MuxerCoordinator::wait_started`]. Each encoder calls
//! [`MuxerCoordinator::stop`] when done and the writer is finalized after the last one.

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::{EncodedSample, EncoderKind, MuxerWriter, TrackFormat};
use crate::error::RecordError;

struct MuxState {
    writer: Box<dyn MuxerWriter>,
    registered: Vec<EncoderKind>,
    started_count: usize,
    started: bool,
    finalized: bool,
    samples: u64,
}

pub struct MuxerCoordinator {
    output: PathBuf,
    state: Mutex<MuxState>,
    cv: Condvar,
}

impl std::fmt::Debug for MuxerCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.lock();
        f.debug_struct("MuxerCoordinator")
            .field("output", &self.output)
            .field("registered", &s.registered)
            .field("started_count", &s.started_count)
            .field("started", &s.started)
            .field("finalized", &s.finalized)
            .finish()
    }
}

impl MuxerCoordinator {
    pub fn new(writer: Box<dyn MuxerWriter>, output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            state: Mutex::new(MuxState {
                writer,
                registered: Vec::new(),
                started_count: 0,
                started: false,
                finalized: false,
                samples: 0,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MuxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// One registration per encoder kind; the expected track count is the number registered.
    pub fn register_encoder(&self, kind: EncoderKind) -> Result<(), RecordError> {
        let mut s = self.lock();
        if s.started {
            return Err(RecordError::MuxerAlreadyStarted);
        }
        if s.registered.contains(&kind) {
            return Err(RecordError::DuplicateEncoder(kind));
        }
        s.registered.push(kind);
        debug!(?kind, expected = s.registered.len(), "encoder registered");
        Ok(())
    }

    pub fn expected_tracks(&self) -> usize {
        self.lock().registered.len()
    }

    pub fn add_track(&self, format: &TrackFormat) -> Result<usize, RecordError> {
        let mut s = self.lock();
        if s.started || s.finalized {
            return Err(RecordError::MuxerAlreadyStarted);
        }
        let track = s.writer.add_track(format)?;
        debug!(track, kind = ?format.kind, mime = %format.mime, "track added");
        Ok(track)
    }

    /// Counts one more started encoder. Returns whether the writer is running.
    pub fn start(&self) -> Result<bool, RecordError> {
        let mut s = self.lock();
        s.started_count += 1;
        let expected = s.registered.len();
        if expected > 0 && s.started_count == expected && !s.started && !s.finalized {
            s.writer.start()?;
            s.started = true;
            info!(path = %self.output.display(), tracks = expected, "muxer started");
            self.cv.notify_all();
        }
        Ok(s.started)
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    /// Blocks until the writer starts or is finalized, or `timeout` passes.
    /// Returns whether it is started.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |s| !s.started && !s.finalized)
            .unwrap_or_else(PoisonError::into_inner);
        guard.started
    }

    /// Writes only while started. Returns whether the sample was written.
    pub fn write_sample(&self, track: usize, sample: &EncodedSample) -> Result<bool, RecordError> {
        let mut s = self.lock();
        if !s.started || s.started_count == 0 {
            return Ok(false);
        }
        s.writer.write_sample(track, sample)?;
        s.samples += 1;
        Ok(true)
    }

    pub fn samples_written(&self) -> u64 {
        self.lock().samples
    }

    /// An encoder failed before the writer started. Finalizes without starting the writer so
    /// peers blocked in [`MuxerCoordinator::wait_started`] return.
    pub fn abandon(&self, kind: EncoderKind) {
        let mut s = self.lock();
        if s.started || s.finalized {
            return;
        }
        s.finalized = true;
        warn!(?kind, path = %self.output.display(), "muxer abandoned before start");
        self.cv.notify_all();
    }

    /// Counts one stopped encoder; the writer is finalized once, when the last one stops.
    /// Returns whether this call finalized it.
    pub fn stop(&self) -> Result<bool, RecordError> {
        let mut s = self.lock();
        s.started_count = s.started_count.saturating_sub(1);
        if s.registered.is_empty() || s.started_count > 0 || s.finalized {
            return Ok(false);
        }
        s.finalized = true;
        let was_started = std::mem::replace(&mut s.started, false);
        self.cv.notify_all();
        if !was_started {
            warn!(path = %self.output.display(), "muxer stopped before it started");
            return Ok(false);
        }
        s.writer.stop()?;
        info!(path = %self.output.display(), samples = s.samples, "muxer finalized");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryWriter;
    use camflow_core::Size;
    use std::sync::Arc;
    use std::thread;

    fn coordinator() -> (MuxerCoordinator, crate::testing::WriterLog) {
        let writer = MemoryWriter::new();
        let log = writer.log();
        (MuxerCoordinator::new(Box::new(writer), "out.mp4"), log)
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (m, _) = coordinator();
        m.register_encoder(EncoderKind::Video).unwrap();
        assert!(matches!(
            m.register_encoder(EncoderKind::Video),
            Err(RecordError::DuplicateEncoder(EncoderKind::Video))
        ));
        assert_eq!(m.expected_tracks(), 1);
    }

    #[test]
    fn single_track_starts_immediately() {
        let (m, log) = coordinator();
        m.register_encoder(EncoderKind::Video).unwrap();
        m.add_track(&TrackFormat::video(Size::new(2, 2), 25, 1)).unwrap();
        assert!(m.start().unwrap());
        assert_eq!(log.starts(), 1);
        assert!(m.add_track(&TrackFormat::audio(1, 1)).is_err());
    }

    #[test]
    fn samples_before_start_are_dropped() {
        let (m, log) = coordinator();
        m.register_encoder(EncoderKind::Video).unwrap();
        m.register_encoder(EncoderKind::Audio).unwrap();
        m.start().unwrap();
        assert!(!m.write_sample(0, &EncodedSample::default()).unwrap());
        assert!(log.samples().is_empty());
    }

    #[test]
    fn waiter_is_released_by_last_start() {
        let (m, _) = coordinator();
        let m = Arc::new(m);
        m.register_encoder(EncoderKind::Video).unwrap();
        m.register_encoder(EncoderKind::Audio).unwrap();
        assert!(!m.start().unwrap());
        assert!(!m.wait_started(Duration::from_millis(5)));

        let other = Arc::clone(&m);
        let h = thread::spawn(move || other.start().unwrap());
        assert!(m.wait_started(Duration::from_secs(5)));
        assert!(h.join().unwrap());
    }

    #[test]
    fn stop_before_start_never_touches_writer() {
        let (m, log) = coordinator();
        m.register_encoder(EncoderKind::Video).unwrap();
        assert!(!m.stop().unwrap());
        assert!(m.is_finalized());
        assert!(!m.start().unwrap());
        assert_eq!(log.starts(), 0);
        assert_eq!(log.stops(), 0);
    }

    #[test]
    fn abandon_releases_waiters_and_never_starts_writer() {
        let (m, log) = coordinator();
        let m = Arc::new(m);
        m.register_encoder(EncoderKind::Video).unwrap();
        m.register_encoder(EncoderKind::Audio).unwrap();
        assert!(!m.start().unwrap());

        let waiter = Arc::clone(&m);
        let h = thread::spawn(move || waiter.wait_started(Duration::from_secs(30)));
        m.abandon(EncoderKind::Audio);
        assert!(!h.join().unwrap());
        assert!(m.is_finalized());

        assert!(!m.start().unwrap());
        assert!(!m.stop().unwrap());
        assert_eq!(log.starts(), 0);
        assert_eq!(log.stops(), 0);
    }
}
