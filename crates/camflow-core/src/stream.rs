//! Producer side of a streaming image source.
//!
//! A camera (or any other producer) pushes RGBA frames into a [`StreamSurface`]; the GL thread
//! later latches the newest one into a texture. The surface holds exactly one frame: arrivals
//! that land before the consumer latches overwrite each other, and only the transition from
//! "nothing pending" to "pending" fires the frame-available listener.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::geometry::{Mat4, Size};

#[derive(Clone, Debug)]
pub struct StreamFrame {
    pub size: Size,
    /// RGBA8, row-major, tightly packed.
    pub rgba: Vec<u8>,
    /// Texture-coordinate transform supplied by the producer.
    pub transform: Mat4,
    pub timestamp_us: u64,
}

/// Called from the producer thread when a frame becomes available. Must not touch GL.
pub type FrameListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Slot {
    latest: Option<StreamFrame>,
    pending: bool,
    released: bool,
    overwritten: u64,
    listener: Option<FrameListener>,
}

#[derive(Clone, Default)]
pub struct StreamSurface {
    slot: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for StreamSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.lock();
        f.debug_struct("StreamSurface")
            .field("pending", &s.pending)
            .field("released", &s.released)
            .field("overwritten", &s.overwritten)
            .field("listener", &s.listener.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl StreamSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_frame_listener(&self, listener: FrameListener) {
        self.lock().listener = Some(listener);
    }

    /// Publishes a frame. Returns `false` once the surface has been released.
    pub fn push_frame(&self, frame: StreamFrame) -> bool {
        let notify = {
            let mut s = self.lock();
            if s.released {
                return false;
            }
            if s.pending {
                s.overwritten += 1;
            }
            s.latest = Some(frame);
            let edge = !s.pending;
            s.pending = true;
            if edge {
                s.listener.clone()
            } else {
                None
            }
        };
        // Invoke outside the lock: listeners typically take the scheduler lock.
        if let Some(listener) = notify {
            listener();
        }
        true
    }

    /// Takes the newest frame, if one arrived since the last call.
    pub fn take_latest(&self) -> Option<StreamFrame> {
        let mut s = self.lock();
        s.pending = false;
        s.latest.take()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending
    }

    /// Frames replaced before the consumer latched them.
    pub fn overwritten(&self) -> u64 {
        self.lock().overwritten
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    pub fn release(&self) {
        let mut s = self.lock();
        s.released = true;
        s.pending = false;
        s.latest = None;
        s.listener = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(tag: u8) -> StreamFrame {
        StreamFrame {
            size: Size::new(1, 1),
            rgba: vec![tag; 4],
            transform: Mat4::IDENTITY,
            timestamp_us: tag as u64,
        }
    }

    #[test]
    fn arrivals_coalesce_into_one_notification() {
        let surface = StreamSurface::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        surface.set_frame_listener(Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        for tag in 1..=3 {
            assert!(surface.push_frame(frame(tag)));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(surface.overwritten(), 2);

        let latest = surface.take_latest().expect("a frame is pending");
        assert_eq!(latest.rgba[0], 3, "latest frame wins");
        assert!(surface.take_latest().is_none(), "latching twice is a no-op");

        surface.push_frame(frame(9));
        assert_eq!(hits.load(Ordering::SeqCst), 2, "new edge after consume");
    }

    #[test]
    fn released_surface_rejects_frames() {
        let surface = StreamSurface::new();
        surface.release();
        assert!(!surface.push_frame(frame(1)));
        assert!(!surface.has_pending());
    }
}
