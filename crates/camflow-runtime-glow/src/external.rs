//! Consumers driven by the frame loop whose GPU work runs elsewhere (e.g. an encoder thread
//! with its own shared context).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camflow_core::Size;
use tracing::debug;

use crate::gpu::TextureId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    None,
    Created,
    Prepared,
    Destroyed,
}

/// A per-frame consumer of the composed texture.
///
/// The orchestrator creates and prepares a sink lazily on the first tick after it was added.
/// `draw` before `Prepared` must be dropped by the implementation.
pub trait ExternalRender: Send {
    fn state(&self) -> SinkState;
    fn on_created(&mut self);
    fn on_prepared(&mut self, size: Size);
    fn draw(&mut self, texture: TextureId);
    fn release(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    sinks: Vec<(SinkId, Box<dyn ExternalRender>)>,
}

/// Lock-protected sink set, shared between the GL thread and whoever adds/removes sinks.
#[derive(Clone, Default)]
pub struct ExternalSinks {
    inner: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for ExternalSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.lock();
        f.debug_struct("ExternalSinks")
            .field("len", &reg.sinks.len())
            .field("next_id", &reg.next_id)
            .finish()
    }
}

impl ExternalSinks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, sink: Box<dyn ExternalRender>) -> SinkId {
        let mut reg = self.lock();
        reg.next_id += 1;
        let id = SinkId(reg.next_id);
        reg.sinks.push((id, sink));
        debug!(?id, "external sink added");
        id
    }

    /// Detaches a sink without releasing it.
    pub fn remove(&self, id: SinkId) -> Option<Box<dyn ExternalRender>> {
        let mut reg = self.lock();
        let idx = reg.sinks.iter().position(|(sid, _)| *sid == id)?;
        debug!(?id, "external sink removed");
        Some(reg.sinks.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.lock().sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily creates/prepares every sink, then hands it `texture`.
    pub fn dispatch(&self, texture: TextureId, size: Size) {
        let mut reg = self.lock();
        for (_, sink) in reg.sinks.iter_mut() {
            match sink.state() {
                SinkState::None => {
                    sink.on_created();
                    sink.on_prepared(size);
                }
                SinkState::Created => sink.on_prepared(size),
                SinkState::Prepared | SinkState::Destroyed => {}
            }
            sink.draw(texture);
        }
    }

    /// Releases and drops every sink.
    pub fn release_all(&self) {
        let drained: Vec<_> = std::mem::take(&mut self.lock().sinks);
        for (_, mut sink) in drained {
            sink.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    #[derive(Default)]
    struct Log {
        events: Vec<String>,
    }

    struct Recording {
        state: SinkState,
        log: Arc<Mutex<Log>>,
    }

    impl ExternalRender for Recording {
        fn state(&self) -> SinkState {
            self.state
        }
        fn on_created(&mut self) {
            self.state = SinkState::Created;
            self.log.lock().unwrap().events.push("created".into());
        }
        fn on_prepared(&mut self, size: Size) {
            self.state = SinkState::Prepared;
            self.log.lock().unwrap().events.push(format!("prepared {size}"));
        }
        fn draw(&mut self, texture: TextureId) {
            if self.state == SinkState::Prepared {
                self.log.lock().unwrap().events.push(format!("draw {}", texture.0));
            }
        }
        fn release(&mut self) {
            self.state = SinkState::Destroyed;
            self.log.lock().unwrap().events.push("released".into());
        }
    }

    fn tex(n: u32) -> TextureId {
        TextureId(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn sinks_are_created_and_prepared_lazily_once() {
        let log = Arc::new(Mutex::new(Log::default()));
        let sinks = ExternalSinks::new();
        sinks.add(Box::new(Recording {
            state: SinkState::None,
            log: Arc::clone(&log),
        }));

        sinks.dispatch(tex(3), Size::new(4, 2));
        sinks.dispatch(tex(4), Size::new(4, 2));
        sinks.release_all();
        assert!(sinks.is_empty());

        let events = log.lock().unwrap().events.clone();
        assert_eq!(
            events,
            vec!["created", "prepared 4x2", "draw 3", "draw 4", "released"]
        );
    }

    #[test]
    fn removed_sink_is_not_dispatched_or_released() {
        let log = Arc::new(Mutex::new(Log::default()));
        let sinks = ExternalSinks::new();
        let id = sinks.add(Box::new(Recording {
            state: SinkState::None,
            log: Arc::clone(&log),
        }));
        let detached = sinks.remove(id);
        assert!(detached.is_some());
        assert!(sinks.remove(id).is_none());

        sinks.dispatch(tex(1), Size::new(1, 1));
        sinks.release_all();
        assert!(log.lock().unwrap().events.is_empty());
    }
}
