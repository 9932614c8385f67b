//! Render-on-dirty scheduling for the GL thread.
//!
//! Any thread may request a render or queue a closure to run on the GL thread. Requests made
//! before the GL thread gets to them collapse into one pending render. Queued events always run
//! before the render they precede.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camflow_core::FrameListener;

/// Closure executed on the GL thread against the GL-side state `T`.
pub type GlEvent<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Hook for hosts with their own event loop (e.g. posting a user event to winit).
pub type Waker = Arc<dyn Fn() + Send + Sync>;

struct State<T> {
    dirty: bool,
    events: VecDeque<GlEvent<T>>,
    shutdown: bool,
    requests: u64,
    waker: Option<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
}

pub struct Work<T> {
    pub events: Vec<GlEvent<T>>,
    pub render: bool,
}

impl<T> std::fmt::Debug for Work<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Work")
            .field("events", &self.events.len())
            .field("render", &self.render)
            .finish()
    }
}

pub struct RenderScheduler<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RenderScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for RenderScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.lock();
        f.debug_struct("RenderScheduler")
            .field("dirty", &s.dirty)
            .field("events", &s.events.len())
            .field("shutdown", &s.shutdown)
            .field("requests", &s.requests)
            .finish()
    }
}

impl<T> Default for RenderScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RenderScheduler<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    dirty: false,
                    events: VecDeque::new(),
                    shutdown: false,
                    requests: 0,
                    waker: None,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_waker(&self, waker: Waker) {
        self.lock().waker = Some(waker);
    }

    fn notify(&self, waker: Option<Waker>) {
        self.shared.cv.notify_all();
        if let Some(w) = waker {
            w();
        }
    }

    pub fn request_render(&self) {
        let waker = {
            let mut s = self.lock();
            if s.shutdown {
                return;
            }
            s.requests += 1;
            if s.dirty {
                return;
            }
            s.dirty = true;
            s.waker.clone()
        };
        self.notify(waker);
    }

    pub fn queue_event(&self, event: GlEvent<T>) {
        let waker = {
            let mut s = self.lock();
            if s.shutdown {
                return;
            }
            s.events.push_back(event);
            s.waker.clone()
        };
        self.notify(waker);
    }

    /// Total `request_render` calls since creation (coalesced or not).
    pub fn requests(&self) -> u64 {
        self.lock().requests
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Drains queued events and the dirty flag without blocking.
    pub fn take_work(&self) -> Work<T> {
        let mut s = self.lock();
        Self::drain(&mut s)
    }

    fn drain(s: &mut State<T>) -> Work<T> {
        let render = std::mem::replace(&mut s.dirty, false);
        Work {
            events: s.events.drain(..).collect(),
            render,
        }
    }

    /// Blocks until there is work, the timeout elapses, or the scheduler shuts down.
    /// Returns `None` after shutdown.
    pub fn wait_for_work(&self, timeout: Option<Duration>) -> Option<Work<T>> {
        let guard = self.lock();
        let pending = |s: &mut State<T>| !s.shutdown && !s.dirty && s.events.is_empty();
        let mut guard = match timeout {
            Some(t) => {
                self.shared
                    .cv
                    .wait_timeout_while(guard, t, pending)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .shared
                .cv
                .wait_while(guard, pending)
                .unwrap_or_else(PoisonError::into_inner),
        };
        if guard.shutdown {
            return None;
        }
        Some(Self::drain(&mut guard))
    }

    /// Runs queued events against `target`; returns whether a render is due.
    pub fn run_pending(&self, target: &mut T) -> bool {
        let work = self.take_work();
        for event in work.events {
            event(target);
        }
        work.render
    }

    /// Stops accepting work and wakes any waiter. Queued events are dropped.
    pub fn shutdown(&self) {
        let waker = {
            let mut s = self.lock();
            s.shutdown = true;
            s.events.clear();
            s.waker.clone()
        };
        self.notify(waker);
    }
}

impl<T: 'static> RenderScheduler<T> {
    /// Listener that requests a render; suitable for frame-available callbacks.
    pub fn frame_listener(&self) -> FrameListener {
        let this = self.clone();
        Arc::new(move || this.request_render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn render_requests_coalesce() {
        let s: RenderScheduler<Vec<u32>> = RenderScheduler::new();
        for _ in 0..5 {
            s.request_render();
        }
        assert_eq!(s.requests(), 5);
        let w = s.take_work();
        assert!(w.render);
        assert!(!s.take_work().render);
    }

    #[test]
    fn events_run_in_order_before_render() {
        let s: RenderScheduler<Vec<u32>> = RenderScheduler::new();
        s.queue_event(Box::new(|v| v.push(1)));
        s.queue_event(Box::new(|v| v.push(2)));
        let mut target = Vec::new();
        assert!(!s.run_pending(&mut target));
        assert_eq!(target, vec![1, 2]);
    }

    #[test]
    fn waiter_wakes_on_request_from_other_thread() {
        let s: RenderScheduler<()> = RenderScheduler::new();
        let remote = s.clone();
        let h = thread::spawn(move || remote.request_render());
        let w = s.wait_for_work(Some(Duration::from_secs(5))).expect("not shut down");
        h.join().unwrap();
        assert!(w.render);
    }

    #[test]
    fn shutdown_releases_waiter_and_drops_new_work() {
        let s: RenderScheduler<()> = RenderScheduler::new();
        let remote = s.clone();
        let h = thread::spawn(move || remote.wait_for_work(None).is_none());
        s.shutdown();
        assert!(h.join().unwrap());
        s.request_render();
        assert!(!s.is_dirty());
    }
}
