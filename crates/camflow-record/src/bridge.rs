//! Recording bridge: republishes the composed texture onto the encoder's input surface from a
//! dedicated thread with its own (shared) GL context.
//!
//! The GL thread only posts requests under the monitor. Draw requests collapse into a counter;
//! when the bridge wakes it renders the most recent texture once. `release` blocks until the
//! bridge thread has torn its context down.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use camflow_core::{ScaleType, Size};
use camflow_runtime_glow::{DrawStage, ExternalRender, Gpu, RenderStage, SinkState, TextureId};

use crate::encoder::FrameGate;
use crate::error::RecordError;

/// Encoder-side drawing context. Lives and dies on the bridge thread.
pub trait RecordTarget {
    /// Renders `texture` (a name shared with the GL thread) onto the encoder surface and
    /// presents it.
    fn draw_texture(&mut self, texture: TextureId) -> Result<(), RecordError>;
    fn release(&mut self);
}

/// Creates the bridge's context and target on the bridge thread.
pub trait RecordTargetFactory: Send {
    fn create(&mut self, size: Size) -> Result<Box<dyn RecordTarget>, RecordError>;
}

#[derive(Debug, Default)]
struct Requests {
    prepare: Option<Size>,
    pending_draws: u32,
    texture: Option<TextureId>,
    release: bool,
    exited: bool,
    renders: u64,
    collapsed: u64,
}

#[derive(Debug, Default)]
struct Monitor {
    requests: Mutex<Requests>,
    cv: Condvar,
}

impl Monitor {
    fn lock(&self) -> MutexGuard<'_, Requests> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Command {
    Exit,
    Prepare(Size),
    Draw(TextureId),
    Idle,
}

pub struct RecordBridge {
    state: SinkState,
    monitor: Arc<Monitor>,
    gate: Arc<dyn FrameGate>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RecordBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBridge")
            .field("state", &self.state)
            .field("requests", &*self.monitor.lock())
            .finish()
    }
}

impl RecordBridge {
    /// Starts the bridge thread. Nothing is drawn until the sink is prepared.
    pub fn spawn(
        factory: Box<dyn RecordTargetFactory>,
        gate: Arc<dyn FrameGate>,
    ) -> Result<Self, RecordError> {
        let monitor = Arc::new(Monitor::default());
        let worker_monitor = Arc::clone(&monitor);
        let name = "camflow-record-bridge";
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                BridgeThread {
                    monitor: worker_monitor,
                    factory,
                    target: None,
                }
                .run()
            })
            .map_err(|source| RecordError::Spawn { name, source })?;
        Ok(Self {
            state: SinkState::None,
            monitor,
            gate,
            thread: Some(thread),
        })
    }

    /// Frames actually rendered onto the encoder surface.
    pub fn renders(&self) -> u64 {
        self.monitor.lock().renders
    }

    /// Draw requests that were folded into a later render.
    pub fn collapsed(&self) -> u64 {
        self.monitor.lock().collapsed
    }

    fn shutdown(&mut self) {
        {
            let mut r = self.monitor.lock();
            r.release = true;
            self.monitor.cv.notify_all();
            let _r = self
                .monitor
                .cv
                .wait_while(r, |r| !r.exited)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                error!("record bridge thread panicked");
            }
        }
    }
}

impl ExternalRender for RecordBridge {
    fn state(&self) -> SinkState {
        self.state
    }

    fn on_created(&mut self) {
        if self.state == SinkState::None {
            self.state = SinkState::Created;
        }
    }

    fn on_prepared(&mut self, size: Size) {
        if self.state != SinkState::Created {
            return;
        }
        self.state = SinkState::Prepared;
        let mut r = self.monitor.lock();
        r.prepare = Some(size);
        self.monitor.cv.notify_all();
    }

    fn draw(&mut self, texture: TextureId) {
        if self.state != SinkState::Prepared {
            return;
        }
        if !self.gate.frame_available_soon() {
            return;
        }
        let mut r = self.monitor.lock();
        r.texture = Some(texture);
        r.pending_draws += 1;
        self.monitor.cv.notify_all();
    }

    fn release(&mut self) {
        if self.state == SinkState::Destroyed {
            return;
        }
        self.state = SinkState::Destroyed;
        self.shutdown();
        info!(renders = self.renders(), collapsed = self.collapsed(), "record bridge released");
    }
}

impl Drop for RecordBridge {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

struct BridgeThread {
    monitor: Arc<Monitor>,
    factory: Box<dyn RecordTargetFactory>,
    target: Option<Box<dyn RecordTarget>>,
}

impl BridgeThread {
    fn next_command(&self) -> Command {
        let guard = self.monitor.lock();
        let mut r = self
            .monitor
            .cv
            .wait_while(guard, |r| {
                !r.release && r.prepare.is_none() && r.pending_draws == 0
            })
            .unwrap_or_else(PoisonError::into_inner);
        if r.release {
            return Command::Exit;
        }
        if let Some(size) = r.prepare.take() {
            return Command::Prepare(size);
        }
        let pending = std::mem::take(&mut r.pending_draws);
        r.collapsed += u64::from(pending.saturating_sub(1));
        r.texture.map_or(Command::Idle, Command::Draw)
    }

    fn release_target(&mut self) {
        if let Some(mut t) = self.target.take() {
            t.release();
        }
    }

    fn run(mut self) {
        loop {
            match self.next_command() {
                Command::Exit => break,
                Command::Idle => {}
                Command::Prepare(size) => {
                    self.release_target();
                    match self.factory.create(size) {
                        Ok(t) => {
                            debug!(%size, "record target ready");
                            self.target = Some(t);
                        }
                        Err(e) => error!(error = %e, "record target creation failed"),
                    }
                }
                Command::Draw(texture) => {
                    let Some(target) = self.target.as_mut() else {
                        continue;
                    };
                    match target.draw_texture(texture) {
                        Ok(()) => self.monitor.lock().renders += 1,
                        Err(e) => warn!(error = %e, "record frame dropped"),
                    }
                }
            }
        }
    }
}

impl Drop for BridgeThread {
    // Also runs on unwind; `release` waits for `exited`.
    fn drop(&mut self) {
        self.release_target();
        let mut r = self.monitor.lock();
        r.exited = true;
        self.monitor.cv.notify_all();
    }
}

/// Presents the encoder surface after each frame (e.g. `eglSwapBuffers` on it).
pub type Present = Box<dyn FnMut() -> Result<(), RecordError>>;

/// [`RecordTarget`] that blits through any [`Gpu`] with a stretch-to-fit screen stage.
pub struct GpuBlitTarget<G: Gpu> {
    gpu: G,
    stage: DrawStage,
    present: Present,
}

impl<G: Gpu + std::fmt::Debug> std::fmt::Debug for GpuBlitTarget<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBlitTarget")
            .field("gpu", &self.gpu)
            .field("stage", &self.stage)
            .finish()
    }
}

impl<G: Gpu> GpuBlitTarget<G> {
    /// The context behind `gpu` must be current on the calling thread.
    pub fn new(gpu: G, size: Size, present: Present) -> Result<Self, RecordError> {
        let mut stage = DrawStage::new(ScaleType::FitXy);
        stage.set_data_size(size);
        if !stage.create(&gpu) {
            return Err(RecordError::Target("blit program unavailable".into()));
        }
        stage.prepare(&gpu, size);
        Ok(Self {
            gpu,
            stage,
            present,
        })
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }
}

impl<G: Gpu> RecordTarget for GpuBlitTarget<G> {
    fn draw_texture(&mut self, texture: TextureId) -> Result<(), RecordError> {
        self.stage.set_input_texture(texture);
        self.stage.draw(&self.gpu);
        (self.present)()
    }

    fn release(&mut self) {
        self.stage.release(&self.gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BlockingTargetFactory, OpenGate, TargetEvent};
    use camflow_runtime_glow::testing::{FakeGpu, GpuCall};
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn tex(n: u32) -> TextureId {
        TextureId(NonZeroU32::new(n).unwrap())
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn pending_draws_collapse_into_one_render_of_latest() {
        let (factory, events, resume) = BlockingTargetFactory::new();
        let mut bridge = RecordBridge::spawn(Box::new(factory), Arc::new(OpenGate)).unwrap();
        bridge.on_created();
        bridge.on_prepared(Size::new(8, 8));
        assert_eq!(events.recv_timeout(WAIT).unwrap(), TargetEvent::Created(Size::new(8, 8)));

        // First frame parks the bridge inside the target.
        bridge.draw(tex(1));
        assert_eq!(events.recv_timeout(WAIT).unwrap(), TargetEvent::Entered(tex(1)));

        for n in 2..=6 {
            bridge.draw(tex(n));
        }
        resume.send(()).unwrap();
        resume.send(()).unwrap();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), TargetEvent::Entered(tex(6)));

        bridge.release();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), TargetEvent::Released);
        assert_eq!(bridge.renders(), 2);
        assert_eq!(bridge.collapsed(), 4);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn draws_before_prepare_are_dropped() {
        let (factory, events, _resume) = BlockingTargetFactory::new();
        let mut bridge = RecordBridge::spawn(Box::new(factory), Arc::new(OpenGate)).unwrap();
        bridge.draw(tex(1));
        bridge.on_created();
        bridge.draw(tex(2));
        bridge.release();
        assert_eq!(bridge.state(), SinkState::Destroyed);
        assert_eq!(bridge.renders(), 0);
        assert!(events.try_recv().is_err(), "no target was ever created");
    }

    struct ClosedGate;

    impl FrameGate for ClosedGate {
        fn frame_available_soon(&self) -> bool {
            false
        }
    }

    #[test]
    fn closed_gate_drops_frames() {
        let (factory, events, _resume) = BlockingTargetFactory::new();
        let mut bridge = RecordBridge::spawn(Box::new(factory), Arc::new(ClosedGate)).unwrap();
        bridge.on_created();
        bridge.on_prepared(Size::new(4, 4));
        assert!(matches!(events.recv_timeout(WAIT).unwrap(), TargetEvent::Created(_)));
        bridge.draw(tex(3));
        bridge.release();
        assert_eq!(events.recv_timeout(WAIT).unwrap(), TargetEvent::Released);
        assert_eq!(bridge.renders(), 0);
    }

    #[test]
    fn blit_target_draws_full_surface_then_presents() {
        let presented = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&presented);
        let mut target = GpuBlitTarget::new(
            FakeGpu::new(),
            Size::new(32, 16),
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
        target.gpu().take_calls();

        target.draw_texture(tex(40)).unwrap();
        assert!(presented.load(Ordering::SeqCst));
        let calls = target.gpu().take_calls();
        assert!(calls.contains(&GpuCall::BindFramebuffer(None)));
        assert!(calls.contains(&GpuCall::Viewport(0, 0, 32, 16)));
        assert!(calls
            .iter()
            .any(|c| matches!(c, GpuCall::DrawQuad { texture, .. } if *texture == tex(40))));

        target.release();
        assert_eq!(
            target.gpu().count(|c| matches!(c, GpuCall::DeleteProgram(_))),
            1
        );
    }
}
