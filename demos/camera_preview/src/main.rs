use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

mod record;

use anyhow::{anyhow, Context};
use crossbeam_channel::{Receiver, Sender};
use glutin::config::{ConfigSurfaceTypes, ConfigTemplateBuilder};
use glutin::context::{
    ContextAttributesBuilder, NotCurrentGlContextSurfaceAccessor, PossiblyCurrentContext,
};
use glutin::display::GetGlDisplay;
use glutin::prelude::{GlConfig, GlDisplay, GlSurface};
use glutin::surface::{Surface, SurfaceAttributesBuilder, WindowSurface};
use glutin_winit::DisplayBuilder;
use raw_window_handle::HasRawWindowHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopBuilder};
use winit::window::{Window, WindowBuilder};

use camflow_core::{CamflowConfig, CaptureSettings, Clock, MonotonicClock, ScaleType, Size, StreamSurface};
use camflow_input_camera::{CameraDevice, CameraEvent, CameraOptions, StreamingCamera};
use camflow_record::{Recorder, RecorderEvent};
use camflow_runtime_glow::{
    save_capture_png, ExternalRender, GlowGpu, Pipeline, RenderScheduler, ShaderDialect, SinkId,
};

use record::ContextSlot;

const WIN_W: u32 = 720;
const WIN_H: u32 = 960;

#[derive(Debug, Clone, Copy)]
enum UserEvent {
    /// A camera frame arrived or a GL event was queued.
    Wake,
}

fn nz(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v.max(1)).unwrap_or(NonZeroU32::MIN)
}

fn print_usage_and_exit() -> ! {
    eprintln!(
        "Usage:\n  camflow-demo-camera-preview [config.json]\n\n\
         Keys:\n  C  capture the next frame to PNG\n  D  dump the next raw camera frame\n  \
         S  cycle the display scale type\n  R  start/stop recording\n"
    );
    std::process::exit(2);
}

fn config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => PathBuf::from("camflow.json"),
        Some("--help" | "-h") => print_usage_and_exit(),
        Some(path) => PathBuf::from(path),
    }
}

// --- GL / window bootstrap ---

fn make_gl(
    event_loop: &EventLoop<UserEvent>,
) -> anyhow::Result<(Window, Surface<WindowSurface>, PossiblyCurrentContext, glow::Context)> {
    let template = ConfigTemplateBuilder::new()
        .with_alpha_size(8)
        .with_depth_size(0)
        .with_stencil_size(0);

    let display_builder = DisplayBuilder::new().with_window_builder(Some(
        WindowBuilder::new()
            .with_title("camflow: camera preview")
            .with_inner_size(PhysicalSize::new(WIN_W, WIN_H)),
    ));

    let (window, gl_config) = display_builder
        .build(event_loop, template, |configs| {
            // The record context draws into a pbuffer; prefer configs that allow one.
            let rank = |c: &glutin::config::Config| {
                (
                    c.config_surface_types().contains(ConfigSurfaceTypes::PBUFFER),
                    c.num_samples(),
                )
            };
            configs
                .reduce(|a, b| if rank(&a) >= rank(&b) { a } else { b })
                .expect("glutin yields at least one config")
        })
        .map_err(|e| anyhow!("gl display: {e}"))?;

    let window = window.context("no window created")?;
    let raw_window_handle = window.raw_window_handle();
    let gl_display = gl_config.display();

    let context_attributes = ContextAttributesBuilder::new().build(Some(raw_window_handle));
    let not_current = unsafe { gl_display.create_context(&gl_config, &context_attributes)? };

    let size = window.inner_size();
    let attrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
        raw_window_handle,
        nz(size.width),
        nz(size.height),
    );
    let gl_surface = unsafe { gl_display.create_window_surface(&gl_config, &attrs)? };
    let gl_context = not_current.make_current(&gl_surface)?;

    let gl = unsafe {
        glow::Context::from_loader_function(|s| {
            gl_display.get_proc_address(std::ffi::CStr::from_bytes_with_nul_unchecked(
                format!("{s}\0").as_bytes(),
            )) as *const _
        })
    };

    Ok((window, gl_surface, gl_context, gl))
}

fn open_camera(
    config: &CamflowConfig,
    clock: Arc<dyn Clock>,
    events: Sender<CameraEvent>,
) -> StreamingCamera {
    let options = CameraOptions::from_settings(&config.camera, &config.capture);

    #[cfg(feature = "webcam")]
    {
        camflow_input_camera::webcam_camera(0, options, clock, events)
    }

    #[cfg(not(feature = "webcam"))]
    {
        camflow_input_camera::test_pattern_camera(options, clock, events)
    }
}

fn next_scale_type(s: ScaleType) -> ScaleType {
    match s {
        ScaleType::FitXy => ScaleType::CenterCrop,
        ScaleType::CenterCrop => ScaleType::CenterInside,
        ScaleType::CenterInside => ScaleType::FitStart,
        ScaleType::FitStart => ScaleType::FitEnd,
        ScaleType::FitEnd => ScaleType::FitCenter,
        ScaleType::FitCenter => ScaleType::FitXy,
    }
}

fn capture_to_disk(scheduler: &RenderScheduler<Pipeline>, settings: CaptureSettings) {
    scheduler.queue_event(Box::new(move |p: &mut Pipeline| {
        p.capture(Box::new(move |rgba, size| {
            let stamp_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            if let Err(e) = save_capture_png(rgba, size, &settings, stamp_ms) {
                error!(error = %e, "capture not saved");
            }
        }));
    }));
    scheduler.request_render();
}

fn drain_camera_events(rx: &Receiver<CameraEvent>, config: &CamflowConfig, pipeline: &mut Pipeline) {
    while let Ok(event) = rx.try_recv() {
        match event {
            CameraEvent::Prepared(preview) => {
                let data = config.camera.data_size(preview);
                info!(%preview, %data, "camera prepared");
                pipeline.set_data_size(data);
            }
            CameraEvent::Error(msg) => error!(%msg, "camera error"),
        }
    }
}

/// Recorder plus the sink it feeds while a recording runs.
struct Recording {
    recorder: Recorder,
    events: Receiver<RecorderEvent>,
    slot: ContextSlot,
    sink: Option<SinkId>,
    pending: bool,
}

impl Recording {
    fn spawn(config: &CamflowConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let mut settings = config.recording.clone();
        if settings.audio {
            warn!("no audio backend in the preview demo; recording video only");
            settings.audio = false;
        }
        let slot = ContextSlot::default();
        let (tx, events) = crossbeam_channel::unbounded();
        let recorder = Recorder::spawn(
            Box::new(record::backend(Arc::clone(&slot))),
            settings,
            clock,
            tx,
        )?;
        Ok(Self {
            recorder,
            events,
            slot,
            sink: None,
            pending: false,
        })
    }

    fn toggle(
        &mut self,
        pipeline: &Pipeline,
        gl_context: &PossiblyCurrentContext,
        window: &Window,
    ) {
        if self.sink.is_some() {
            if let Err(e) = self.recorder.stop_recording() {
                error!(error = %e, "stop recording failed");
            }
            return;
        }
        if self.pending {
            return;
        }
        let display = gl_context.display();
        if let Err(e) =
            record::create_shared_context(&display, gl_context, window.raw_window_handle(), &self.slot)
        {
            error!(error = %e, "recording unavailable");
            return;
        }
        match self.recorder.prepare(pipeline.data_size()) {
            Ok(()) => self.pending = true,
            Err(e) => error!(error = %e, "prepare recording failed"),
        }
    }

    fn drain_events(&mut self, pipeline: &Pipeline) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                RecorderEvent::Prepared(session) => {
                    let output = session.output.clone();
                    match session.into_bridge() {
                        Ok(bridge) => {
                            self.sink = Some(pipeline.sinks().add(Box::new(bridge)));
                            if let Err(e) = self.recorder.start_recording() {
                                error!(error = %e, "start recording failed");
                            }
                            info!(path = %output.display(), "recording");
                        }
                        Err(e) => error!(error = %e, "record bridge failed"),
                    }
                    self.pending = false;
                }
                RecorderEvent::Stopped(path) => {
                    self.detach(pipeline);
                    info!(path = %path.display(), "recording saved");
                }
                RecorderEvent::Error(msg) => {
                    error!(%msg, "recording error");
                    self.detach(pipeline);
                    self.pending = false;
                    self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
                }
            }
        }
    }

    fn detach(&mut self, pipeline: &Pipeline) {
        if let Some(mut sink) = self.sink.take().and_then(|id| pipeline.sinks().remove(id)) {
            sink.release();
        }
    }

    fn release(&mut self, pipeline: &Pipeline) {
        self.detach(pipeline);
        self.recorder.release();
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = config_path();
    let config = CamflowConfig::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();
    let (window, gl_surface, gl_context, gl) = make_gl(&event_loop)?;
    let mut gpu = unsafe { GlowGpu::new(gl, ShaderDialect::Glsl330)? };

    let scheduler: RenderScheduler<Pipeline> = RenderScheduler::new();
    let proxy = Mutex::new(event_loop.create_proxy());
    scheduler.set_waker(Arc::new(move || {
        if let Ok(p) = proxy.lock() {
            let _ = p.send_event(UserEvent::Wake);
        }
    }));

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let surface = StreamSurface::new();
    let mut pipeline = Pipeline::new(
        surface.clone(),
        scheduler.frame_listener(),
        &config,
        Arc::clone(&clock),
    );
    pipeline.surface_created(&gpu);
    let size = window.inner_size();
    pipeline.surface_changed(&gpu, Size::new(size.width, size.height));

    let mut recording = Recording::spawn(&config, Arc::clone(&clock))?;

    let (cam_tx, cam_rx) = crossbeam_channel::unbounded();
    let mut camera = open_camera(&config, clock, cam_tx);
    camera.set_surface(surface);
    camera.start()?;

    let mut scale_type = config.camera.scale_type;
    println!("--- camflow camera preview ---");
    println!("C: capture   D: dump raw frame   S: scale type ({scale_type:?})   R: record");

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;

        match event {
            Event::UserEvent(UserEvent::Wake) => window.request_redraw(),
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                WindowEvent::Resized(size) => {
                    gl_surface.resize(&gl_context, nz(size.width), nz(size.height));
                    pipeline.surface_changed(&gpu, Size::new(size.width, size.height));
                    scheduler.request_render();
                }
                WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            state: ElementState::Pressed,
                            virtual_keycode: Some(key),
                            ..
                        },
                    ..
                } => match key {
                    VirtualKeyCode::C => capture_to_disk(&scheduler, config.capture.clone()),
                    VirtualKeyCode::D => camera.dump_image(true),
                    VirtualKeyCode::S => {
                        scale_type = next_scale_type(scale_type);
                        info!(?scale_type, "display scale type");
                        pipeline.set_display_scale_type(scale_type);
                        scheduler.request_render();
                    }
                    VirtualKeyCode::R => recording.toggle(&pipeline, &gl_context, &window),
                    VirtualKeyCode::Escape => *control_flow = ControlFlow::Exit,
                    _ => {}
                },
                _ => {}
            },
            Event::RedrawRequested(_) => {
                drain_camera_events(&cam_rx, &config, &mut pipeline);
                recording.drain_events(&pipeline);
                scheduler.run_pending(&mut pipeline);
                if pipeline.draw_frame(&gpu) {
                    if let Err(e) = gl_surface.swap_buffers(&gl_context) {
                        warn!(error = %e, "swap_buffers failed");
                    }
                }
            }
            Event::LoopDestroyed => {
                camera.close();
                recording.release(&pipeline);
                scheduler.shutdown();
                pipeline.release(&gpu);
                unsafe { gpu.destroy() };
                info!(ticks = pipeline.ticks(), "preview closed");
            }
            _ => {}
        }
    })
}
