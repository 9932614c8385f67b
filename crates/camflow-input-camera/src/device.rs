//! Producer side of the camera: a capture thread that pulls frames from a [`FrameSource`] and
//! publishes them into the pipeline's [`StreamSurface`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use camflow_core::{CameraSettings, CaptureSettings, Clock, Mat4, Size, StreamFrame, StreamSurface};

use crate::error::CameraError;

#[derive(Clone, Debug)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>, // RGBA8
}

impl RgbaFrame {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// A frame producer living on the capture thread. Need not be `Send`.
pub trait FrameSource {
    /// Preview sizes the producer can deliver.
    fn supported_sizes(&self) -> Vec<Size>;

    fn set_size(&mut self, size: Size) -> Result<(), CameraError>;

    /// Next frame, blocking at most about one frame interval. `None` when nothing arrived.
    fn next_frame(&mut self) -> Result<Option<RgbaFrame>, CameraError>;
}

/// Opens a source on the capture thread.
pub type SourceOpener =
    Arc<dyn Fn(&CameraOptions) -> Result<Box<dyn FrameSource>, CameraError> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraEvent {
    /// Capture is running at this preview size.
    Prepared(Size),
    Error(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraOptions {
    pub preview: Size,
    pub fps: u32,
    /// Where `dump_image` writes frames.
    pub dump_dir: PathBuf,
}

impl CameraOptions {
    pub fn from_settings(camera: &CameraSettings, capture: &CaptureSettings) -> Self {
        Self {
            preview: camera.requested_size(),
            fps: camera.fps.max(1),
            dump_dir: capture.output_dir.clone(),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }
}

/// Exact match only.
pub fn select_preview_size(requested: Size, supported: &[Size]) -> Option<Size> {
    supported.iter().copied().find(|s| *s == requested)
}

pub trait CameraDevice: Send {
    /// Surface frames are published to. Takes effect on the next `start`.
    fn set_surface(&mut self, surface: StreamSurface);

    /// Opens the producer on its capture thread. The outcome arrives as a [`CameraEvent`].
    fn start(&mut self) -> Result<(), CameraError>;

    /// Stops capture and joins the capture thread.
    fn close(&mut self);

    /// When set, the next delivered frame is also saved as a PNG.
    fn dump_image(&mut self, dump: bool);
}

/// [`CameraDevice`] over any [`FrameSource`].
pub struct StreamingCamera {
    name: &'static str,
    options: CameraOptions,
    opener: SourceOpener,
    clock: Arc<dyn Clock>,
    events: Sender<CameraEvent>,
    surface: Option<StreamSurface>,
    dump: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StreamingCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingCamera")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl StreamingCamera {
    pub fn new(
        name: &'static str,
        options: CameraOptions,
        opener: SourceOpener,
        clock: Arc<dyn Clock>,
        events: Sender<CameraEvent>,
    ) -> Self {
        Self {
            name,
            options,
            opener,
            clock,
            events,
            surface: None,
            dump: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn options(&self) -> &CameraOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl CameraDevice for StreamingCamera {
    fn set_surface(&mut self, surface: StreamSurface) {
        self.surface = Some(surface);
    }

    fn start(&mut self) -> Result<(), CameraError> {
        if self.worker.is_some() {
            debug!(camera = self.name, "start ignored; already running");
            return Ok(());
        }
        let surface = self.surface.clone().ok_or(CameraError::NoSurface)?;
        self.stop.store(false, Ordering::SeqCst);

        let capture = Capture {
            camera: self.name,
            options: self.options.clone(),
            opener: Arc::clone(&self.opener),
            clock: Arc::clone(&self.clock),
            events: self.events.clone(),
            surface,
            dump: Arc::clone(&self.dump),
            stop: Arc::clone(&self.stop),
        };
        let name = "camflow-camera";
        let worker = thread::Builder::new()
            .name(name.into())
            .spawn(move || capture.run())
            .map_err(|source| CameraError::Spawn { name, source })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!(camera = self.name, "capture thread panicked");
            }
            info!(camera = self.name, "camera closed");
        }
    }

    fn dump_image(&mut self, dump: bool) {
        self.dump.store(dump, Ordering::SeqCst);
    }
}

impl Drop for StreamingCamera {
    fn drop(&mut self) {
        self.close();
    }
}

struct Capture {
    camera: &'static str,
    options: CameraOptions,
    opener: SourceOpener,
    clock: Arc<dyn Clock>,
    events: Sender<CameraEvent>,
    surface: StreamSurface,
    dump: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl Capture {
    fn emit(&self, event: CameraEvent) {
        let _ = self.events.send(event);
    }

    fn run(self) {
        let mut source = match self.open() {
            Ok(s) => s,
            Err(e) => {
                warn!(camera = self.camera, error = %e, "camera failed to open");
                self.emit(CameraEvent::Error(e.to_string()));
                return;
            }
        };
        info!(camera = self.camera, size = %self.options.preview, fps = self.options.fps, "camera prepared");
        self.emit(CameraEvent::Prepared(self.options.preview));

        while !self.stop.load(Ordering::SeqCst) {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    if !self.publish(frame) {
                        debug!(camera = self.camera, "surface released; capture ends");
                        break;
                    }
                }
                Ok(None) => thread::sleep(Duration::from_millis(1)),
                Err(e) => {
                    warn!(camera = self.camera, error = %e, "frame read failed");
                    self.emit(CameraEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    }

    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let mut source = (self.opener)(&self.options)?;
        let requested = self.options.preview;
        let Some(size) = select_preview_size(requested, &source.supported_sizes()) else {
            warn!(camera = self.camera, %requested, "no exact preview size match");
            return Err(CameraError::UnsupportedSize);
        };
        source.set_size(size)?;
        Ok(source)
    }

    fn publish(&self, frame: RgbaFrame) -> bool {
        let timestamp_us = self.clock.now_us();
        if self.dump.swap(false, Ordering::SeqCst) {
            match dump_frame(&frame, &self.options.dump_dir, timestamp_us) {
                Ok(path) => info!(camera = self.camera, path = %path.display(), "frame dumped"),
                Err(e) => error!(camera = self.camera, error = %e, "frame dump failed"),
            }
        }
        self.surface.push_frame(StreamFrame {
            size: frame.size(),
            rgba: frame.bytes,
            transform: Mat4::IDENTITY,
            timestamp_us,
        })
    }
}

/// Writes `frame` as `<dir>/dump_<timestamp_us>.png`.
pub fn dump_frame(frame: &RgbaFrame, dir: &Path, timestamp_us: u64) -> Result<PathBuf, CameraError> {
    let path = dir.join(format!("dump_{timestamp_us}.png"));
    let dump_err = |message: String| CameraError::Dump {
        path: path.clone(),
        message,
    };
    std::fs::create_dir_all(dir).map_err(|e| dump_err(e.to_string()))?;
    let img = image::RgbaImage::from_raw(frame.width, frame.height, frame.bytes.clone())
        .ok_or_else(|| dump_err(format!("buffer does not match {}", frame.size())))?;
    img.save(&path).map_err(|e| dump_err(e.to_string()))?;
    Ok(path)
}
