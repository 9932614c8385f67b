//! Single-shot still capture: renders its input at source resolution and reads it back.

use tracing::info;

use camflow_core::Size;

use crate::filter::draw_input;
use crate::gpu::Gpu;
use crate::shaders;
use crate::stage::{RenderStage, StageCore};

/// Receives tightly packed RGBA8 rows (bottom row first, as read from GL) and their size.
pub type CaptureCallback = Box<dyn FnOnce(&[u8], Size) + Send>;

pub struct CaptureStage {
    core: StageCore,
    pending: Option<CaptureCallback>,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for CaptureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStage")
            .field("core", &self.core)
            .field("armed", &self.pending.is_some())
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

impl Default for CaptureStage {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStage {
    pub fn new() -> Self {
        Self {
            core: StageCore::filter("capture", shaders::TEXTURE),
            pending: None,
            buffer: Vec::new(),
        }
    }

    /// Arms one capture. A capture armed earlier and not yet taken is replaced.
    pub fn arm(&mut self, callback: CaptureCallback) {
        self.pending = Some(callback);
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl RenderStage for CaptureStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn wants_draw(&self) -> bool {
        self.pending.is_some()
    }

    fn on_fbo_allocated(&mut self, _gpu: &dyn Gpu, size: Size) {
        self.buffer = vec![0u8; size.rgba_len()];
    }

    fn on_draw(&mut self, gpu: &dyn Gpu) {
        if !draw_input(gpu, &self.core) {
            return;
        }
        let Some(size) = self.core.fbo().map(|f| f.size) else {
            return;
        };
        gpu.read_pixels(size, &mut self.buffer);
        if let Some(callback) = self.pending.take() {
            info!(%size, "still captured");
            callback(&self.buffer, size);
        }
    }

    fn on_release(&mut self, _gpu: &dyn Gpu) {
        self.pending = None;
        self.buffer = Vec::new();
    }
}
