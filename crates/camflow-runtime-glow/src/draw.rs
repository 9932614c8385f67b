//! Terminal screen stage: aspect-fits the composed texture into the window.

use tracing::debug;

use camflow_core::{projection_matrix, ScaleType};

use crate::filter::draw_input;
use crate::gpu::Gpu;
use crate::shaders;
use crate::stage::{RenderStage, StageCore};

#[derive(Debug)]
pub struct DrawStage {
    core: StageCore,
    scale_type: ScaleType,
}

impl DrawStage {
    pub fn new(scale_type: ScaleType) -> Self {
        Self {
            core: StageCore::new("draw", shaders::TEXTURE, false),
            scale_type,
        }
    }

    pub fn scale_type(&self) -> ScaleType {
        self.scale_type
    }

    /// The projection is recomputed lazily on the next draw.
    pub fn set_scale_type(&mut self, scale_type: ScaleType) {
        if self.scale_type == scale_type {
            return;
        }
        self.scale_type = scale_type;
        self.core.invalidate_size();
    }
}

impl RenderStage for DrawStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn on_size_changed(&mut self, _gpu: &dyn Gpu) {
        let (data, view) = (self.core.data_size(), self.core.view_size());
        if let Some(m) = projection_matrix(self.scale_type, data, view) {
            debug!(scale = ?self.scale_type, %data, %view, "screen projection updated");
            self.core.set_vertex_matrix(m);
        }
    }

    fn on_draw(&mut self, gpu: &dyn Gpu) {
        gpu.clear([0.0, 0.0, 0.0, 1.0]);
        draw_input(gpu, &self.core);
    }
}
