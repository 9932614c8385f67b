//! Camera import stage: samples the stream texture into an FBO at source resolution.

use camflow_core::{EngineError, FrameListener, StreamSurface};

use crate::gpu::{Gpu, QuadDraw, TextureTarget, QUAD_POSITIONS, QUAD_TEX_COORDS};
use crate::shaders;
use crate::stage::{RenderStage, StageCore};
use crate::stream::StreamTexture;

/// Texture coordinates used when the host window is landscape (sensor rotated a quarter turn).
#[rustfmt::skip]
pub const LANDSCAPE_TEX_COORDS: [f32; 8] = [
    0.0, 1.0,
    1.0, 1.0,
    1.0, 0.0,
    0.0, 0.0,
];

pub struct OesStage {
    core: StageCore,
    stream: StreamTexture,
    on_frame_available: FrameListener,
    landscape: bool,
}

impl std::fmt::Debug for OesStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OesStage")
            .field("core", &self.core)
            .field("stream", &self.stream)
            .field("landscape", &self.landscape)
            .finish()
    }
}

impl OesStage {
    /// `on_frame_available` runs on the producer thread; it should only request a render.
    pub fn new(surface: StreamSurface, on_frame_available: FrameListener) -> Self {
        Self {
            core: StageCore::new("oes", shaders::OES, true),
            stream: StreamTexture::new(surface),
            on_frame_available,
            landscape: false,
        }
    }

    pub fn set_landscape(&mut self, landscape: bool) {
        self.landscape = landscape;
    }

    pub fn surface(&self) -> &StreamSurface {
        self.stream.surface()
    }

    pub fn stream(&self) -> &StreamTexture {
        &self.stream
    }
}

impl RenderStage for OesStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn on_create(&mut self, gpu: &dyn Gpu) -> Result<(), EngineError> {
        self.stream.attach(gpu)?;
        self.stream
            .surface()
            .set_frame_listener(self.on_frame_available.clone());
        Ok(())
    }

    fn on_draw(&mut self, gpu: &dyn Gpu) {
        self.stream.update_tex_image(gpu);
        gpu.clear([0.0, 0.0, 0.0, 1.0]);

        let (Some(program), Some(texture)) = (self.core.program(), self.stream.texture()) else {
            return;
        };
        if self.stream.image_size().is_none() {
            return;
        }
        gpu.draw_quad(&QuadDraw {
            program,
            texture,
            target: TextureTarget::ExternalOes,
            vertex_matrix: self.core.vertex_matrix(),
            texture_matrix: self.stream.transform_matrix(),
            positions: &QUAD_POSITIONS,
            tex_coords: if self.landscape {
                &LANDSCAPE_TEX_COORDS
            } else {
                &QUAD_TEX_COORDS
            },
        });
    }

    fn on_release(&mut self, gpu: &dyn Gpu) {
        self.stream.release(gpu);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use camflow_core::{Mat4, Size, StreamFrame};

    use super::*;
    use crate::testing::{FakeGpu, GpuCall};

    #[test]
    fn import_stage_renders_unflipped_into_its_fbo() {
        let gpu = FakeGpu::new();
        let surface = StreamSurface::new();
        let mut oes = OesStage::new(surface.clone(), Arc::new(|| {}));
        oes.set_data_size(Size::new(4, 4));
        assert!(oes.create(&gpu));
        assert!(oes.core().is_fbo_backed());
        assert!(!oes.core().is_flipped());
        assert_eq!(oes.core().vertex_matrix().0[5], 1.0);

        oes.prepare(&gpu, Size::new(4, 4));
        surface.push_frame(StreamFrame {
            size: Size::new(4, 4),
            rgba: vec![0; 64],
            transform: Mat4::IDENTITY,
            timestamp_us: 0,
        });
        gpu.take_calls();
        oes.draw(&gpu);
        let m5: Vec<f32> = gpu
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                GpuCall::DrawQuad { vertex_matrix, .. } => Some(vertex_matrix.0[5]),
                _ => None,
            })
            .collect();
        assert_eq!(m5, vec![1.0]);
    }
}
