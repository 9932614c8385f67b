//! Pass-through filter and the shared "sample the input texture" draw.

use camflow_core::Mat4;

use crate::gpu::{Gpu, QuadDraw, TextureTarget, QUAD_POSITIONS, QUAD_TEX_COORDS};
use crate::shaders;
use crate::stage::{RenderStage, StageCore};

/// Draws the stage's input texture over the whole viewport with the stage's vertex matrix.
/// Returns `false` if the stage has no program or no input yet.
pub fn draw_input(gpu: &dyn Gpu, core: &StageCore) -> bool {
    let (Some(program), Some(texture)) = (core.program(), core.input()) else {
        return false;
    };
    gpu.draw_quad(&QuadDraw {
        program,
        texture,
        target: TextureTarget::Texture2D,
        vertex_matrix: core.vertex_matrix(),
        texture_matrix: &Mat4::IDENTITY,
        positions: &QUAD_POSITIONS,
        tex_coords: &QUAD_TEX_COORDS,
    });
    true
}

/// FBO-backed copy of its input. The base for user filters inserted between the camera
/// import and the watermark.
#[derive(Debug)]
pub struct PassThroughFilter {
    core: StageCore,
}

impl PassThroughFilter {
    pub fn new(name: &'static str) -> Self {
        Self {
            core: StageCore::filter(name, shaders::TEXTURE),
        }
    }
}

impl RenderStage for PassThroughFilter {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn on_draw(&mut self, gpu: &dyn Gpu) {
        draw_input(gpu, &self.core);
    }
}
