//! The GPU seam used by every render stage.
//!
//! Stages never call GL directly; they issue a small set of coarse commands through [`Gpu`].
//! [`crate::GlowGpu`] implements it on top of a `glow::Context`, and the `testing` feature
//! provides a recording fake.

use std::num::NonZeroU32;

use camflow_core::{EngineError, Mat4, Size};

use crate::shaders::{ShaderDialect, ShaderSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderbufferId(pub NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
    /// Hardware stream image (`GL_TEXTURE_EXTERNAL_OES` on GLES hosts).
    ExternalOes,
}

/// Off-screen target: framebuffer + depth renderbuffer + color texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FboTriple {
    pub framebuffer: FramebufferId,
    pub depth: RenderbufferId,
    pub texture: TextureId,
    pub size: Size,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlendFunc {
    pub src: u32,
    pub dst: u32,
}

impl BlendFunc {
    /// Overlay blend used for watermark glyphs.
    pub const SRC_COLOR_DST_ALPHA: BlendFunc = BlendFunc {
        src: glow::SRC_COLOR,
        dst: glow::DST_ALPHA,
    };
}

/// One textured quad, drawn as a triangle fan.
#[derive(Debug)]
pub struct QuadDraw<'a> {
    pub program: ProgramId,
    pub texture: TextureId,
    pub target: TextureTarget,
    pub vertex_matrix: &'a Mat4,
    pub texture_matrix: &'a Mat4,
    pub positions: &'a [f32; 8],
    pub tex_coords: &'a [f32; 8],
}

/// Quad covering clip space, ordered for `TRIANGLE_FAN`.
#[rustfmt::skip]
pub const QUAD_POSITIONS: [f32; 8] = [
    -1.0,  1.0,
    -1.0, -1.0,
     1.0, -1.0,
     1.0,  1.0,
];

/// Texture coordinates matching [`QUAD_POSITIONS`] with row 0 at the top.
#[rustfmt::skip]
pub const QUAD_TEX_COORDS: [f32; 8] = [
    0.0, 0.0,
    0.0, 1.0,
    1.0, 1.0,
    1.0, 0.0,
];

pub trait Gpu {
    fn dialect(&self) -> ShaderDialect;

    fn compile_program(&self, src: &ShaderSource) -> Result<ProgramId, EngineError>;
    fn delete_program(&self, program: ProgramId);

    fn create_texture(&self, target: TextureTarget) -> Result<TextureId, EngineError>;
    /// (Re)specifies texture storage from tightly packed RGBA8.
    fn upload_rgba(&self, texture: TextureId, target: TextureTarget, size: Size, rgba: &[u8]);
    fn delete_texture(&self, texture: TextureId);

    fn create_fbo_triple(&self, size: Size) -> Result<FboTriple, EngineError>;
    fn delete_fbo_triple(&self, fbo: &FboTriple);

    /// `None` binds the default (window or encoder) surface.
    fn bind_framebuffer(&self, fbo: Option<FramebufferId>);
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn clear(&self, rgba: [f32; 4]);
    fn draw_quad(&self, draw: &QuadDraw<'_>);

    fn set_blend(&self, blend: Option<BlendFunc>);
    fn depth_test_enabled(&self) -> bool;
    fn set_depth_test(&self, enabled: bool);

    /// Reads `size` pixels from the bound framebuffer's origin into `out` (RGBA8).
    fn read_pixels(&self, size: Size, out: &mut [u8]);
}
