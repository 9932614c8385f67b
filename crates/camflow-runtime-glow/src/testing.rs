//! Recording [`Gpu`] for tests: every command is appended to a call log and object names are
//! handed out from a counter.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::num::NonZeroU32;

use camflow_core::{EngineError, Mat4, Size};

use crate::gpu::{
    BlendFunc, FboTriple, FramebufferId, Gpu, ProgramId, QuadDraw, RenderbufferId, TextureId,
    TextureTarget,
};
use crate::shaders::{ShaderDialect, ShaderSource};

#[derive(Clone, Debug, PartialEq)]
pub enum GpuCall {
    CompileProgram(String),
    DeleteProgram(ProgramId),
    CreateTexture(TextureTarget),
    UploadRgba { texture: TextureId, size: Size },
    DeleteTexture(TextureId),
    CreateFboTriple(Size),
    DeleteFboTriple(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    Viewport(i32, i32, i32, i32),
    Clear,
    DrawQuad {
        program: ProgramId,
        texture: TextureId,
        vertex_matrix: Mat4,
        texture_matrix: Mat4,
        tex_coords: [f32; 8],
    },
    SetBlend(Option<BlendFunc>),
    SetDepthTest(bool),
    ReadPixels(Size),
}

#[derive(Debug)]
pub struct FakeGpu {
    dialect: ShaderDialect,
    calls: RefCell<Vec<GpuCall>>,
    next_name: Cell<u32>,
    failing_programs: RefCell<HashSet<String>>,
    fail_fbo: Cell<bool>,
    depth_test: Cell<bool>,
    fill: Cell<u8>,
}

impl Default for FakeGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGpu {
    pub fn new() -> Self {
        Self {
            dialect: ShaderDialect::Glsl330,
            calls: RefCell::new(Vec::new()),
            next_name: Cell::new(1),
            failing_programs: RefCell::new(HashSet::new()),
            fail_fbo: Cell::new(false),
            depth_test: Cell::new(false),
            fill: Cell::new(0xAB),
        }
    }

    pub fn with_dialect(dialect: ShaderDialect) -> Self {
        Self {
            dialect,
            ..Self::new()
        }
    }

    /// Programs built from the named shader fail to link.
    pub fn fail_program(&self, shader_name: &str) {
        self.failing_programs
            .borrow_mut()
            .insert(shader_name.to_string());
    }

    pub fn fail_fbo_allocation(&self, fail: bool) {
        self.fail_fbo.set(fail);
    }

    pub fn set_depth_test_state(&self, enabled: bool) {
        self.depth_test.set(enabled);
    }

    /// Byte written by `read_pixels`.
    pub fn set_read_fill(&self, byte: u8) {
        self.fill.set(byte);
    }

    pub fn calls(&self) -> Vec<GpuCall> {
        self.calls.borrow().clone()
    }

    pub fn take_calls(&self) -> Vec<GpuCall> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    pub fn count(&self, pred: impl Fn(&GpuCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    /// Textures sampled by `DrawQuad`, in order.
    pub fn drawn_textures(&self) -> Vec<TextureId> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                GpuCall::DrawQuad { texture, .. } => Some(*texture),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: GpuCall) {
        self.calls.borrow_mut().push(call);
    }

    fn name(&self) -> NonZeroU32 {
        let n = self.next_name.get();
        self.next_name.set(n + 1);
        NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
    }
}

impl Gpu for FakeGpu {
    fn dialect(&self) -> ShaderDialect {
        self.dialect
    }

    fn compile_program(&self, src: &ShaderSource) -> Result<ProgramId, EngineError> {
        self.push(GpuCall::CompileProgram(src.origin.clone()));
        if self.failing_programs.borrow().contains(&src.origin) {
            return Err(EngineError::Link(format!("{}: forced link failure", src.origin)));
        }
        Ok(ProgramId(self.name()))
    }

    fn delete_program(&self, program: ProgramId) {
        self.push(GpuCall::DeleteProgram(program));
    }

    fn create_texture(&self, target: TextureTarget) -> Result<TextureId, EngineError> {
        self.push(GpuCall::CreateTexture(target));
        Ok(TextureId(self.name()))
    }

    fn upload_rgba(&self, texture: TextureId, _target: TextureTarget, size: Size, _rgba: &[u8]) {
        self.push(GpuCall::UploadRgba { texture, size });
    }

    fn delete_texture(&self, texture: TextureId) {
        self.push(GpuCall::DeleteTexture(texture));
    }

    fn create_fbo_triple(&self, size: Size) -> Result<FboTriple, EngineError> {
        self.push(GpuCall::CreateFboTriple(size));
        if self.fail_fbo.get() {
            return Err(EngineError::GlCreate("framebuffer incomplete: forced".into()));
        }
        Ok(FboTriple {
            framebuffer: FramebufferId(self.name()),
            depth: RenderbufferId(self.name()),
            texture: TextureId(self.name()),
            size,
        })
    }

    fn delete_fbo_triple(&self, fbo: &FboTriple) {
        self.push(GpuCall::DeleteFboTriple(fbo.framebuffer));
    }

    fn bind_framebuffer(&self, fbo: Option<FramebufferId>) {
        self.push(GpuCall::BindFramebuffer(fbo));
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.push(GpuCall::Viewport(x, y, width, height));
    }

    fn clear(&self, _rgba: [f32; 4]) {
        self.push(GpuCall::Clear);
    }

    fn draw_quad(&self, draw: &QuadDraw<'_>) {
        self.push(GpuCall::DrawQuad {
            program: draw.program,
            texture: draw.texture,
            vertex_matrix: *draw.vertex_matrix,
            texture_matrix: *draw.texture_matrix,
            tex_coords: *draw.tex_coords,
        });
    }

    fn set_blend(&self, blend: Option<BlendFunc>) {
        self.push(GpuCall::SetBlend(blend));
    }

    fn depth_test_enabled(&self) -> bool {
        self.depth_test.get()
    }

    fn set_depth_test(&self, enabled: bool) {
        self.depth_test.set(enabled);
        self.push(GpuCall::SetDepthTest(enabled));
    }

    fn read_pixels(&self, size: Size, out: &mut [u8]) {
        self.push(GpuCall::ReadPixels(size));
        let len = size.rgba_len().min(out.len());
        out[..len].fill(self.fill.get());
    }
}
