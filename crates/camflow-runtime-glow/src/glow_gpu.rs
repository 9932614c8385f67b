//! `glow` implementation of the [`Gpu`] seam.
#![allow(clippy::missing_safety_doc)]

use glow::HasContext;

use camflow_core::{EngineError, Size};

use crate::gpu::{
    BlendFunc, FboTriple, FramebufferId, Gpu, ProgramId, QuadDraw, RenderbufferId, TextureId,
    TextureTarget,
};
use crate::shaders::{ShaderDialect, ShaderSource};

/// `GL_TEXTURE_EXTERNAL_OES` (OES_EGL_image_external).
pub const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

/// Owns a `glow::Context` plus the streaming quad buffers every stage draws through.
///
/// The context must stay current on the thread that created the `GlowGpu` for as long as it
/// is used. A recording bridge creates its own `GlowGpu` on its own shared context.
pub struct GlowGpu {
    gl: glow::Context,
    dialect: ShaderDialect,
    quad_vao: glow::NativeVertexArray,
    quad_vbo: glow::NativeBuffer,
}

impl std::fmt::Debug for GlowGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowGpu")
            .field("dialect", &self.dialect)
            .field("quad_vao", &self.quad_vao)
            .field("quad_vbo", &self.quad_vbo)
            .finish()
    }
}

impl GlowGpu {
    /// The context behind `gl` must be current on the calling thread.
    pub unsafe fn new(gl: glow::Context, dialect: ShaderDialect) -> Result<Self, EngineError> {
        let quad_vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let quad_vbo = match gl.create_buffer() {
            Ok(b) => b,
            Err(e) => {
                gl.delete_vertex_array(quad_vao);
                return Err(EngineError::GlCreate(format!("create_buffer: {e}")));
            }
        };

        gl.bind_vertex_array(Some(quad_vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(quad_vbo));
        // 4 vertices * (xy + uv)
        gl.buffer_data_size(glow::ARRAY_BUFFER, 16 * 4, glow::DYNAMIC_DRAW);

        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * 4, 0);

        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * 4, 2 * 4);

        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(Self {
            gl,
            dialect,
            quad_vao,
            quad_vbo,
        })
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub unsafe fn destroy(&mut self) {
        self.gl.delete_vertex_array(self.quad_vao);
        self.gl.delete_buffer(self.quad_vbo);
    }

    fn gl_target(&self, target: TextureTarget) -> u32 {
        match (target, self.dialect) {
            (TextureTarget::ExternalOes, ShaderDialect::Essl300) => TEXTURE_EXTERNAL_OES,
            _ => glow::TEXTURE_2D,
        }
    }
}

fn tex(id: TextureId) -> glow::NativeTexture {
    glow::NativeTexture(id.0)
}

fn program(id: ProgramId) -> glow::NativeProgram {
    glow::NativeProgram(id.0)
}

pub unsafe fn compile_program(
    gl: &glow::Context,
    vert_src: &str,
    frag_src: &str,
) -> Result<glow::NativeProgram, EngineError> {
    let vs = gl
        .create_shader(glow::VERTEX_SHADER)
        .map_err(|e| EngineError::GlCreate(format!("create_shader(VS) failed: {e:?}")))?;
    gl.shader_source(vs, vert_src);
    gl.compile_shader(vs);
    if !gl.get_shader_compile_status(vs) {
        let log = gl.get_shader_info_log(vs);
        gl.delete_shader(vs);
        return Err(EngineError::VertexCompile(log));
    }

    let fs = gl
        .create_shader(glow::FRAGMENT_SHADER)
        .map_err(|e| EngineError::GlCreate(format!("create_shader(FS) failed: {e:?}")))?;
    gl.shader_source(fs, frag_src);
    gl.compile_shader(fs);
    if !gl.get_shader_compile_status(fs) {
        let log = gl.get_shader_info_log(fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
        return Err(EngineError::FragmentCompile(log));
    }

    let program = gl
        .create_program()
        .map_err(|e| EngineError::GlCreate(format!("create_program failed: {e:?}")))?;
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.link_program(program);

    gl.detach_shader(program, vs);
    gl.detach_shader(program, fs);
    gl.delete_shader(vs);
    gl.delete_shader(fs);

    if !gl.get_program_link_status(program) {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(EngineError::Link(log));
    }

    Ok(program)
}

/// Allocates framebuffer + DEPTH_COMPONENT16 renderbuffer + RGBA color texture.
pub unsafe fn create_fbo_triple(gl: &glow::Context, size: Size) -> Result<FboTriple, EngineError> {
    let w = size.width.max(1) as i32;
    let h = size.height.max(1) as i32;

    let fbo = gl
        .create_framebuffer()
        .map_err(|e| EngineError::GlCreate(format!("create_framebuffer failed: {e:?}")))?;
    let depth = match gl.create_renderbuffer() {
        Ok(rb) => rb,
        Err(e) => {
            gl.delete_framebuffer(fbo);
            return Err(EngineError::GlCreate(format!("create_renderbuffer failed: {e:?}")));
        }
    };
    let color = match gl.create_texture() {
        Ok(t) => t,
        Err(e) => {
            gl.delete_renderbuffer(depth);
            gl.delete_framebuffer(fbo);
            return Err(EngineError::GlCreate(format!("create_texture failed: {e:?}")));
        }
    };

    gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));

    gl.bind_renderbuffer(glow::RENDERBUFFER, Some(depth));
    gl.renderbuffer_storage(glow::RENDERBUFFER, glow::DEPTH_COMPONENT16, w, h);
    gl.framebuffer_renderbuffer(
        glow::FRAMEBUFFER,
        glow::DEPTH_ATTACHMENT,
        glow::RENDERBUFFER,
        Some(depth),
    );

    gl.bind_texture(glow::TEXTURE_2D, Some(color));
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_MIN_FILTER,
        glow::NEAREST as i32,
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_MAG_FILTER,
        glow::LINEAR as i32,
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_WRAP_S,
        glow::CLAMP_TO_EDGE as i32,
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_WRAP_T,
        glow::CLAMP_TO_EDGE as i32,
    );
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        glow::RGBA as i32,
        w,
        h,
        0,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        None,
    );
    gl.framebuffer_texture_2d(
        glow::FRAMEBUFFER,
        glow::COLOR_ATTACHMENT0,
        glow::TEXTURE_2D,
        Some(color),
        0,
    );

    let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    gl.bind_renderbuffer(glow::RENDERBUFFER, None);
    gl.bind_texture(glow::TEXTURE_2D, None);

    if status != glow::FRAMEBUFFER_COMPLETE {
        gl.delete_framebuffer(fbo);
        gl.delete_renderbuffer(depth);
        gl.delete_texture(color);
        return Err(EngineError::GlCreate(format!(
            "framebuffer incomplete: 0x{status:x}"
        )));
    }

    Ok(FboTriple {
        framebuffer: FramebufferId(fbo.0),
        depth: RenderbufferId(depth.0),
        texture: TextureId(color.0),
        size: Size::new(w as u32, h as u32),
    })
}

impl Gpu for GlowGpu {
    fn dialect(&self) -> ShaderDialect {
        self.dialect
    }

    fn compile_program(&self, src: &ShaderSource) -> Result<ProgramId, EngineError> {
        let p = unsafe { compile_program(&self.gl, &src.vert, &src.frag)? };
        Ok(ProgramId(p.0))
    }

    fn delete_program(&self, p: ProgramId) {
        unsafe { self.gl.delete_program(program(p)) }
    }

    fn create_texture(&self, target: TextureTarget) -> Result<TextureId, EngineError> {
        let gl_target = self.gl_target(target);
        unsafe {
            let t = self
                .gl
                .create_texture()
                .map_err(|e| EngineError::GlCreate(format!("create_texture failed: {e:?}")))?;
            self.gl.bind_texture(gl_target, Some(t));
            self.gl
                .tex_parameter_i32(gl_target, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            self.gl
                .tex_parameter_i32(gl_target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            self.gl
                .tex_parameter_i32(gl_target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            self.gl
                .tex_parameter_i32(gl_target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            self.gl.bind_texture(gl_target, None);
            Ok(TextureId(t.0))
        }
    }

    fn upload_rgba(&self, texture: TextureId, target: TextureTarget, size: Size, rgba: &[u8]) {
        let gl_target = self.gl_target(target);
        if gl_target == TEXTURE_EXTERNAL_OES {
            // External images are attached by the platform, not uploaded.
            tracing::trace!("ignoring rgba upload into external texture");
            return;
        }
        if rgba.len() < size.rgba_len() {
            tracing::warn!(
                expected = size.rgba_len(),
                got = rgba.len(),
                "short rgba upload ignored"
            );
            return;
        }
        unsafe {
            self.gl.bind_texture(gl_target, Some(tex(texture)));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                gl_target,
                0,
                glow::RGBA8 as i32,
                size.width as i32,
                size.height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                Some(&rgba[..size.rgba_len()]),
            );
            self.gl.bind_texture(gl_target, None);
        }
    }

    fn delete_texture(&self, texture: TextureId) {
        unsafe { self.gl.delete_texture(tex(texture)) }
    }

    fn create_fbo_triple(&self, size: Size) -> Result<FboTriple, EngineError> {
        unsafe { create_fbo_triple(&self.gl, size) }
    }

    fn delete_fbo_triple(&self, fbo: &FboTriple) {
        unsafe {
            self.gl
                .delete_framebuffer(glow::NativeFramebuffer(fbo.framebuffer.0));
            self.gl
                .delete_renderbuffer(glow::NativeRenderbuffer(fbo.depth.0));
            self.gl.delete_texture(tex(fbo.texture));
        }
    }

    fn bind_framebuffer(&self, fbo: Option<FramebufferId>) {
        unsafe {
            self.gl.bind_framebuffer(
                glow::FRAMEBUFFER,
                fbo.map(|f| glow::NativeFramebuffer(f.0)),
            )
        }
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.viewport(x, y, width, height) }
    }

    fn clear(&self, rgba: [f32; 4]) {
        unsafe {
            self.gl.clear_color(rgba[0], rgba[1], rgba[2], rgba[3]);
            self.gl
                .clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
    }

    fn draw_quad(&self, draw: &QuadDraw<'_>) {
        let mut verts = [0.0f32; 16];
        for i in 0..4 {
            verts[i * 4] = draw.positions[i * 2];
            verts[i * 4 + 1] = draw.positions[i * 2 + 1];
            verts[i * 4 + 2] = draw.tex_coords[i * 2];
            verts[i * 4 + 3] = draw.tex_coords[i * 2 + 1];
        }

        let gl = &self.gl;
        let prog = program(draw.program);
        let gl_target = self.gl_target(draw.target);
        unsafe {
            gl.use_program(Some(prog));

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.quad_vbo));
            gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, 0, bytemuck::cast_slice(&verts));
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            if let Some(loc) = gl.get_uniform_location(prog, "u_Matrix") {
                gl.uniform_matrix_4_f32_slice(Some(&loc), false, draw.vertex_matrix.as_slice());
            }
            if let Some(loc) = gl.get_uniform_location(prog, "u_TexMatrix") {
                gl.uniform_matrix_4_f32_slice(Some(&loc), false, draw.texture_matrix.as_slice());
            }

            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(gl_target, Some(tex(draw.texture)));
            if let Some(loc) = gl.get_uniform_location(prog, "s_Texture") {
                gl.uniform_1_i32(Some(&loc), 0);
            }

            gl.bind_vertex_array(Some(self.quad_vao));
            gl.draw_arrays(glow::TRIANGLE_FAN, 0, 4);
            gl.bind_vertex_array(None);

            gl.bind_texture(gl_target, None);
            gl.use_program(None);
        }
    }

    fn set_blend(&self, blend: Option<BlendFunc>) {
        unsafe {
            match blend {
                Some(b) => {
                    self.gl.enable(glow::BLEND);
                    self.gl.blend_func(b.src, b.dst);
                }
                None => self.gl.disable(glow::BLEND),
            }
        }
    }

    fn depth_test_enabled(&self) -> bool {
        unsafe { self.gl.is_enabled(glow::DEPTH_TEST) }
    }

    fn set_depth_test(&self, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(glow::DEPTH_TEST);
            } else {
                self.gl.disable(glow::DEPTH_TEST);
            }
        }
    }

    fn read_pixels(&self, size: Size, out: &mut [u8]) {
        let len = size.rgba_len();
        if out.len() < len {
            tracing::warn!(expected = len, got = out.len(), "read_pixels buffer too small");
            return;
        }
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                0,
                0,
                size.width as i32,
                size.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(&mut out[..len]),
            );
        }
    }
}
