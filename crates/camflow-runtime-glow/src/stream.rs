//! GL side of a streaming image source: latches the newest [`StreamFrame`] into a texture.

use camflow_core::{EngineError, Mat4, Size, StreamSurface};

use crate::gpu::{Gpu, TextureId, TextureTarget};

#[derive(Debug)]
pub struct StreamTexture {
    surface: StreamSurface,
    texture: Option<TextureId>,
    transform: Mat4,
    image_size: Option<Size>,
    latched: u64,
}

impl StreamTexture {
    pub fn new(surface: StreamSurface) -> Self {
        Self {
            surface,
            texture: None,
            transform: Mat4::IDENTITY,
            image_size: None,
            latched: 0,
        }
    }

    pub fn surface(&self) -> &StreamSurface {
        &self.surface
    }

    /// Creates the external texture the stream is latched into.
    pub fn attach(&mut self, gpu: &dyn Gpu) -> Result<TextureId, EngineError> {
        if let Some(t) = self.texture {
            return Ok(t);
        }
        let t = gpu.create_texture(TextureTarget::ExternalOes)?;
        self.texture = Some(t);
        Ok(t)
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    /// Latches the newest pending frame. Returns `false` when nothing new arrived.
    pub fn update_tex_image(&mut self, gpu: &dyn Gpu) -> bool {
        let Some(texture) = self.texture else {
            return false;
        };
        let Some(frame) = self.surface.take_latest() else {
            return false;
        };
        gpu.upload_rgba(texture, TextureTarget::ExternalOes, frame.size, &frame.rgba);
        self.transform = frame.transform;
        self.image_size = Some(frame.size);
        self.latched += 1;
        true
    }

    /// Texture-coordinate transform of the last latched frame.
    pub fn transform_matrix(&self) -> &Mat4 {
        &self.transform
    }

    /// Size of the last latched frame; `None` until the first frame.
    pub fn image_size(&self) -> Option<Size> {
        self.image_size
    }

    pub fn frames_latched(&self) -> u64 {
        self.latched
    }

    pub fn release(&mut self, gpu: &dyn Gpu) {
        self.surface.release();
        if let Some(t) = self.texture.take() {
            gpu.delete_texture(t);
        }
        self.image_size = None;
    }
}
