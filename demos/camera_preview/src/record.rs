//! Recording from the preview window.
//!
//! The bridge thread gets its own GL context created with sharing against the preview
//! context, so the composed texture name is valid there. It draws into a pbuffer of the
//! recording size and reads frames back for the raw encoder.

use std::ffi::CStr;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use glutin::config::GetGlConfig;
use glutin::context::{
    ContextAttributesBuilder, NotCurrentContext, NotCurrentGlContextSurfaceAccessor,
    PossiblyCurrentContext,
};
use glutin::display::{Display, GetGlDisplay};
use glutin::prelude::GlDisplay;
use glutin::surface::{PbufferSurface, Surface, SurfaceAttributesBuilder};
use raw_window_handle::RawWindowHandle;
use tracing::{debug, info};

use camflow_core::Size;
use camflow_record::{
    RawBackend, RawFrameSink, ReadbackTarget, RecordError, RecordTarget, RecordTargetFactory,
};
use camflow_runtime_glow::{GlowGpu, ShaderDialect, TextureId};

/// Holds the shared context prepared on the GL thread until the bridge thread claims it.
pub type ContextSlot = Arc<Mutex<Option<NotCurrentContext>>>;

fn nz(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v.max(1)).unwrap_or(NonZeroU32::MIN)
}

fn target_err(e: impl std::fmt::Display) -> RecordError {
    RecordError::Target(e.to_string())
}

/// Creates a context sharing texture names with `main`. Call on the GL thread before
/// `Recorder::prepare`.
pub fn create_shared_context(
    display: &Display,
    main: &PossiblyCurrentContext,
    window: RawWindowHandle,
    slot: &ContextSlot,
) -> anyhow::Result<()> {
    let attrs = ContextAttributesBuilder::new()
        .with_sharing(main)
        .build(Some(window));
    let context = unsafe { display.create_context(&main.config(), &attrs) }
        .map_err(|e| anyhow!("shared gl context: {e}"))?;
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(context);
    debug!("shared record context created");
    Ok(())
}

/// Media backend for the demo: raw frames in a framed file, targets on a shared context.
pub fn backend(slot: ContextSlot) -> RawBackend {
    RawBackend::new(Box::new(move |sink: RawFrameSink| {
        Box::new(SharedContextFactory {
            slot: Arc::clone(&slot),
            sink,
        }) as Box<dyn RecordTargetFactory>
    }))
    .with_queue_depth(8)
}

struct SharedContextFactory {
    slot: ContextSlot,
    sink: RawFrameSink,
}

impl RecordTargetFactory for SharedContextFactory {
    fn create(&mut self, size: Size) -> Result<Box<dyn RecordTarget>, RecordError> {
        let context = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| RecordError::Target("no shared context prepared".into()))?;

        let display = context.display();
        let config = context.config();
        let attrs = SurfaceAttributesBuilder::<PbufferSurface>::new()
            .build(nz(size.width), nz(size.height));
        let surface = unsafe { display.create_pbuffer_surface(&config, &attrs) }.map_err(target_err)?;
        let context = context.make_current(&surface).map_err(target_err)?;

        let gl = unsafe {
            glow::Context::from_loader_function(|s| {
                display.get_proc_address(CStr::from_bytes_with_nul_unchecked(
                    format!("{s}\0").as_bytes(),
                )) as *const _
            })
        };
        let gpu = unsafe { GlowGpu::new(gl, ShaderDialect::Glsl330) }?;
        let readback = ReadbackTarget::new(gpu, size, self.sink.clone())?;
        info!(%size, "record target bound to shared context");
        Ok(Box::new(SharedContextTarget {
            readback,
            _surface: surface,
            _context: context,
        }))
    }
}

/// Field order matters: GL objects go before the context that owns them.
struct SharedContextTarget {
    readback: ReadbackTarget<GlowGpu>,
    _surface: Surface<PbufferSurface>,
    _context: PossiblyCurrentContext,
}

impl RecordTarget for SharedContextTarget {
    fn draw_texture(&mut self, texture: TextureId) -> Result<(), RecordError> {
        self.readback.draw_texture(texture)
    }

    fn release(&mut self) {
        self.readback.release();
    }
}
