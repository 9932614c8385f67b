//! camflow runtime (glow/OpenGL backend)
//
// Render stages, the frame orchestrator and the GPU seam they draw through:
// - compile/link stage programs, allocate FBO triples
// - latch streamed camera frames into an external texture
// - run the fixed stage chain and fan the result out to capture, sinks and screen
//
// Windowing and encoder plumbing live in the host and `camflow-record`.
#![allow(clippy::missing_safety_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod capture;
pub mod draw;
pub mod external;
pub mod filter;
pub mod glow_gpu;
pub mod gpu;
pub mod oes;
pub mod pipeline;
pub mod scheduler;
pub mod shaders;
pub mod snapshot;
pub mod stage;
pub mod stream;
pub mod watermark;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use camflow_core::EngineError;

pub use capture::{CaptureCallback, CaptureStage};
pub use draw::DrawStage;
pub use external::{ExternalRender, ExternalSinks, SinkId, SinkState};
pub use filter::{draw_input, PassThroughFilter};
pub use glow_gpu::GlowGpu;
pub use gpu::{
    BlendFunc, FboTriple, FramebufferId, Gpu, ProgramId, QuadDraw, RenderbufferId, TextureId,
    TextureTarget, QUAD_POSITIONS, QUAD_TEX_COORDS,
};
pub use oes::OesStage;
pub use pipeline::{BoxedStage, Pipeline};
pub use scheduler::{GlEvent, RenderScheduler, Waker, Work};
pub use shaders::{ShaderDialect, ShaderSource};
pub use snapshot::{save_capture_png, SavedCapture};
pub use stage::{flip_for_fbo, RenderStage, StageCore, StageState};
pub use stream::StreamTexture;
pub use watermark::{Readout, WatermarkStage};
