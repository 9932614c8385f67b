#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod clock;
pub mod config;
pub mod error;
pub mod geometry;
pub mod stream;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    CameraSettings, CamflowConfig, CaptureSettings, RecordingSettings, VideoType,
    WatermarkSettings,
};
pub use error::EngineError;
pub use geometry::{projection_bounds, projection_matrix, Mat4, OrthoBounds, ScaleType, Size};
pub use stream::{FrameListener, StreamFrame, StreamSurface};
