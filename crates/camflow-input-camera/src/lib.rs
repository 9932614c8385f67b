//! Camera producers for camflow: frames go into a `StreamSurface`, lifecycle news goes out as
//! [`CameraEvent`]s.
#![deny(missing_debug_implementations)]

pub mod device;
pub mod error;
pub mod pattern;
pub mod webcam;

pub use device::{
    dump_frame, select_preview_size, CameraDevice, CameraEvent, CameraOptions, FrameSource,
    RgbaFrame, SourceOpener, StreamingCamera,
};
pub use error::CameraError;
pub use pattern::{test_pattern_camera, TestPattern};
pub use webcam::{webcam_camera, Webcam};
