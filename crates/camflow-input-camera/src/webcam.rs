//! Webcam producer via `nokhwa` (feature `native`).

use std::sync::Arc;

use crossbeam_channel::Sender;

use camflow_core::{Clock, Size};

use crate::device::{CameraEvent, CameraOptions, FrameSource, RgbaFrame, StreamingCamera};
use crate::error::CameraError;

pub struct Webcam {
    #[cfg(feature = "native")]
    cam: nokhwa::Camera,
}

impl std::fmt::Debug for Webcam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webcam").finish_non_exhaustive()
    }
}

impl Webcam {
    /// Opens webcam `index` and starts its stream.
    pub fn open(index: u32) -> Result<Self, CameraError> {
        #[cfg(not(feature = "native"))]
        {
            let _ = index;
            Err(CameraError::NotEnabled)
        }

        #[cfg(feature = "native")]
        {
            use nokhwa::{
                pixel_format::RgbFormat,
                utils::{CameraIndex, RequestedFormat, RequestedFormatType},
                Camera,
            };

            let requested =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
            let mut cam = Camera::new(CameraIndex::Index(index), requested)
                .map_err(|e| CameraError::Backend(e.to_string()))?;
            cam.open_stream()
                .map_err(|e| CameraError::Backend(e.to_string()))?;
            Ok(Self { cam })
        }
    }
}

impl FrameSource for Webcam {
    /// The resolution the device is streaming at; `set_size` may change it.
    fn supported_sizes(&self) -> Vec<Size> {
        #[cfg(not(feature = "native"))]
        {
            Vec::new()
        }

        #[cfg(feature = "native")]
        {
            let res = self.cam.resolution();
            vec![Size::new(res.width_x, res.height_y)]
        }
    }

    fn set_size(&mut self, size: Size) -> Result<(), CameraError> {
        #[cfg(not(feature = "native"))]
        {
            let _ = size;
            Err(CameraError::NotEnabled)
        }

        #[cfg(feature = "native")]
        {
            use nokhwa::utils::Resolution;

            self.cam
                .set_resolution(Resolution::new(size.width, size.height))
                .map_err(|e| CameraError::Backend(e.to_string()))
        }
    }

    fn next_frame(&mut self) -> Result<Option<RgbaFrame>, CameraError> {
        #[cfg(not(feature = "native"))]
        {
            Err(CameraError::NotEnabled)
        }

        #[cfg(feature = "native")]
        {
            use nokhwa::pixel_format::RgbAFormat;

            let buf = self
                .cam
                .frame()
                .map_err(|e| CameraError::Backend(e.to_string()))?;
            let res = buf.resolution();
            let img = buf
                .decode_image::<RgbAFormat>()
                .map_err(|e| CameraError::Backend(e.to_string()))?;
            Ok(Some(RgbaFrame {
                width: res.width_x,
                height: res.height_y,
                bytes: img.into_raw(),
            }))
        }
    }
}

/// A [`StreamingCamera`] reading webcam `index`. The device must stream the requested preview
/// size exactly, otherwise the camera reports `unsupported video size`.
pub fn webcam_camera(
    index: u32,
    options: CameraOptions,
    clock: Arc<dyn Clock>,
    events: Sender<CameraEvent>,
) -> StreamingCamera {
    StreamingCamera::new(
        "webcam",
        options,
        Arc::new(move |o: &CameraOptions| -> Result<Box<dyn FrameSource>, CameraError> {
            let mut cam = Webcam::open(index)?;
            // Best effort; the exact-size check runs against what the device then reports.
            let _ = cam.set_size(o.preview);
            Ok(Box::new(cam))
        }),
        clock,
        events,
    )
}

#[cfg(all(test, not(feature = "native")))]
mod tests {
    use super::*;
    use crate::device::CameraDevice;
    use camflow_core::{ManualClock, StreamSurface};
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    #[test]
    fn disabled_backend_reports_error_event() {
        let (tx, rx) = unbounded();
        let mut cam = webcam_camera(
            0,
            CameraOptions {
                preview: Size::new(640, 480),
                fps: 30,
                dump_dir: std::env::temp_dir(),
            },
            Arc::new(ManualClock::new(0)),
            tx,
        );
        cam.set_surface(StreamSurface::new());
        cam.start().unwrap();
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            CameraEvent::Error(msg) => assert!(msg.contains("not enabled")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
