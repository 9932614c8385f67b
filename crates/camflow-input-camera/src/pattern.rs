//! Synthetic producer: scrolling colour bars paced at the configured frame rate.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use camflow_core::{Clock, Size, VideoType};

use crate::device::{CameraEvent, CameraOptions, FrameSource, RgbaFrame, StreamingCamera};
use crate::error::CameraError;

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [16, 16, 16],
];

#[derive(Debug)]
pub struct TestPattern {
    size: Size,
    interval: Duration,
    next_due: Option<Instant>,
    frame: u64,
}

impl TestPattern {
    pub fn new(interval: Duration) -> Self {
        Self {
            size: Size::default(),
            interval,
            next_due: None,
            frame: 0,
        }
    }

    /// Frame `index` at `size`; bars scroll one column per frame.
    pub fn render(size: Size, index: u64) -> Vec<u8> {
        let mut out = vec![0u8; size.rgba_len()];
        let w = size.width.max(1) as u64;
        for (i, px) in out.chunks_exact_mut(4).enumerate() {
            let x = (i as u64 % w + index) % w;
            let bar = (x * BARS.len() as u64 / w) as usize;
            px[..3].copy_from_slice(&BARS[bar]);
            px[3] = 255;
        }
        out
    }
}

impl FrameSource for TestPattern {
    fn supported_sizes(&self) -> Vec<Size> {
        [VideoType::P480, VideoType::P720, VideoType::P1080]
            .iter()
            .map(VideoType::size)
            .collect()
    }

    fn set_size(&mut self, size: Size) -> Result<(), CameraError> {
        if !size.is_known() {
            return Err(CameraError::UnsupportedSize);
        }
        self.size = size;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbaFrame>, CameraError> {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due + self.interval);

        let bytes = Self::render(self.size, self.frame);
        self.frame += 1;
        Ok(Some(RgbaFrame {
            width: self.size.width,
            height: self.size.height,
            bytes,
        }))
    }
}

/// A [`StreamingCamera`] backed by [`TestPattern`].
pub fn test_pattern_camera(
    options: CameraOptions,
    clock: Arc<dyn Clock>,
    events: Sender<CameraEvent>,
) -> StreamingCamera {
    StreamingCamera::new(
        "test-pattern",
        options,
        Arc::new(|o: &CameraOptions| -> Result<Box<dyn FrameSource>, CameraError> {
            Ok(Box::new(TestPattern::new(o.frame_interval())))
        }),
        clock,
        events,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CameraDevice;
    use camflow_core::{ManualClock, StreamSurface};
    use crossbeam_channel::unbounded;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options(preview: Size, dump_dir: PathBuf) -> CameraOptions {
        CameraOptions {
            preview,
            fps: 200,
            dump_dir,
        }
    }

    fn temp(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("camflow-cam-{tag}-{}", std::process::id()))
    }

    #[test]
    fn bars_scroll_with_frame_index() {
        let size = Size::new(8, 1);
        let a = TestPattern::render(size, 0);
        let b = TestPattern::render(size, 1);
        assert_eq!(a.len(), 32);
        assert_eq!(&a[..4], &[255, 255, 255, 255]);
        assert_eq!(&b[..4], &a[4..8]);
    }

    #[test]
    fn delivers_frames_and_reports_prepared() {
        let (tx, rx) = unbounded();
        let mut cam = test_pattern_camera(
            options(Size::new(640, 480), temp("ok")),
            Arc::new(ManualClock::new(7)),
            tx,
        );
        let surface = StreamSurface::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        surface.set_frame_listener(Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        cam.set_surface(surface.clone());
        cam.start().unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            CameraEvent::Prepared(Size::new(640, 480))
        );
        let deadline = Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        let frame = surface.take_latest().expect("a frame arrived");
        assert_eq!(frame.size, Size::new(640, 480));
        assert_eq!(frame.timestamp_us, 7);

        cam.close();
        assert!(!cam.is_running());
    }

    #[test]
    fn unsupported_preset_reports_error_and_sends_nothing() {
        let (tx, rx) = unbounded();
        let mut cam = test_pattern_camera(
            options(Size::new(320, 240), temp("bad")),
            Arc::new(ManualClock::new(0)),
            tx,
        );
        let surface = StreamSurface::new();
        cam.set_surface(surface.clone());
        cam.start().unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            CameraEvent::Error("unsupported video size".into())
        );
        cam.close();
        assert!(!surface.has_pending());
    }

    #[test]
    fn start_without_surface_fails() {
        let (tx, _rx) = unbounded();
        let mut cam = test_pattern_camera(
            options(Size::new(640, 480), temp("nosurf")),
            Arc::new(ManualClock::new(0)),
            tx,
        );
        assert!(matches!(cam.start(), Err(CameraError::NoSurface)));
    }

    #[test]
    fn dump_flag_saves_next_frame_once() {
        let dir = temp("dump");
        let _ = std::fs::remove_dir_all(&dir);
        let (tx, rx) = unbounded();
        let mut cam = test_pattern_camera(
            options(Size::new(640, 480), dir.clone()),
            Arc::new(ManualClock::new(42)),
            tx,
        );
        cam.set_surface(StreamSurface::new());
        cam.dump_image(true);
        cam.start().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let path = dir.join("dump_42.png");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !path.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        cam.close();
        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (640, 480));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
