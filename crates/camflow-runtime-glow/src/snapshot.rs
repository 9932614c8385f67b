//! Persists still captures read back from GL.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::info;

use camflow_core::{CaptureSettings, EngineError, Size};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCapture {
    pub image: PathBuf,
    pub thumbnail: PathBuf,
}

/// GL rows arrive bottom-up; returns a top-down image.
pub fn capture_to_image(rgba: &[u8], size: Size) -> Result<RgbaImage, EngineError> {
    if rgba.len() != size.rgba_len() {
        return Err(EngineError::other(format!(
            "capture buffer is {} bytes, expected {} for {size}",
            rgba.len(),
            size.rgba_len()
        )));
    }
    let mut img = RgbaImage::from_raw(size.width, size.height, rgba.to_vec())
        .ok_or_else(|| EngineError::other(format!("capture buffer does not fit {size}")))?;
    imageops::flip_vertical_in_place(&mut img);
    Ok(img)
}

/// Centered square crop scaled to `edge` pixels.
pub fn square_thumbnail(img: &RgbaImage, edge: u32) -> RgbaImage {
    let side = img.width().min(img.height());
    let x = (img.width() - side) / 2;
    let y = (img.height() - side) / 2;
    let square = imageops::crop_imm(img, x, y, side, side).to_image();
    imageops::resize(&square, edge.max(1), edge.max(1), FilterType::Triangle)
}

fn write_png(img: &RgbaImage, path: &Path) -> Result<(), EngineError> {
    img.save(path)
        .map_err(|e| EngineError::other(format!("writing {}: {e}", path.display())))
}

/// Writes `capture_<stamp>.png` and `capture_<stamp>_thumb.png` under the configured directory.
pub fn save_capture_png(
    rgba: &[u8],
    size: Size,
    settings: &CaptureSettings,
    stamp_ms: u64,
) -> Result<SavedCapture, EngineError> {
    let img = capture_to_image(rgba, size)?;
    let dir = &settings.output_dir;
    std::fs::create_dir_all(dir).map_err(|source| EngineError::Io {
        path: dir.clone(),
        source,
    })?;

    let saved = SavedCapture {
        image: dir.join(format!("capture_{stamp_ms}.png")),
        thumbnail: dir.join(format!("capture_{stamp_ms}_thumb.png")),
    };
    write_png(&img, &saved.image)?;
    write_png(&square_thumbnail(&img, settings.thumbnail), &saved.thumbnail)?;
    info!(path = %saved.image.display(), %size, "capture saved");
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn rows_are_flipped_to_top_down() {
        // bottom row red, top row blue (GL order)
        let mut rgba = vec![255, 0, 0, 255, 255, 0, 0, 255];
        rgba.extend_from_slice(&[0, 0, 255, 255, 0, 0, 255, 255]);
        let img = capture_to_image(&rgba, Size::new(2, 2)).unwrap();
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 0, 255, 255]));
        assert_eq!(*img.get_pixel(1, 1), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(capture_to_image(&[0; 12], Size::new(2, 2)).is_err());
    }

    #[test]
    fn thumbnail_is_square() {
        let img = RgbaImage::new(40, 20);
        let t = square_thumbnail(&img, 16);
        assert_eq!((t.width(), t.height()), (16, 16));
    }

    #[test]
    fn saves_image_and_thumbnail() {
        let dir = std::env::temp_dir().join(format!("camflow-snapshot-{}", std::process::id()));
        let settings = CaptureSettings {
            output_dir: dir.clone(),
            thumbnail: 8,
        };
        let size = Size::new(12, 6);
        let saved = save_capture_png(&vec![128; size.rgba_len()], size, &settings, 42).unwrap();
        assert!(saved.image.ends_with("capture_42.png"));

        let full = image::open(&saved.image).unwrap();
        assert_eq!((full.width(), full.height()), (12, 6));
        let thumb = image::open(&saved.thumbnail).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (8, 8));
        let _ = std::fs::remove_dir_all(dir);
    }
}
