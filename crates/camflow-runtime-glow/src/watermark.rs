//! Timestamp and speed readout burned into the frame.
//!
//! Glyphs are rasterized once at creation into one texture per character (plus a double-width
//! `km/h` suffix) and composited with `(SRC_COLOR, DST_ALPHA)` blending, one viewport per glyph.

use std::collections::HashMap;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::OffsetDateTime;
use tracing::debug;

use camflow_core::{Clock, EngineError, Size, WatermarkSettings};

use crate::filter::draw_input;
use crate::gpu::{
    BlendFunc, Gpu, QuadDraw, TextureId, TextureTarget, QUAD_POSITIONS, QUAD_TEX_COORDS,
};
use crate::shaders;
use crate::stage::{RenderStage, StageCore};

const TIMESTAMP_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";

pub const GLYPHS: &str = "0123456789-:.";
pub const SUFFIX: &str = "km/h";

/// Produces the timestamp row. Local time by default.
pub type TimestampFn = Box<dyn Fn() -> String + Send>;

pub fn local_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    time::format_description::parse(TIMESTAMP_FORMAT)
        .ok()
        .and_then(|fmt| now.format(&fmt).ok())
        .unwrap_or_else(|| String::from("0000-00-00 00:00:00"))
}

// 5x7 bitmaps, one row per entry, MSB is the leftmost column.
fn glyph_rows(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1E, 0x01, 0x01, 0x0E, 0x01, 0x01, 0x1E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        'k' => [0x10, 0x10, 0x12, 0x14, 0x18, 0x14, 0x12],
        'm' => [0x00, 0x00, 0x1A, 0x15, 0x15, 0x11, 0x11],
        '/' => [0x01, 0x02, 0x02, 0x04, 0x08, 0x08, 0x10],
        'h' => [0x10, 0x10, 0x16, 0x19, 0x11, 0x11, 0x11],
        _ => return None,
    };
    Some(rows)
}

/// Rasterizes `text` white-on-transparent into a `cell` sized image, one glyph per `advance`
/// pixels, scaled so a glyph fits inside its advance.
pub fn rasterize(text: &str, cell: Size, advance: u32) -> RgbaImage {
    let mut img = RgbaImage::new(cell.width.max(1), cell.height.max(1));
    let px = (advance / 6).max(1);
    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph_rows(ch) else {
            continue;
        };
        let x0 = i as u32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..5u32 {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..px {
                    for dx in 0..px {
                        let x = x0 + col * px + dx;
                        let y = row as u32 * px + dy;
                        if x < img.width() && y < img.height() {
                            img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
                        }
                    }
                }
            }
        }
    }
    img
}

/// Synthetic readout that holds each value for a random interval.
#[derive(Debug)]
pub struct Readout {
    rng: StdRng,
    range: [f32; 2],
    hold_ms: [u64; 2],
    value: f32,
    next_change_ms: Option<u64>,
    changes: u64,
}

impl Readout {
    pub fn new(settings: &WatermarkSettings, rng: StdRng) -> Self {
        Self {
            rng,
            range: settings.readout_range,
            hold_ms: settings.hold_ms,
            value: settings.readout_range[0],
            next_change_ms: None,
            changes: 0,
        }
    }

    /// Value to display at `now_ms`.
    pub fn sample(&mut self, now_ms: u64) -> f32 {
        let due = self.next_change_ms.map_or(true, |t| now_ms >= t);
        if due {
            let span = (self.range[1] - self.range[0]).max(1.0) as u32;
            let whole = self.rng.gen_range(0..span) as f32;
            let tenth = self.rng.gen_range(0..10) as f32 / 10.0;
            self.value = self.range[0] + whole + tenth;
            let [min, max] = self.hold_ms;
            let hold = if max > min { self.rng.gen_range(min..max) } else { min };
            self.next_change_ms = Some(now_ms.saturating_add(hold));
            self.changes += 1;
        }
        self.value
    }

    /// Last sampled value.
    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn changes(&self) -> u64 {
        self.changes
    }

    pub fn next_change_ms(&self) -> Option<u64> {
        self.next_change_ms
    }
}

pub struct WatermarkStage {
    core: StageCore,
    settings: WatermarkSettings,
    clock: Arc<dyn Clock>,
    timestamp: TimestampFn,
    readout: Readout,
    glyphs: HashMap<char, TextureId>,
    suffix: Option<TextureId>,
}

impl std::fmt::Debug for WatermarkStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkStage")
            .field("core", &self.core)
            .field("settings", &self.settings)
            .field("readout", &self.readout)
            .field("glyphs", &self.glyphs.len())
            .finish()
    }
}

impl WatermarkStage {
    pub fn new(settings: WatermarkSettings, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(settings, clock, StdRng::from_entropy())
    }

    pub fn with_rng(settings: WatermarkSettings, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        let readout = Readout::new(&settings, rng);
        Self {
            core: StageCore::filter("watermark", shaders::TEXTURE),
            settings,
            clock,
            timestamp: Box::new(local_timestamp),
            readout,
            glyphs: HashMap::new(),
            suffix: None,
        }
    }

    pub fn set_timestamp_fn(&mut self, f: TimestampFn) {
        self.timestamp = f;
    }

    pub fn readout(&self) -> &Readout {
        &self.readout
    }

    fn cell(&self) -> Size {
        Size::new(self.settings.glyph_width, self.settings.glyph_height)
    }

    fn upload(gpu: &dyn Gpu, img: &RgbaImage) -> Result<TextureId, EngineError> {
        let t = gpu.create_texture(TextureTarget::Texture2D)?;
        gpu.upload_rgba(
            t,
            TextureTarget::Texture2D,
            Size::new(img.width(), img.height()),
            img.as_raw(),
        );
        Ok(t)
    }

    fn draw_glyph(&self, gpu: &dyn Gpu, texture: TextureId, x: i32, y: i32, cell: Size) {
        let Some(program) = self.core.program() else {
            return;
        };
        gpu.viewport(x, y, cell.width as i32, cell.height as i32);
        gpu.draw_quad(&QuadDraw {
            program,
            texture,
            target: TextureTarget::Texture2D,
            vertex_matrix: self.core.vertex_matrix(),
            texture_matrix: &camflow_core::Mat4::IDENTITY,
            positions: &QUAD_POSITIONS,
            tex_coords: &QUAD_TEX_COORDS,
        });
    }

    fn draw_row(&self, gpu: &dyn Gpu, text: &str, x0: i32, y: i32) -> i32 {
        let cell = self.cell();
        let advance = self.settings.cadence as i32;
        let mut x = x0;
        for ch in text.chars() {
            if let Some(&t) = self.glyphs.get(&ch) {
                self.draw_glyph(gpu, t, x, y, cell);
            }
            x += advance;
        }
        x
    }
}

impl RenderStage for WatermarkStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn on_create(&mut self, gpu: &dyn Gpu) -> Result<(), EngineError> {
        let cell = self.cell();
        for ch in GLYPHS.chars() {
            let img = rasterize(&ch.to_string(), cell, self.settings.cadence);
            let t = Self::upload(gpu, &img)?;
            self.glyphs.insert(ch, t);
        }
        let wide = Size::new(cell.width * 2, cell.height);
        self.suffix = Some(Self::upload(gpu, &rasterize(SUFFIX, wide, self.settings.cadence))?);
        debug!(glyphs = self.glyphs.len(), "watermark glyphs rasterized");
        Ok(())
    }

    fn on_draw(&mut self, gpu: &dyn Gpu) {
        gpu.set_blend(None);
        if !draw_input(gpu, &self.core) {
            return;
        }

        let data = self.core.data_size();
        let margin = self.settings.margin as i32;
        let stamp = (self.timestamp)();
        let speed = format!("{:.1}", self.readout.sample(self.clock.now_ms()));

        let depth_was_enabled = gpu.depth_test_enabled();
        if depth_was_enabled {
            gpu.set_depth_test(false);
        }
        gpu.set_blend(Some(BlendFunc::SRC_COLOR_DST_ALPHA));

        self.draw_row(gpu, &stamp, margin, margin);
        let speed_x = data.width as i32 * 7 / 8;
        let suffix_x = self.draw_row(gpu, &speed, speed_x, margin);
        if let Some(t) = self.suffix {
            let cell = self.cell();
            self.draw_glyph(gpu, t, suffix_x, margin, Size::new(cell.width * 2, cell.height));
        }

        gpu.set_blend(None);
        if depth_was_enabled {
            gpu.set_depth_test(true);
        }
    }

    fn on_release(&mut self, gpu: &dyn Gpu) {
        for (_, t) in self.glyphs.drain() {
            gpu.delete_texture(t);
        }
        if let Some(t) = self.suffix.take() {
            gpu.delete_texture(t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGpu, GpuCall};
    use camflow_core::ManualClock;

    fn settings() -> WatermarkSettings {
        WatermarkSettings::default()
    }

    #[test]
    fn readout_holds_between_changes() {
        let mut r = Readout::new(&settings(), StdRng::seed_from_u64(7));
        let first = r.sample(0);
        assert!((80.0..120.0).contains(&first), "out of range: {first}");
        let due = r.next_change_ms().unwrap();
        assert!((1_000..3_000).contains(&due));

        for t in [1, 500, due - 1] {
            assert_eq!(r.sample(t), first);
        }
        assert_eq!(r.changes(), 1);
        r.sample(due);
        assert_eq!(r.changes(), 2);
    }

    #[test]
    fn empty_hold_range_holds_for_its_minimum() {
        for hold_ms in [[1_500, 1_500], [3_000, 1_000]] {
            let mut r = Readout::new(
                &WatermarkSettings {
                    hold_ms,
                    ..settings()
                },
                StdRng::seed_from_u64(3),
            );
            r.sample(10);
            assert_eq!(r.next_change_ms(), Some(10 + hold_ms[0]));
        }
    }

    #[test]
    fn rasterized_digit_has_ink_inside_its_advance() {
        let img = rasterize("8", Size::new(100, 150), 18);
        let inked: Vec<_> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[3] == 255)
            .collect();
        assert!(!inked.is_empty());
        assert!(inked.iter().all(|(x, y, _)| *x < 18 && *y < 21));
    }

    #[test]
    fn glyph_pass_is_blended_and_restores_depth_test() {
        let gpu = FakeGpu::new();
        gpu.set_depth_test_state(true);
        let clock = Arc::new(ManualClock::new(0));
        let mut w = WatermarkStage::with_rng(settings(), clock, StdRng::seed_from_u64(1));
        w.set_timestamp_fn(Box::new(|| "2024-01-02 03:04:05".to_string()));
        w.set_data_size(Size::new(1280, 720));
        assert!(w.create(&gpu));
        w.prepare(&gpu, Size::new(1280, 720));
        let input = gpu.create_texture(TextureTarget::Texture2D).unwrap();
        w.set_input_texture(input);
        gpu.take_calls();

        w.draw(&gpu);
        let calls = gpu.take_calls();

        let blend_on = calls
            .iter()
            .position(|c| *c == GpuCall::SetBlend(Some(BlendFunc::SRC_COLOR_DST_ALPHA)))
            .expect("blend enabled");
        let blend_off = calls
            .iter()
            .rposition(|c| *c == GpuCall::SetBlend(None))
            .unwrap();
        assert!(blend_on < blend_off);
        assert!(calls.contains(&GpuCall::SetDepthTest(false)));
        assert_eq!(calls.last(), Some(&GpuCall::BindFramebuffer(None)));
        assert!(gpu.depth_test_enabled(), "depth test restored");

        // input blit + 18 timestamp glyphs (space skipped) + readout glyphs + suffix
        let speed_len = format!("{:.1}", w.readout().value()).len();
        let quads = calls
            .iter()
            .filter(|c| matches!(c, GpuCall::DrawQuad { .. }))
            .count();
        assert_eq!(quads, 1 + 18 + speed_len + 1);
        assert!(calls.contains(&GpuCall::Viewport(10, 10, 100, 150)));
        assert!(calls.contains(&GpuCall::Viewport(1120, 10, 100, 150)));
    }
}
