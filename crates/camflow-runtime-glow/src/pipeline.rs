//! Fixed-topology frame orchestrator.
//!
//! Per tick: camera import, user filters, watermark, then the composed texture fans out to the
//! still capture (pre-watermark), every external sink, and finally the screen.

use std::sync::Arc;

use tracing::{debug, info, warn};

use camflow_core::{CamflowConfig, Clock, FrameListener, ScaleType, Size, StreamSurface};

use crate::capture::{CaptureCallback, CaptureStage};
use crate::draw::DrawStage;
use crate::external::ExternalSinks;
use crate::gpu::{Gpu, TextureId};
use crate::oes::OesStage;
use crate::stage::{RenderStage, StageState};
use crate::watermark::WatermarkStage;

pub type BoxedStage = Box<dyn RenderStage + Send>;

pub struct Pipeline {
    oes: OesStage,
    filters: Vec<BoxedStage>,
    watermark: Option<WatermarkStage>,
    capture: CaptureStage,
    draw: DrawStage,
    sinks: ExternalSinks,
    data_size: Size,
    view_size: Size,
    created: bool,
    released: bool,
    ticks: u64,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("oes", &self.oes)
            .field("filters", &self.filters.len())
            .field("watermark", &self.watermark.is_some())
            .field("sinks", &self.sinks)
            .field("data_size", &self.data_size)
            .field("view_size", &self.view_size)
            .field("released", &self.released)
            .finish()
    }
}

impl Pipeline {
    /// `on_frame_available` is handed to the camera import stage; typically
    /// [`crate::RenderScheduler::frame_listener`].
    pub fn new(
        surface: StreamSurface,
        on_frame_available: FrameListener,
        config: &CamflowConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut oes = OesStage::new(surface, on_frame_available);
        oes.set_landscape(config.camera.landscape);
        let watermark = config
            .watermark
            .enabled
            .then(|| WatermarkStage::new(config.watermark.clone(), clock));
        Self {
            oes,
            filters: Vec::new(),
            watermark,
            capture: CaptureStage::new(),
            draw: DrawStage::new(config.camera.scale_type),
            sinks: ExternalSinks::new(),
            data_size: Size::default(),
            view_size: Size::default(),
            created: false,
            released: false,
            ticks: 0,
        }
    }

    /// Replaces the watermark stage (e.g. one with a seeded readout). Call before
    /// [`Pipeline::surface_created`].
    pub fn set_watermark(&mut self, watermark: Option<WatermarkStage>) {
        self.watermark = watermark;
    }

    pub fn oes(&self) -> &OesStage {
        &self.oes
    }

    pub fn watermark(&self) -> Option<&WatermarkStage> {
        self.watermark.as_ref()
    }

    pub fn sinks(&self) -> &ExternalSinks {
        &self.sinks
    }

    pub fn data_size(&self) -> Size {
        self.data_size
    }

    pub fn view_size(&self) -> Size {
        self.view_size
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Frames actually composed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn stages_mut(&mut self) -> Vec<&mut dyn RenderStage> {
        let mut out: Vec<&mut dyn RenderStage> = Vec::with_capacity(self.filters.len() + 4);
        out.push(&mut self.oes);
        for f in self.filters.iter_mut() {
            out.push(f.as_mut());
        }
        if let Some(w) = self.watermark.as_mut() {
            out.push(w);
        }
        out.push(&mut self.capture);
        out.push(&mut self.draw);
        out
    }

    /// Inserts a filter after the camera import. Filters added after the surface exists are
    /// created and prepared at the start of the next tick.
    pub fn add_filter(&mut self, mut filter: BoxedStage) {
        if self.released {
            return;
        }
        filter.set_data_size(self.data_size);
        debug!(stage = filter.name(), "filter added");
        self.filters.push(filter);
    }

    pub fn surface_created(&mut self, gpu: &dyn Gpu) {
        if self.released {
            return;
        }
        for stage in self.stages_mut() {
            if !stage.create(gpu) {
                warn!(stage = stage.name(), "stage unavailable; continuing without it");
            }
        }
        self.created = true;
        info!("pipeline created");
    }

    /// First call prepares every created stage; later calls propagate the new surface size.
    pub fn surface_changed(&mut self, gpu: &dyn Gpu, view: Size) {
        if self.released {
            return;
        }
        self.view_size = view;
        for stage in self.stages_mut() {
            match stage.state() {
                StageState::Created => stage.prepare(gpu, view),
                StageState::Prepared => stage.set_view_size(view),
                StageState::None | StageState::Released => {}
            }
        }
        debug!(%view, "surface changed");
    }

    /// Source (camera data) resolution, already oriented for display.
    pub fn set_data_size(&mut self, size: Size) {
        if self.released {
            return;
        }
        self.data_size = size;
        for stage in self.stages_mut() {
            stage.set_data_size(size);
        }
        debug!(%size, "data size changed");
    }

    pub fn set_landscape(&mut self, landscape: bool) {
        self.oes.set_landscape(landscape);
    }

    pub fn set_display_scale_type(&mut self, scale_type: ScaleType) {
        self.draw.set_scale_type(scale_type);
    }

    /// Arms a single still capture of the next composed (pre-watermark) frame.
    pub fn capture(&mut self, callback: CaptureCallback) {
        if self.released {
            return;
        }
        self.capture.arm(callback);
    }

    fn catch_up_filters(&mut self, gpu: &dyn Gpu) {
        if !self.created {
            return;
        }
        let view = self.view_size;
        for f in self.filters.iter_mut() {
            if f.state() == StageState::None && !f.create(gpu) {
                warn!(stage = f.name(), "stage unavailable; continuing without it");
            }
            if f.state() == StageState::Created && view.is_known() {
                f.prepare(gpu, view);
            }
        }
    }

    /// Runs one tick. Returns `false` when the tick was skipped.
    pub fn draw_frame(&mut self, gpu: &dyn Gpu) -> bool {
        if self.released || !self.data_size.is_known() || !self.view_size.is_known() {
            return false;
        }
        self.catch_up_filters(gpu);

        self.oes.draw(gpu);
        let Some(mut current) = self.oes.output_texture() else {
            return false;
        };

        for f in self.filters.iter_mut() {
            current = run_stage(f.as_mut(), gpu, current);
        }

        let pre_watermark = current;
        if let Some(w) = self.watermark.as_mut() {
            current = run_stage(w, gpu, current);
        }

        if self.capture.is_armed() {
            self.capture.set_input_texture(pre_watermark);
            self.capture.draw(gpu);
        }

        self.sinks.dispatch(current, self.data_size);

        self.draw.set_input_texture(current);
        self.draw.draw(gpu);
        self.ticks += 1;
        true
    }

    /// Releases sinks first (joining their threads), then every stage. Terminal.
    pub fn release(&mut self, gpu: &dyn Gpu) {
        if self.released {
            return;
        }
        self.sinks.release_all();
        for stage in self.stages_mut().into_iter().rev() {
            stage.release(gpu);
        }
        self.released = true;
        info!(ticks = self.ticks, "pipeline released");
    }
}

fn run_stage(stage: &mut dyn RenderStage, gpu: &dyn Gpu, input: TextureId) -> TextureId {
    stage.set_input_texture(input);
    stage.draw(gpu);
    stage.output_texture().unwrap_or(input)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::external::{ExternalRender, SinkState};
    use crate::filter::PassThroughFilter;
    use crate::testing::{FakeGpu, GpuCall};
    use camflow_core::{ManualClock, Mat4, StreamFrame};

    fn config(watermark: bool) -> CamflowConfig {
        let mut c = CamflowConfig::default();
        c.watermark.enabled = watermark;
        c
    }

    fn pipeline(watermark: bool) -> (Pipeline, StreamSurface) {
        let surface = StreamSurface::new();
        let p = Pipeline::new(
            surface.clone(),
            Arc::new(|| {}),
            &config(watermark),
            Arc::new(ManualClock::new(0)),
        );
        (p, surface)
    }

    fn frame(size: Size) -> StreamFrame {
        StreamFrame {
            size,
            rgba: vec![0x7F; size.rgba_len()],
            transform: Mat4::IDENTITY,
            timestamp_us: 0,
        }
    }

    #[test]
    fn tick_is_skipped_until_both_sizes_known() {
        let gpu = FakeGpu::new();
        let (mut p, surface) = pipeline(false);
        p.surface_created(&gpu);
        p.surface_changed(&gpu, Size::new(320, 240));
        surface.push_frame(frame(Size::new(8, 8)));
        gpu.take_calls();

        assert!(!p.draw_frame(&gpu));
        assert!(gpu.calls().is_empty());
        assert!(surface.has_pending(), "frame stays pending while skipped");
    }

    #[test]
    fn textures_thread_through_filters_to_screen() {
        let gpu = FakeGpu::new();
        let (mut p, surface) = pipeline(false);
        p.add_filter(Box::new(PassThroughFilter::new("copy")));
        p.set_data_size(Size::new(8, 8));
        p.surface_created(&gpu);
        p.surface_changed(&gpu, Size::new(16, 16));
        surface.push_frame(frame(Size::new(8, 8)));
        gpu.take_calls();

        assert!(p.draw_frame(&gpu));
        let stream = p.oes().stream().texture().unwrap();
        let oes_out = p.oes().output_texture().unwrap();
        let drawn = gpu.drawn_textures();
        assert_eq!(drawn.len(), 3);
        assert_eq!(drawn[0], stream);
        assert_eq!(drawn[1], oes_out);
        assert_ne!(drawn[2], oes_out, "screen samples the filter output");
        assert_eq!(p.ticks(), 1);
    }

    #[test]
    fn frame_is_flipped_exactly_once_between_camera_and_screen() {
        let gpu = FakeGpu::new();
        let (mut p, surface) = pipeline(true);
        p.set_data_size(Size::new(8, 8));
        p.surface_created(&gpu);
        p.surface_changed(&gpu, Size::new(8, 8));
        surface.push_frame(frame(Size::new(8, 8)));
        gpu.take_calls();

        assert!(p.draw_frame(&gpu));
        let stream = p.oes().stream().texture().unwrap();
        let oes_out = p.oes().output_texture().unwrap();
        let wm_out = p.watermark().unwrap().output_texture().unwrap();
        let y_scale = |tex| {
            gpu.calls().into_iter().find_map(|c| match c {
                GpuCall::DrawQuad { texture, vertex_matrix, .. } if texture == tex => {
                    Some(vertex_matrix.0[5])
                }
                _ => None,
            })
        };

        let flips = [stream, oes_out, wm_out]
            .into_iter()
            .map(|t| y_scale(t).expect("stage drew"))
            .filter(|m5| *m5 < 0.0)
            .count();
        assert!(y_scale(stream).unwrap() > 0.0, "camera import is not flipped");
        assert!(y_scale(oes_out).unwrap() < 0.0, "watermark flips");
        assert_eq!(flips, 1);
    }

    #[test]
    fn capture_samples_pre_watermark_texture() {
        let gpu = FakeGpu::new();
        let (mut p, surface) = pipeline(true);
        p.set_data_size(Size::new(8, 8));
        p.surface_created(&gpu);
        p.surface_changed(&gpu, Size::new(16, 16));
        surface.push_frame(frame(Size::new(8, 8)));

        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        p.capture(Box::new(move |rgba, size| {
            *sink.lock().unwrap() = Some((rgba.len(), size));
        }));
        gpu.take_calls();

        assert!(p.draw_frame(&gpu));
        assert_eq!(*got.lock().unwrap(), Some((8 * 8 * 4, Size::new(8, 8))));

        let oes_out = p.oes().output_texture().unwrap();
        let wm_out = p.watermark().unwrap().output_texture().unwrap();
        let drawn = gpu.drawn_textures();
        assert_eq!(drawn.iter().filter(|t| **t == oes_out).count(), 2);
        assert_eq!(drawn.last(), Some(&wm_out));
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::ReadPixels(_))), 1);

        gpu.take_calls();
        p.draw_frame(&gpu);
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::ReadPixels(_))), 0, "single shot");
    }

    struct Sink {
        state: SinkState,
        seen: Arc<Mutex<Vec<(Option<Size>, TextureId)>>>,
        size: Option<Size>,
    }

    impl ExternalRender for Sink {
        fn state(&self) -> SinkState {
            self.state
        }
        fn on_created(&mut self) {
            self.state = SinkState::Created;
        }
        fn on_prepared(&mut self, size: Size) {
            self.state = SinkState::Prepared;
            self.size = Some(size);
        }
        fn draw(&mut self, texture: TextureId) {
            self.seen.lock().unwrap().push((self.size, texture));
        }
        fn release(&mut self) {
            self.state = SinkState::Destroyed;
        }
    }

    #[test]
    fn sinks_receive_composed_texture_at_source_size() {
        let gpu = FakeGpu::new();
        let (mut p, surface) = pipeline(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        p.sinks().add(Box::new(Sink {
            state: SinkState::None,
            seen: Arc::clone(&seen),
            size: None,
        }));
        p.set_data_size(Size::new(8, 4));
        p.surface_created(&gpu);
        p.surface_changed(&gpu, Size::new(16, 16));
        surface.push_frame(frame(Size::new(8, 4)));
        p.draw_frame(&gpu);

        let oes_out = p.oes().output_texture().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(Some(Size::new(8, 4)), oes_out)]);

        p.release(&gpu);
        assert!(p.sinks().is_empty());
        assert!(surface.is_released());
    }

    #[test]
    fn late_filter_is_brought_up_on_next_tick() {
        let gpu = FakeGpu::new();
        let (mut p, _surface) = pipeline(false);
        p.set_data_size(Size::new(8, 8));
        p.surface_created(&gpu);
        p.surface_changed(&gpu, Size::new(16, 16));
        p.draw_frame(&gpu);
        gpu.take_calls();

        p.add_filter(Box::new(PassThroughFilter::new("late")));
        p.draw_frame(&gpu);
        assert_eq!(
            gpu.count(|c| matches!(c, GpuCall::CreateFboTriple(s) if *s == Size::new(8, 8))),
            1
        );
    }

    #[test]
    fn source_resize_reallocates_each_fbo_once() {
        let gpu = FakeGpu::new();
        let (mut p, _surface) = pipeline(false);
        p.set_data_size(Size::new(8, 8));
        p.surface_created(&gpu);
        p.surface_changed(&gpu, Size::new(16, 16));
        p.surface_changed(&gpu, Size::new(16, 16));
        // oes + capture
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::CreateFboTriple(_))), 2);

        p.set_data_size(Size::new(4, 4));
        gpu.take_calls();
        p.draw_frame(&gpu);
        // capture is unarmed and keeps its stale triple until it next draws
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::CreateFboTriple(_))), 1);
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::DeleteFboTriple(_))), 1);
    }

    #[test]
    fn released_pipeline_ignores_everything() {
        let gpu = FakeGpu::new();
        let (mut p, _surface) = pipeline(true);
        p.set_data_size(Size::new(8, 8));
        p.surface_created(&gpu);
        p.surface_changed(&gpu, Size::new(8, 8));
        p.release(&gpu);
        gpu.take_calls();

        p.surface_changed(&gpu, Size::new(4, 4));
        p.capture(Box::new(|_, _| panic!("released pipeline captured")));
        assert!(!p.draw_frame(&gpu));
        p.release(&gpu);
        assert!(gpu.calls().is_empty());
    }
}
