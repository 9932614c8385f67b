//! Render stage lifecycle.
//!
//! A stage moves `None -> Created -> Prepared -> Released`, never backwards. All lifecycle
//! bookkeeping lives in [`StageCore`]; concrete stages implement the `on_*` hooks and inherit
//! the guarded entry points (`create`, `prepare`, `draw`, `release`) from [`RenderStage`].
//!
//! Ordering mistakes are silent no-ops: drawing before `prepare`, preparing twice, or touching a
//! released stage issue no GPU work.

use tracing::{debug, error};

use camflow_core::{EngineError, Mat4, Size};

use crate::gpu::{FboTriple, Gpu, ProgramId, TextureId};
use crate::shaders;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageState {
    None,
    Created,
    Prepared,
    Released,
}

/// Shared per-stage state.
#[derive(Debug)]
pub struct StageCore {
    name: &'static str,
    shader: &'static str,
    fbo_backed: bool,
    flipped: bool,
    state: StageState,
    program: Option<ProgramId>,
    input: Option<TextureId>,
    fbo: Option<FboTriple>,
    data_size: Size,
    view_size: Size,
    vertex_matrix: Mat4,
    fbo_stale: bool,
    size_changed: bool,
}

impl StageCore {
    /// `fbo_backed` stages render into an owned FBO triple sized to the source resolution.
    pub fn new(name: &'static str, shader: &'static str, fbo_backed: bool) -> Self {
        Self {
            name,
            shader,
            fbo_backed,
            flipped: false,
            state: StageState::None,
            program: None,
            input: None,
            fbo: None,
            data_size: Size::default(),
            view_size: Size::default(),
            vertex_matrix: Mat4::IDENTITY,
            fbo_stale: false,
            size_changed: false,
        }
    }

    /// A filter stage: FBO-backed and Y-flipped once at creation via [`flip_for_fbo`].
    pub fn filter(name: &'static str, shader: &'static str) -> Self {
        Self {
            flipped: true,
            ..Self::new(name, shader, true)
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn is_fbo_backed(&self) -> bool {
        self.fbo_backed
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn input(&self) -> Option<TextureId> {
        self.input
    }

    pub fn fbo(&self) -> Option<&FboTriple> {
        self.fbo.as_ref()
    }

    pub fn data_size(&self) -> Size {
        self.data_size
    }

    pub fn view_size(&self) -> Size {
        self.view_size
    }

    pub fn vertex_matrix(&self) -> &Mat4 {
        &self.vertex_matrix
    }

    pub fn set_vertex_matrix(&mut self, m: Mat4) {
        self.vertex_matrix = m;
    }

    /// Marks size-derived state dirty; the next draw runs `on_size_changed` first.
    pub fn invalidate_size(&mut self) {
        self.size_changed = true;
    }

    fn drawable(&self) -> bool {
        self.state == StageState::Prepared && self.data_size.is_known() && self.view_size.is_known()
    }

    /// Allocates (or re-allocates) the FBO triple when missing or stale.
    /// Returns the new size if an allocation happened.
    fn ensure_fbo(&mut self, gpu: &dyn Gpu) -> Result<Option<Size>, EngineError> {
        if !self.fbo_backed || !self.data_size.is_known() {
            return Ok(None);
        }
        if self.fbo.is_some() && !self.fbo_stale {
            return Ok(None);
        }
        if let Some(old) = self.fbo.take() {
            gpu.delete_fbo_triple(&old);
        }
        self.fbo_stale = false;
        let fbo = gpu.create_fbo_triple(self.data_size)?;
        debug!(stage = self.name, size = %self.data_size, "fbo allocated");
        self.fbo = Some(fbo);
        Ok(Some(self.data_size))
    }
}

/// Y-flips a vertex transform. Filter stages apply it once at creation; the camera import
/// stage renders into its FBO unflipped.
pub fn flip_for_fbo(matrix: &mut Mat4) {
    matrix.scale(1.0, -1.0, 1.0);
}

pub trait RenderStage {
    fn core(&self) -> &StageCore;
    fn core_mut(&mut self) -> &mut StageCore;

    /// Extra allocations after the program linked.
    fn on_create(&mut self, _gpu: &dyn Gpu) -> Result<(), EngineError> {
        Ok(())
    }

    /// A new FBO triple of `size` exists (first allocation or after a source resize).
    fn on_fbo_allocated(&mut self, _gpu: &dyn Gpu, _size: Size) {}

    /// Source or view size changed since the last draw.
    fn on_size_changed(&mut self, _gpu: &dyn Gpu) {}

    /// Issue draw commands. The target framebuffer and viewport are already bound.
    fn on_draw(&mut self, gpu: &dyn Gpu);

    fn on_release(&mut self, _gpu: &dyn Gpu) {}

    /// Per-tick gate on top of the lifecycle checks.
    fn wants_draw(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        self.core().name
    }

    fn state(&self) -> StageState {
        self.core().state
    }

    /// Takes effect on the next `draw`.
    fn set_input_texture(&mut self, texture: TextureId) {
        self.core_mut().input = Some(texture);
    }

    /// `None` for terminal stages and before the first FBO allocation.
    fn output_texture(&self) -> Option<TextureId> {
        let core = self.core();
        if core.state != StageState::Prepared {
            return None;
        }
        core.fbo.as_ref().map(|f| f.texture)
    }

    /// Updates the source resolution. A prepared FBO-backed stage re-creates its triple on
    /// the next draw.
    fn set_data_size(&mut self, size: Size) {
        let core = self.core_mut();
        if core.state == StageState::Released || core.data_size == size {
            return;
        }
        core.data_size = size;
        if core.state == StageState::Prepared {
            core.fbo_stale = core.fbo_backed;
            core.size_changed = true;
        }
    }

    /// Updates the destination (surface) size of a prepared stage.
    fn set_view_size(&mut self, size: Size) {
        let core = self.core_mut();
        if core.state == StageState::Released || core.view_size == size {
            return;
        }
        core.view_size = size;
        if core.state == StageState::Prepared {
            core.size_changed = true;
        }
    }

    /// Builds the program. Idempotent once created. Returns whether the stage is usable;
    /// a failed build tears the stage down.
    fn create(&mut self, gpu: &dyn Gpu) -> bool {
        match self.core().state {
            StageState::None => {}
            StageState::Released => return false,
            StageState::Created | StageState::Prepared => return true,
        }

        let name = self.core().name;
        let built = shaders::source(self.core().shader, gpu.dialect())
            .and_then(|src| gpu.compile_program(&src));
        let program = match built {
            Ok(p) => p,
            Err(e) => {
                error!(stage = name, error = %e, "program build failed; stage disabled");
                self.core_mut().state = StageState::Released;
                return false;
            }
        };

        let core = self.core_mut();
        core.program = Some(program);
        if core.flipped {
            flip_for_fbo(&mut core.vertex_matrix);
        }
        core.state = StageState::Created;

        if let Err(e) = self.on_create(gpu) {
            error!(stage = name, error = %e, "stage setup failed; stage disabled");
            self.release(gpu);
            return false;
        }
        debug!(stage = name, "created");
        true
    }

    /// No-op unless exactly `Created`.
    fn prepare(&mut self, gpu: &dyn Gpu, view: Size) {
        let core = self.core_mut();
        if core.state != StageState::Created {
            return;
        }
        core.view_size = view;
        core.state = StageState::Prepared;
        core.size_changed = true;

        match core.ensure_fbo(gpu) {
            Ok(Some(size)) => self.on_fbo_allocated(gpu, size),
            Ok(None) => {}
            Err(e) => {
                error!(stage = self.name(), error = %e, "fbo allocation failed; stage disabled");
                self.release(gpu);
                return;
            }
        }
        debug!(stage = self.name(), view = %view, "prepared");
    }

    fn draw(&mut self, gpu: &dyn Gpu) {
        if !self.core().drawable() || !self.wants_draw() {
            return;
        }

        match self.core_mut().ensure_fbo(gpu) {
            Ok(Some(size)) => self.on_fbo_allocated(gpu, size),
            Ok(None) => {}
            Err(e) => {
                error!(stage = self.name(), error = %e, "fbo allocation failed; stage disabled");
                self.release(gpu);
                return;
            }
        }

        if self.core().size_changed {
            self.core_mut().size_changed = false;
            self.on_size_changed(gpu);
        }

        let core = self.core();
        let fbo = core.fbo.as_ref().map(|f| (f.framebuffer, f.size));
        match fbo {
            Some((framebuffer, size)) => {
                gpu.bind_framebuffer(Some(framebuffer));
                gpu.viewport(0, 0, size.width as i32, size.height as i32);
            }
            None => {
                let view = core.view_size;
                gpu.bind_framebuffer(None);
                gpu.viewport(0, 0, view.width as i32, view.height as i32);
            }
        }

        self.on_draw(gpu);

        if fbo.is_some() {
            gpu.bind_framebuffer(None);
        }
    }

    /// Frees the FBO triple, then the program, then stage-specific objects.
    fn release(&mut self, gpu: &dyn Gpu) {
        let core = self.core_mut();
        if core.state == StageState::Released && core.program.is_none() && core.fbo.is_none() {
            return;
        }
        core.state = StageState::Released;
        if let Some(fbo) = core.fbo.take() {
            gpu.delete_fbo_triple(&fbo);
        }
        if let Some(p) = core.program.take() {
            gpu.delete_program(p);
        }
        core.input = None;
        self.on_release(gpu);
        debug!(stage = self.name(), "released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{QuadDraw, TextureTarget, QUAD_POSITIONS, QUAD_TEX_COORDS};
    use crate::testing::{FakeGpu, GpuCall};

    struct TestStage {
        core: StageCore,
        draws: usize,
        size_changes: usize,
        allocations: Vec<Size>,
    }

    impl TestStage {
        fn new(fbo_backed: bool) -> Self {
            Self::with_core(StageCore::new("test-stage", shaders::TEXTURE, fbo_backed))
        }

        fn filter() -> Self {
            Self::with_core(StageCore::filter("test-stage", shaders::TEXTURE))
        }

        fn with_core(core: StageCore) -> Self {
            Self {
                core,
                draws: 0,
                size_changes: 0,
                allocations: Vec::new(),
            }
        }
    }

    impl RenderStage for TestStage {
        fn core(&self) -> &StageCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut StageCore {
            &mut self.core
        }
        fn on_fbo_allocated(&mut self, _gpu: &dyn Gpu, size: Size) {
            self.allocations.push(size);
        }
        fn on_size_changed(&mut self, _gpu: &dyn Gpu) {
            self.size_changes += 1;
        }
        fn on_draw(&mut self, gpu: &dyn Gpu) {
            self.draws += 1;
            if let (Some(program), Some(texture)) = (self.core.program(), self.core.input()) {
                gpu.draw_quad(&QuadDraw {
                    program,
                    texture,
                    target: TextureTarget::Texture2D,
                    vertex_matrix: self.core.vertex_matrix(),
                    texture_matrix: &Mat4::IDENTITY,
                    positions: &QUAD_POSITIONS,
                    tex_coords: &QUAD_TEX_COORDS,
                });
            }
        }
    }

    #[test]
    fn filter_stage_is_flipped_once_at_creation() {
        let gpu = FakeGpu::new();
        let mut s = TestStage::filter();
        assert!(s.core.is_fbo_backed());
        assert!(s.create(&gpu));
        assert!(s.create(&gpu), "create is idempotent");
        assert_eq!(s.core.vertex_matrix().0[5], -1.0);

        let mut plain_fbo = TestStage::new(true);
        plain_fbo.create(&gpu);
        assert_eq!(plain_fbo.core.vertex_matrix().0[5], 1.0);

        let mut direct = TestStage::new(false);
        direct.create(&gpu);
        assert_eq!(direct.core.vertex_matrix().0[5], 1.0);
    }

    #[test]
    fn data_size_change_reallocates_on_next_draw() {
        let gpu = FakeGpu::new();
        let mut s = TestStage::new(true);
        s.set_data_size(Size::new(64, 32));
        s.create(&gpu);
        s.prepare(&gpu, Size::new(100, 100));
        s.draw(&gpu);
        assert_eq!(s.allocations, vec![Size::new(64, 32)]);

        s.set_data_size(Size::new(64, 32));
        s.draw(&gpu);
        assert_eq!(s.allocations.len(), 1, "same size keeps the triple");

        s.set_data_size(Size::new(32, 16));
        assert_eq!(s.allocations.len(), 1, "re-creation is deferred to draw");
        s.draw(&gpu);
        assert_eq!(s.allocations, vec![Size::new(64, 32), Size::new(32, 16)]);
        assert_eq!(gpu.count(|c| matches!(c, GpuCall::DeleteFboTriple(_))), 1);
        assert_eq!(s.size_changes, 2);
    }

    #[test]
    fn draw_waits_for_both_sizes() {
        let gpu = FakeGpu::new();
        let mut s = TestStage::new(false);
        s.create(&gpu);
        s.prepare(&gpu, Size::new(100, 100));
        gpu.take_calls();
        s.draw(&gpu);
        assert_eq!(s.draws, 0);
        assert!(gpu.calls().is_empty());

        s.set_data_size(Size::new(10, 10));
        s.draw(&gpu);
        assert_eq!(s.draws, 1);
        assert!(gpu.calls().contains(&GpuCall::Viewport(0, 0, 100, 100)));
    }

    #[test]
    fn failed_link_disables_stage() {
        let gpu = FakeGpu::new();
        gpu.fail_program(shaders::TEXTURE);
        let mut s = TestStage::new(true);
        assert!(!s.create(&gpu));
        assert_eq!(s.state(), StageState::Released);

        s.prepare(&gpu, Size::new(8, 8));
        s.set_data_size(Size::new(8, 8));
        s.draw(&gpu);
        assert_eq!(s.draws, 0);
        assert_eq!(s.output_texture(), None);
    }

    #[test]
    fn release_frees_fbo_before_program_and_is_terminal() {
        let gpu = FakeGpu::new();
        let mut s = TestStage::new(true);
        s.set_data_size(Size::new(4, 4));
        s.create(&gpu);
        s.prepare(&gpu, Size::new(4, 4));
        gpu.take_calls();

        s.release(&gpu);
        let calls = gpu.take_calls();
        assert!(matches!(calls[0], GpuCall::DeleteFboTriple(_)));
        assert!(matches!(calls[1], GpuCall::DeleteProgram(_)));

        s.release(&gpu);
        assert!(!s.create(&gpu));
        assert!(gpu.calls().is_empty());
    }
}
