//! The overlay controller: the single entry point event sources call.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::task::{LocalSpawn, LocalSpawnExt};

use crate::config::RippleConfig;
use crate::engine::{FrameStep, ResumeOutcome, RippleEngine, RippleRenderer, RippleState, TriggerOutcome};
use crate::error::RippleError;
use crate::geometry::{CssPoint, Viewport};
use crate::snapshot::{CaptureResult, PageCapture, SnapshotPipeline};
use crate::surface::{OverlaySurface, SurfaceManager};

/// Signals read from the host environment. All are re-read on every use, so
/// changes take effect on the next frame or trigger.
pub trait Environment {
    /// Monotonic time in seconds.
    fn now(&self) -> f64;
    fn viewport(&self) -> Viewport;
    fn prefers_reduced_motion(&self) -> bool;
}

/// Drives the render loop: one callback into `RippleOverlay::frame` per request.
pub trait FrameScheduler {
    /// Ask for one frame. Requests while one is pending are merged. Returns
    /// false when no frame will come.
    fn request_frame(&self) -> bool;
    fn cancel_frame(&self);
}

/// Everything a host provides to run the overlay.
pub trait Platform: Sized + 'static {
    type Bitmap: Clone + 'static;
    type Renderer: RippleRenderer<Bitmap = Self::Bitmap> + 'static;
    type Capture: PageCapture<Bitmap = Self::Bitmap> + 'static;
    type Surface: OverlaySurface + 'static;
    type Env: Environment + 'static;
    type Frames: FrameScheduler + 'static;
    type Spawner: LocalSpawn + 'static;
}

pub struct OverlayParts<P: Platform> {
    pub config: RippleConfig,
    pub renderer: P::Renderer,
    pub capture: P::Capture,
    pub surface: P::Surface,
    pub env: P::Env,
    pub spawner: P::Spawner,
}

pub struct RippleOverlay<P: Platform> {
    engine: RefCell<RippleEngine<P::Renderer, P::Surface>>,
    pipeline: SnapshotPipeline<P::Capture, P::Surface>,
    env: P::Env,
    frames: P::Frames,
    spawner: P::Spawner,
}

impl<P: Platform> RippleOverlay<P> {
    /// Build the overlay. `frames` receives a weak handle so its callbacks can
    /// reach the overlay without keeping it alive.
    pub fn new(parts: OverlayParts<P>, frames: impl FnOnce(Weak<Self>) -> P::Frames) -> Rc<Self> {
        let viewport = parts.env.viewport();
        let surface = SurfaceManager::new(parts.surface, &viewport, parts.config.z_index);
        let pipeline = SnapshotPipeline::new(parts.capture, Rc::clone(&surface));
        let engine = RippleEngine::new(parts.config, parts.renderer, surface);
        log::info!(
            "ripple overlay ready ({}x{} @{}x)",
            viewport.width,
            viewport.height,
            viewport.dpr()
        );

        Rc::new_cyclic(|weak| RippleOverlay {
            engine: RefCell::new(engine),
            pipeline,
            env: parts.env,
            frames: frames(weak.clone()),
            spawner: parts.spawner,
        })
    }

    pub fn state(&self) -> RippleState {
        self.engine.borrow().state()
    }

    pub fn surface(&self) -> Rc<SurfaceManager<P::Surface>> {
        Rc::clone(self.engine.borrow().surface())
    }

    pub fn pipeline(&self) -> &SnapshotPipeline<P::Capture, P::Surface> {
        &self.pipeline
    }

    pub fn is_released(&self) -> bool {
        self.engine.borrow().is_released()
    }

    /// Start a ripple centered on `point` (viewport CSS pixels).
    pub fn trigger(self: &Rc<Self>, point: CssPoint) {
        if self.is_released() {
            return;
        }
        if self.env.prefers_reduced_motion() {
            log::debug!("reduced motion preferred, trigger ignored");
            return;
        }

        let now = self.env.now();
        let viewport = self.env.viewport();
        let cached = self.pipeline.reusable(&viewport);
        let outcome = self
            .engine
            .borrow_mut()
            .trigger(point, &viewport, cached.as_ref(), now);

        match outcome {
            TriggerOutcome::Started { start_loop } => {
                if start_loop {
                    self.request_frame();
                }
            }
            TriggerOutcome::NeedsSnapshot { generation } => self.await_snapshot(generation, &viewport),
            TriggerOutcome::Ignored => {}
        }
    }

    fn await_snapshot(self: &Rc<Self>, generation: u64, viewport: &Viewport) {
        let capture = self.pipeline.capture(viewport);
        let this = Rc::clone(self);
        self.spawn(async move {
            let result = capture.await;
            this.resume(generation, result);
        });
    }

    fn resume(self: &Rc<Self>, generation: u64, result: CaptureResult<P::Bitmap>) {
        let now = self.env.now();
        let viewport = self.env.viewport();
        // A joined capture may have been started before the page scrolled.
        if let Ok(snapshot) = &result {
            if !snapshot.matches(&viewport) && self.engine.borrow().is_pending(generation) {
                log::debug!("snapshot for trigger #{generation} is out of date, capturing again");
                self.await_snapshot(generation, &viewport);
                return;
            }
        }
        let outcome = self
            .engine
            .borrow_mut()
            .resume(generation, result, &viewport, now);
        match outcome {
            ResumeOutcome::Started { start_loop: true } => self.request_frame(),
            ResumeOutcome::Started { start_loop: false } | ResumeOutcome::Superseded => {}
            ResumeOutcome::Dropped(err) => log::debug!("trigger #{generation} dropped: {err}"),
        }
    }

    /// Frame callback. Draws while animating and reschedules itself until the fade ends.
    pub fn frame(self: &Rc<Self>) {
        let now = self.env.now();
        let viewport = self.env.viewport();
        let step = self.engine.borrow_mut().step(&viewport, now);
        match step {
            FrameStep::Continue | FrameStep::FadeStarted => self.request_frame(),
            FrameStep::Stopped { refresh_snapshot } => {
                if refresh_snapshot {
                    self.refresh_snapshot();
                }
            }
        }
    }

    /// The surface's opacity transition ended.
    pub fn fade_finished(self: &Rc<Self>) {
        let done = self.engine.borrow_mut().finish_fade();
        if let Some(done) = done {
            self.frames.cancel_frame();
            if done.refresh_snapshot {
                self.refresh_snapshot();
            }
        }
    }

    /// Capture in the background so the next trigger has a fresh snapshot.
    fn refresh_snapshot(self: &Rc<Self>) {
        if !self.surface().is_hidden() {
            return;
        }
        let capture = self.pipeline.capture(&self.env.viewport());
        self.spawn(async move {
            if let Err(err) = capture.await {
                log::debug!("background capture failed: {err}");
            }
        });
    }

    /// Viewport or device pixel ratio changed.
    pub fn resize(&self) {
        let viewport = self.env.viewport();
        self.engine.borrow_mut().resize(&viewport);
    }

    /// Stop the loop and free GPU resources. Idempotent.
    pub fn release(&self) {
        if self.is_released() {
            return;
        }
        self.frames.cancel_frame();
        self.engine.borrow_mut().release();
        self.pipeline.clear();
        log::info!("ripple overlay released");
    }

    fn request_frame(&self) {
        if !self.frames.request_frame() {
            self.engine.borrow_mut().abort_loop();
        }
    }

    fn spawn(&self, task: impl std::future::Future<Output = ()> + 'static) {
        if let Err(err) = self.spawner.spawn_local(task) {
            log::warn!("{}", RippleError::Platform(format!("spawn failed: {err}")));
        }
    }
}
