//! The ripple state machine and its per-frame stepping function.
//!
//! ```text
//! Idle ──trigger (no usable snapshot)──▶ Capturing ──snapshot──▶ Animating
//!  ▲  └──trigger (cached snapshot)────────────────────────────────▲   │
//!  │                                                              │   │ elapsed ≥ duration
//!  └──────────── fade complete ◀── Fading ◀───────────────────────┘───┘
//! ```
//!
//! A trigger while `Animating` or `Fading` restarts the ripple in place with the
//! texture already bound. A trigger while `Capturing` replaces the pending one;
//! only the most recent pending trigger proceeds once the capture resolves.

use std::rc::Rc;

use crate::config::RippleConfig;
use crate::error::RippleError;
use crate::geometry::{propagation_speed, CssPoint, DeviceSize, NormalizedPoint, Viewport};
use crate::shader::FrameUniforms;
use crate::snapshot::Snapshot;
use crate::surface::{OverlaySurface, SurfaceManager};

/// Elapsed time of the frame drawn before the surface is revealed.
const PRIMING_ELAPSED: f32 = 0.0001;
/// Slack after the opacity transition before the frame loop finishes the fade itself.
const FADE_GRACE: f64 = 0.05;

/// A renderer backend able to draw the ripple program over a snapshot.
pub trait RippleRenderer {
    type Bitmap: Clone + 'static;

    fn upload_frame_texture(&mut self, bitmap: &Self::Bitmap) -> Result<(), RippleError>;
    fn set_uniforms(&mut self, uniforms: &FrameUniforms);
    fn draw_full_screen_quad(&mut self);
    fn resize(&mut self, size: DeviceSize);
    /// Free GPU objects. Called once; later calls must be harmless.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing bound, surface hidden.
    Idle,
    /// Waiting for a snapshot, surface hidden.
    Capturing,
    /// Texture bound, surface visible, time advancing.
    Animating,
    /// Past the duration, opacity transitioning to 0.
    Fading,
}

/// Observable ripple state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RippleState {
    pub center: NormalizedPoint,
    /// Seconds on the environment's monotonic clock.
    pub start_time: f64,
    /// Device px per second.
    pub computed_speed: f64,
    pub phase: Phase,
}

impl RippleState {
    fn idle(config: &RippleConfig) -> Self {
        RippleState {
            center: NormalizedPoint::CENTER,
            start_time: 0.0,
            computed_speed: config.speed,
            phase: Phase::Idle,
        }
    }

    /// True from the moment a ripple starts until its fade completes.
    pub fn animating(&self) -> bool {
        matches!(self.phase, Phase::Animating | Phase::Fading)
    }

    pub fn fading(&self) -> bool {
        self.phase == Phase::Fading
    }
}

/// What the caller has to do after a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Ripple is visible; `start_loop` asks for the first scheduled frame.
    Started { start_loop: bool },
    /// Await a snapshot, then call `resume` with this generation.
    NeedsSnapshot { generation: u64 },
    /// The engine has been released.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    Started { start_loop: bool },
    /// A newer trigger is pending; this continuation does nothing.
    Superseded,
    /// The trigger was dropped (capture or upload failed); surface stays hidden.
    Dropped(RippleError),
}

/// Result of one frame tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    /// Drawn; schedule another frame.
    Continue,
    /// Drawn, and the fade-out began on this frame; schedule another frame.
    FadeStarted,
    /// Not drawn; stop rescheduling. `refresh_snapshot` asks for a background capture.
    Stopped { refresh_snapshot: bool },
}

/// Returned when a fade completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeComplete {
    pub refresh_snapshot: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingTrigger {
    generation: u64,
    center: NormalizedPoint,
}

pub struct RippleEngine<R, S> {
    config: RippleConfig,
    renderer: R,
    surface: Rc<SurfaceManager<S>>,
    state: RippleState,
    pending: Option<PendingTrigger>,
    generation: u64,
    fade_started_at: Option<f64>,
    loop_running: bool,
    refresh_due: bool,
    released: bool,
}

impl<R: RippleRenderer, S: OverlaySurface> RippleEngine<R, S> {
    pub fn new(config: RippleConfig, renderer: R, surface: Rc<SurfaceManager<S>>) -> Self {
        RippleEngine {
            state: RippleState::idle(&config),
            config,
            renderer,
            surface,
            pending: None,
            generation: 0,
            fade_started_at: None,
            loop_running: false,
            refresh_due: false,
            released: false,
        }
    }

    pub fn state(&self) -> RippleState {
        self.state
    }

    pub fn surface(&self) -> &Rc<SurfaceManager<S>> {
        &self.surface
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Whether the frame loop is currently scheduled.
    pub fn loop_running(&self) -> bool {
        self.loop_running
    }

    /// Record a trigger at `point`. `cached` is a snapshot an idle trigger may
    /// use without capturing; it is ignored while a ripple is already showing.
    pub fn trigger(
        &mut self,
        point: CssPoint,
        viewport: &Viewport,
        cached: Option<&Snapshot<R::Bitmap>>,
        now: f64,
    ) -> TriggerOutcome {
        if self.released {
            return TriggerOutcome::Ignored;
        }
        let center = viewport.normalize(point);
        self.state.center = center;

        match self.state.phase {
            Phase::Animating | Phase::Fading => {
                log::debug!("re-trigger at ({:.3}, {:.3})", center.x, center.y);
                self.pending = None;
                TriggerOutcome::Started {
                    start_loop: self.start(center, viewport, now),
                }
            }
            Phase::Idle | Phase::Capturing => match cached {
                Some(snapshot) => match self.renderer.upload_frame_texture(snapshot.bitmap()) {
                    Ok(()) => {
                        self.pending = None;
                        self.refresh_due = true;
                        TriggerOutcome::Started {
                            start_loop: self.start(center, viewport, now),
                        }
                    }
                    Err(err) => {
                        log::warn!("cached snapshot rejected, capturing again: {err}");
                        self.wait_for_snapshot(center)
                    }
                },
                None => self.wait_for_snapshot(center),
            },
        }
    }

    fn wait_for_snapshot(&mut self, center: NormalizedPoint) -> TriggerOutcome {
        self.generation += 1;
        self.pending = Some(PendingTrigger {
            generation: self.generation,
            center,
        });
        self.state.phase = Phase::Capturing;
        log::debug!("trigger #{} waiting for snapshot", self.generation);
        TriggerOutcome::NeedsSnapshot {
            generation: self.generation,
        }
    }

    /// Whether `generation` is the trigger still waiting for a snapshot.
    pub fn is_pending(&self, generation: u64) -> bool {
        !self.released && self.pending.is_some_and(|p| p.generation == generation)
    }

    /// Continue the trigger `generation` once its snapshot resolved.
    pub fn resume(
        &mut self,
        generation: u64,
        snapshot: Result<Snapshot<R::Bitmap>, RippleError>,
        viewport: &Viewport,
        now: f64,
    ) -> ResumeOutcome {
        let pending = match self.pending {
            Some(p) if p.generation == generation && !self.released => p,
            _ => return ResumeOutcome::Superseded,
        };
        self.pending = None;

        let uploaded = snapshot.and_then(|s| self.renderer.upload_frame_texture(s.bitmap()));
        match uploaded {
            Ok(()) => {
                self.refresh_due = true;
                ResumeOutcome::Started {
                    start_loop: self.start(pending.center, viewport, now),
                }
            }
            Err(err) => {
                log::warn!("ripple dropped: {err}");
                if self.state.phase == Phase::Capturing {
                    self.state.phase = Phase::Idle;
                }
                if !self.state.animating() {
                    self.surface.hide();
                }
                ResumeOutcome::Dropped(err)
            }
        }
    }

    /// Reset the clock, prime one frame and reveal. Returns true when the
    /// caller must schedule the first loop frame.
    fn start(&mut self, center: NormalizedPoint, viewport: &Viewport, now: f64) -> bool {
        self.state = RippleState {
            center,
            start_time: now,
            computed_speed: propagation_speed(center, viewport, self.config.duration),
            phase: Phase::Animating,
        };
        self.fade_started_at = None;
        log::debug!(
            "ripple at ({:.3}, {:.3}) speed {:.1}px/s",
            center.x,
            center.y,
            self.state.computed_speed
        );

        let uniforms = self.uniforms(viewport, PRIMING_ELAPSED);
        self.draw(&uniforms);
        self.surface.reveal();

        let start_loop = !self.loop_running;
        self.loop_running = true;
        start_loop
    }

    /// Uniforms for the current ripple at `elapsed` seconds.
    pub fn uniforms(&self, viewport: &Viewport, elapsed: f32) -> FrameUniforms {
        let size = viewport.device_size();
        let (cx, cy) = self.state.center.to_device(size);
        FrameUniforms {
            resolution: [size.width as f32, size.height as f32],
            center: [cx as f32, cy as f32],
            elapsed,
            duration: self.config.duration as f32,
            strength: (self.config.strength * viewport.dpr()) as f32,
            speed: self.state.computed_speed as f32,
            ring_width: self.config.width as f32,
        }
    }

    fn draw(&mut self, uniforms: &FrameUniforms) {
        self.renderer.set_uniforms(uniforms);
        self.renderer.draw_full_screen_quad();
    }

    /// One frame of the render loop.
    pub fn step(&mut self, viewport: &Viewport, now: f64) -> FrameStep {
        if self.released || !self.state.animating() {
            self.loop_running = false;
            return FrameStep::Stopped {
                refresh_snapshot: false,
            };
        }

        let elapsed = (now - self.state.start_time).max(0.0);
        let uniforms = self.uniforms(viewport, elapsed as f32);
        self.draw(&uniforms);

        match self.state.phase {
            Phase::Animating if elapsed >= self.config.duration => {
                self.state.phase = Phase::Fading;
                self.fade_started_at = Some(now);
                self.surface.hide();
                log::debug!("fade started after {elapsed:.3}s");
                FrameStep::FadeStarted
            }
            Phase::Fading => {
                let started = self.fade_started_at.unwrap_or(now);
                if now - started >= self.config.fade_out + FADE_GRACE {
                    let done = self.complete_fade();
                    self.loop_running = false;
                    FrameStep::Stopped {
                        refresh_snapshot: done.refresh_snapshot,
                    }
                } else {
                    FrameStep::Continue
                }
            }
            _ => FrameStep::Continue,
        }
    }

    /// The opacity transition finished. Ignored unless a fade is running, so a
    /// late signal from an earlier fade cannot end a restarted ripple.
    pub fn finish_fade(&mut self) -> Option<FadeComplete> {
        if self.state.phase != Phase::Fading {
            return None;
        }
        self.loop_running = false;
        Some(self.complete_fade())
    }

    fn complete_fade(&mut self) -> FadeComplete {
        self.state.phase = Phase::Idle;
        self.fade_started_at = None;
        let refresh_snapshot = std::mem::take(&mut self.refresh_due) && !self.released;
        log::debug!("ripple finished");
        FadeComplete { refresh_snapshot }
    }

    /// Track a viewport change. The running ripple keeps its normalized center;
    /// the next frame picks up the new resolution.
    pub fn resize(&mut self, viewport: &Viewport) {
        if self.released {
            return;
        }
        if self.surface.resize(viewport) {
            self.renderer.resize(viewport.device_size());
        }
    }

    /// The frame loop could not be scheduled. Drop the running ripple and hide
    /// the surface so the page is never left distorted.
    pub fn abort_loop(&mut self) {
        self.loop_running = false;
        self.fade_started_at = None;
        if self.state.animating() {
            log::warn!("frame loop unavailable, ripple dropped");
            self.state.phase = Phase::Idle;
        }
        self.surface.hide();
    }

    /// Free GPU resources and settle the surface hidden. Every later call is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.pending = None;
        self.loop_running = false;
        self.refresh_due = false;
        self.state.phase = Phase::Idle;
        self.surface.hide();
        self.renderer.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CaptureRegion;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Log {
        uploads: Vec<u32>,
        uniforms: Vec<FrameUniforms>,
        draws: usize,
        resizes: Vec<DeviceSize>,
        released: usize,
        reject_uploads: bool,
    }

    struct Fake(Rc<RefCell<Log>>);

    impl RippleRenderer for Fake {
        type Bitmap = u32;

        fn upload_frame_texture(&mut self, bitmap: &u32) -> Result<(), RippleError> {
            let mut log = self.0.borrow_mut();
            if log.reject_uploads {
                return Err(RippleError::TextureUpload("context lost".into()));
            }
            log.uploads.push(*bitmap);
            Ok(())
        }
        fn set_uniforms(&mut self, uniforms: &FrameUniforms) {
            self.0.borrow_mut().uniforms.push(*uniforms);
        }
        fn draw_full_screen_quad(&mut self) {
            self.0.borrow_mut().draws += 1;
        }
        fn resize(&mut self, size: DeviceSize) {
            self.0.borrow_mut().resizes.push(size);
        }
        fn release(&mut self) {
            self.0.borrow_mut().released += 1;
        }
    }

    struct Surface;

    impl OverlaySurface for Surface {
        fn apply_opacity(&self, _opacity: f32) {}
        fn apply_size(&self, _size: DeviceSize, _css: (f64, f64)) {}
        fn apply_z_index(&self, _z_index: i32) {}
    }

    fn viewport() -> Viewport {
        Viewport::new(1000.0, 800.0, 2.0)
    }

    fn engine() -> (Rc<RefCell<Log>>, RippleEngine<Fake, Surface>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let surface = SurfaceManager::new(Surface, &viewport(), 9999);
        let engine = RippleEngine::new(RippleConfig::default(), Fake(Rc::clone(&log)), surface);
        (log, engine)
    }

    fn snap(id: u32) -> Snapshot<u32> {
        Snapshot::new(id, viewport().capture_region())
    }

    #[test]
    fn cached_trigger_primes_then_reveals() {
        let (log, mut e) = engine();
        let out = e.trigger(CssPoint::new(500.0, 400.0), &viewport(), Some(&snap(1)), 10.0);
        assert_eq!(out, TriggerOutcome::Started { start_loop: true });

        let st = e.state();
        assert_eq!(st.phase, Phase::Animating);
        assert_eq!(st.center, NormalizedPoint { x: 0.5, y: 0.5 });
        assert_eq!(st.start_time, 10.0);
        assert!((st.computed_speed - 1237.91).abs() < 0.01);

        let log = log.borrow();
        assert_eq!(log.uploads, vec![1]);
        assert_eq!(log.draws, 1);
        assert_eq!(log.uniforms[0].elapsed, PRIMING_ELAPSED);
        assert_eq!(log.uniforms[0].center, [1000.0, 800.0]);
        assert_eq!(log.uniforms[0].strength, 44.0);
        assert_eq!(e.surface().opacity(), 1.0);
    }

    #[test]
    fn missing_snapshot_waits_and_last_pending_wins() {
        let (log, mut e) = engine();
        let vp = viewport();
        let a = e.trigger(CssPoint::new(100.0, 100.0), &vp, None, 0.0);
        let b = e.trigger(CssPoint::new(900.0, 700.0), &vp, None, 0.01);
        assert_eq!(a, TriggerOutcome::NeedsSnapshot { generation: 1 });
        assert_eq!(b, TriggerOutcome::NeedsSnapshot { generation: 2 });
        assert_eq!(e.state().phase, Phase::Capturing);
        assert_eq!(e.surface().opacity(), 0.0);

        assert_eq!(e.resume(1, Ok(snap(5)), &vp, 0.2), ResumeOutcome::Superseded);
        assert_eq!(
            e.resume(2, Ok(snap(5)), &vp, 0.2),
            ResumeOutcome::Started { start_loop: true }
        );
        assert_eq!(e.state().center, NormalizedPoint { x: 0.9, y: 0.875 });
        assert_eq!(log.borrow().uploads, vec![5]);
    }

    #[test]
    fn failed_capture_drops_trigger_hidden() {
        let (log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(1.0, 1.0), &vp, None, 0.0);
        let out = e.resume(1, Err(RippleError::Capture("cross-origin".into())), &vp, 0.1);
        assert!(matches!(out, ResumeOutcome::Dropped(RippleError::Capture(_))));
        assert_eq!(e.state().phase, Phase::Idle);
        assert_eq!(e.surface().opacity(), 0.0);
        assert_eq!(log.borrow().draws, 0);
        assert!(!e.loop_running());
    }

    #[test]
    fn rejected_upload_drops_trigger() {
        let (log, mut e) = engine();
        log.borrow_mut().reject_uploads = true;
        let vp = viewport();
        let out = e.trigger(CssPoint::new(1.0, 1.0), &vp, Some(&snap(1)), 0.0);
        assert_eq!(out, TriggerOutcome::NeedsSnapshot { generation: 1 });
        let out = e.resume(1, Ok(snap(2)), &vp, 0.1);
        assert!(matches!(out, ResumeOutcome::Dropped(RippleError::TextureUpload(_))));
        assert_eq!(e.surface().opacity(), 0.0);
    }

    #[test]
    fn frames_advance_then_fade_once() {
        let (log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(500.0, 400.0), &vp, Some(&snap(1)), 0.0);

        assert_eq!(e.step(&vp, 0.5), FrameStep::Continue);
        assert_eq!(e.step(&vp, 1.1), FrameStep::FadeStarted);
        assert!(e.state().fading());
        assert_eq!(e.surface().opacity(), 0.0);
        assert_eq!(e.step(&vp, 1.15), FrameStep::Continue);

        let elapsed: Vec<f32> = log.borrow().uniforms.iter().map(|u| u.elapsed).collect();
        assert!(elapsed.windows(2).all(|w| w[1] > w[0]));

        assert_eq!(e.finish_fade(), Some(FadeComplete { refresh_snapshot: true }));
        assert_eq!(e.state().phase, Phase::Idle);
        assert_eq!(e.finish_fade(), None);
        assert_eq!(e.step(&vp, 1.2), FrameStep::Stopped { refresh_snapshot: false });
    }

    #[test]
    fn fade_completes_without_transition_signal() {
        let (_log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(500.0, 400.0), &vp, Some(&snap(1)), 0.0);
        assert_eq!(e.step(&vp, 1.2), FrameStep::FadeStarted);
        assert_eq!(e.step(&vp, 1.3), FrameStep::Continue);
        assert_eq!(e.step(&vp, 1.4), FrameStep::Stopped { refresh_snapshot: true });
        assert!(!e.state().animating());
        assert!(!e.loop_running());
    }

    #[test]
    fn retrigger_restarts_in_place() {
        let (log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(100.0, 100.0), &vp, Some(&snap(1)), 0.0);
        e.step(&vp, 0.3);
        let out = e.trigger(CssPoint::new(700.0, 200.0), &vp, Some(&snap(2)), 0.4);
        assert_eq!(out, TriggerOutcome::Started { start_loop: false });
        assert_eq!(e.state().start_time, 0.4);
        assert_eq!(e.state().center, NormalizedPoint { x: 0.7, y: 0.25 });
        // texture stays bound; no mid-animation upload
        assert_eq!(log.borrow().uploads, vec![1]);
    }

    #[test]
    fn retrigger_while_fading_ignores_stale_transition_end() {
        let (_log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(100.0, 100.0), &vp, Some(&snap(1)), 0.0);
        e.step(&vp, 1.2);
        assert!(e.state().fading());
        e.trigger(CssPoint::new(200.0, 100.0), &vp, None, 1.21);
        assert_eq!(e.state().phase, Phase::Animating);
        assert_eq!(e.surface().opacity(), 1.0);
        assert_eq!(e.finish_fade(), None);
        assert_eq!(e.step(&vp, 1.5), FrameStep::Continue);
    }

    #[test]
    fn resize_mid_animation_updates_next_frame() {
        let (log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(500.0, 400.0), &vp, Some(&snap(1)), 0.0);
        let bigger = Viewport::new(1200.0, 900.0, 2.0);
        e.resize(&bigger);
        assert_eq!(e.step(&bigger, 0.2), FrameStep::Continue);
        let last = *log.borrow().uniforms.last().unwrap();
        assert_eq!(last.resolution, [2400.0, 1800.0]);
        assert_eq!(last.center, [1200.0, 900.0]);
        assert_eq!(log.borrow().resizes, vec![DeviceSize { width: 2400, height: 1800 }]);
    }

    #[test]
    fn only_the_latest_trigger_is_pending() {
        let (_log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(1.0, 1.0), &vp, None, 0.0);
        e.trigger(CssPoint::new(2.0, 2.0), &vp, None, 0.0);
        assert!(!e.is_pending(1));
        assert!(e.is_pending(2));
        e.resume(2, Ok(snap(1)), &vp, 0.1);
        assert!(!e.is_pending(2));
    }

    #[test]
    fn aborted_loop_hides_and_allows_a_fresh_start() {
        let (_log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(500.0, 400.0), &vp, Some(&snap(1)), 0.0);
        assert!(e.loop_running());

        e.abort_loop();
        assert_eq!(e.state().phase, Phase::Idle);
        assert!(!e.loop_running());
        assert_eq!(e.surface().opacity(), 0.0);

        let out = e.trigger(CssPoint::new(500.0, 400.0), &vp, Some(&snap(1)), 1.0);
        assert_eq!(out, TriggerOutcome::Started { start_loop: true });
    }

    #[test]
    fn release_is_idempotent_and_final() {
        let (log, mut e) = engine();
        let vp = viewport();
        e.trigger(CssPoint::new(500.0, 400.0), &vp, Some(&snap(1)), 0.0);
        e.release();
        e.release();
        assert_eq!(log.borrow().released, 1);
        assert_eq!(e.surface().opacity(), 0.0);
        assert_eq!(e.trigger(CssPoint::new(1.0, 1.0), &vp, None, 1.0), TriggerOutcome::Ignored);
        assert_eq!(e.step(&vp, 1.0), FrameStep::Stopped { refresh_snapshot: false });
    }

    #[test]
    fn snapshot_region_is_carried() {
        let s = snap(1);
        let r: CaptureRegion = s.region();
        assert_eq!(r.width, 2000);
    }
}
