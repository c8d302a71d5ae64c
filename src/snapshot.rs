//! Page snapshots: capture, in-flight sharing and the last-snapshot cache.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture, Shared};

use crate::error::RippleError;
use crate::geometry::{CaptureRegion, Viewport};
use crate::surface::{OverlaySurface, SurfaceManager};

/// Renders the page into a bitmap of the viewport region.
///
/// `capture` must start the work before returning (the overlay is hidden only
/// around the call and the returned future).
pub trait PageCapture {
    type Bitmap: Clone + 'static;

    fn capture(&self, region: CaptureRegion) -> CaptureFuture<Self::Bitmap>;
}

/// Boxed bitmap future returned by `PageCapture::capture`.
pub type CaptureFuture<B> = LocalBoxFuture<'static, Result<B, RippleError>>;

/// The page as it looked when `region` was captured.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<B> {
    bitmap: B,
    region: CaptureRegion,
}

impl<B> Snapshot<B> {
    pub fn new(bitmap: B, region: CaptureRegion) -> Self {
        Snapshot { bitmap, region }
    }

    pub fn bitmap(&self) -> &B {
        &self.bitmap
    }

    pub fn region(&self) -> CaptureRegion {
        self.region
    }

    /// Whether this snapshot shows what `viewport` shows now: same scroll
    /// offset, same device size.
    pub fn matches(&self, viewport: &Viewport) -> bool {
        self.region == viewport.capture_region()
    }
}

pub type CaptureResult<B> = Result<Snapshot<B>, RippleError>;
pub type SharedCapture<B> = Shared<LocalBoxFuture<'static, CaptureResult<B>>>;

struct PipelineState<B> {
    in_flight: Option<SharedCapture<B>>,
    last: Option<Snapshot<B>>,
    started: u64,
}

/// At most one capture runs at a time; every caller arriving meanwhile gets
/// the same pending result. The latest successful capture is cached.
pub struct SnapshotPipeline<C: PageCapture, S> {
    capture: C,
    surface: Rc<SurfaceManager<S>>,
    state: Rc<RefCell<PipelineState<C::Bitmap>>>,
}

impl<C: PageCapture, S: OverlaySurface + 'static> SnapshotPipeline<C, S> {
    pub fn new(capture: C, surface: Rc<SurfaceManager<S>>) -> Self {
        SnapshotPipeline {
            capture,
            surface,
            state: Rc::new(RefCell::new(PipelineState {
                in_flight: None,
                last: None,
                started: 0,
            })),
        }
    }

    /// Capture the visible part of the page, or join the capture already running.
    pub fn capture(&self, viewport: &Viewport) -> SharedCapture<C::Bitmap> {
        if let Some(pending) = self.state.borrow().in_flight.clone() {
            log::debug!("joining in-flight capture");
            return pending;
        }

        let region = viewport.capture_region();
        let hold = self.surface.hold_for_capture();
        let exposures = self.surface.exposures();
        let work = self.capture.capture(region);
        let state = Rc::clone(&self.state);
        let surface = Rc::clone(&self.surface);

        let shared = async move {
            let result = work.await.map(|bitmap| Snapshot::new(bitmap, region));
            drop(hold);
            let mut state = state.borrow_mut();
            state.in_flight = None;
            match &result {
                // A ripple shown mid-capture may be baked into the bitmap.
                Ok(_) if surface.exposures() != exposures => {
                    log::debug!("overlay was visible during capture, result not cached")
                }
                Ok(snapshot) => state.last = Some(snapshot.clone()),
                Err(err) => log::warn!("snapshot capture failed: {err}"),
            }
            result
        }
        .boxed_local()
        .shared();

        let mut state = self.state.borrow_mut();
        state.started += 1;
        state.in_flight = Some(shared.clone());
        log::debug!(
            "capture #{} started at ({}, {}) {}x{}",
            state.started,
            region.x,
            region.y,
            region.width,
            region.height
        );
        shared
    }

    pub fn is_capturing(&self) -> bool {
        self.state.borrow().in_flight.is_some()
    }

    pub fn last(&self) -> Option<Snapshot<C::Bitmap>> {
        self.state.borrow().last.clone()
    }

    /// The cached snapshot if an idle trigger may use it right away: the
    /// viewport still shows the region it was cropped from. A capture running
    /// in the background does not make it unusable.
    pub fn reusable(&self, viewport: &Viewport) -> Option<Snapshot<C::Bitmap>> {
        let state = self.state.borrow();
        state.last.as_ref().filter(|s| s.matches(viewport)).cloned()
    }

    /// Number of underlying captures started so far.
    pub fn captures_started(&self) -> u64 {
        self.state.borrow().started
    }

    pub fn clear(&self) {
        self.state.borrow_mut().last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DeviceSize;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use std::cell::Cell;

    struct NullSurface;

    impl OverlaySurface for NullSurface {
        fn apply_opacity(&self, _opacity: f32) {}
        fn apply_size(&self, _size: DeviceSize, _css: (f64, f64)) {}
        fn apply_z_index(&self, _z_index: i32) {}
    }

    #[derive(Default)]
    struct Gate {
        calls: Cell<u32>,
        senders: RefCell<Vec<oneshot::Sender<Result<u32, RippleError>>>>,
    }

    impl PageCapture for Rc<Gate> {
        type Bitmap = u32;

        fn capture(&self, _region: CaptureRegion) -> CaptureFuture<u32> {
            self.calls.set(self.calls.get() + 1);
            let (tx, rx) = oneshot::channel();
            self.senders.borrow_mut().push(tx);
            async move {
                rx.await
                    .unwrap_or_else(|_| Err(RippleError::Capture("cancelled".into())))
            }
            .boxed_local()
        }
    }

    fn pipeline() -> (Rc<Gate>, Rc<SurfaceManager<NullSurface>>, SnapshotPipeline<Rc<Gate>, NullSurface>) {
        let gate = Rc::new(Gate::default());
        let vp = Viewport::new(100.0, 100.0, 1.0);
        let surface = SurfaceManager::new(NullSurface, &vp, 1);
        let p = SnapshotPipeline::new(Rc::clone(&gate), Rc::clone(&surface));
        (gate, surface, p)
    }

    fn complete(gate: &Gate, value: Result<u32, RippleError>) {
        let tx = gate.senders.borrow_mut().remove(0);
        tx.send(value).ok();
    }

    #[test]
    fn concurrent_callers_share_one_capture() {
        let (gate, surface, p) = pipeline();
        let vp = Viewport::new(100.0, 100.0, 1.0);
        let waiters: Vec<_> = (0..5).map(|_| p.capture(&vp)).collect();
        assert_eq!(gate.calls.get(), 1);
        assert_eq!(p.captures_started(), 1);
        assert!(p.is_capturing());
        assert!(surface.is_held());

        complete(&gate, Ok(7));
        for w in waiters {
            let snap = block_on(w).unwrap();
            assert_eq!(*snap.bitmap(), 7);
        }
        assert!(!p.is_capturing());
        assert!(!surface.is_held());
        assert_eq!(p.last().map(|s| *s.bitmap()), Some(7));
    }

    #[test]
    fn next_capture_after_completion_runs_again() {
        let (gate, _surface, p) = pipeline();
        let vp = Viewport::new(100.0, 100.0, 1.0);
        let first = p.capture(&vp);
        complete(&gate, Ok(1));
        block_on(first).unwrap();

        let second = p.capture(&vp);
        assert_eq!(gate.calls.get(), 2);
        complete(&gate, Ok(2));
        assert_eq!(*block_on(second).unwrap().bitmap(), 2);
        assert_eq!(p.last().map(|s| *s.bitmap()), Some(2));
    }

    #[test]
    fn failure_reaches_every_waiter_and_keeps_old_cache() {
        let (gate, surface, p) = pipeline();
        let vp = Viewport::new(100.0, 100.0, 1.0);
        let ok = p.capture(&vp);
        complete(&gate, Ok(1));
        block_on(ok).unwrap();

        let a = p.capture(&vp);
        let b = p.capture(&vp);
        complete(&gate, Err(RippleError::Capture("tainted".into())));
        assert_eq!(block_on(a), Err(RippleError::Capture("tainted".into())));
        assert!(block_on(b).is_err());
        assert_eq!(p.last().map(|s| *s.bitmap()), Some(1));
        assert!(!surface.is_held());
    }

    #[test]
    fn reuse_requires_same_region_even_while_capturing() {
        let (gate, _surface, p) = pipeline();
        let vp = Viewport::new(100.0, 100.0, 1.0);
        assert!(p.reusable(&vp).is_none());

        let first = p.capture(&vp);
        complete(&gate, Ok(1));
        block_on(first).unwrap();
        assert!(p.reusable(&vp).is_some());
        assert!(p.reusable(&vp.scrolled(0.0, 40.0)).is_none());
        assert!(p.reusable(&Viewport::new(120.0, 100.0, 1.0)).is_none());

        let _running = p.capture(&vp);
        assert_eq!(p.reusable(&vp).map(|s| *s.bitmap()), Some(1));
        assert!(p.reusable(&vp.scrolled(0.0, 40.0)).is_none());
    }

    #[test]
    fn capture_the_overlay_was_shown_during_is_not_cached() {
        let (gate, surface, p) = pipeline();
        let vp = Viewport::new(100.0, 100.0, 1.0);
        let first = p.capture(&vp);
        complete(&gate, Ok(1));
        block_on(first).unwrap();

        let second = p.capture(&vp);
        surface.reveal();
        complete(&gate, Ok(2));
        assert_eq!(*block_on(second).unwrap().bitmap(), 2);
        assert_eq!(p.last().map(|s| *s.bitmap()), Some(1));
    }

    #[test]
    fn snapshot_remembers_scroll_region() {
        let (gate, _surface, p) = pipeline();
        let vp = Viewport::new(100.0, 100.0, 1.0).scrolled(0.0, 250.0);
        let c = p.capture(&vp);
        complete(&gate, Ok(3));
        let snap = block_on(c).unwrap();
        assert_eq!(snap.region().y, 250);
        assert!(snap.matches(&vp));
        assert!(!snap.matches(&Viewport::new(100.0, 100.0, 1.0)));
    }
}
