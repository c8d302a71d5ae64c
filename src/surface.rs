//! Output surface bookkeeping: size, stacking order and the reveal/fade toggle.

use std::cell::Cell;
use std::rc::Rc;

use crate::geometry::{DeviceSize, Viewport};

/// The platform's overlay layer. Implementations only apply what they are told;
/// all decisions live in `SurfaceManager`.
pub trait OverlaySurface {
    /// Set the applied opacity (0 or 1). The platform animates the change.
    fn apply_opacity(&self, opacity: f32);
    /// Resize the backing store to `size` while displaying at CSS size `css`.
    fn apply_size(&self, size: DeviceSize, css: (f64, f64));
    fn apply_z_index(&self, z_index: i32);
}

/// Owns the desired opacity and the capture hold.
///
/// While any capture holds the surface, the applied opacity is 0 so the overlay
/// never ends up inside its own snapshot. Releasing the last hold re-applies
/// whatever opacity is desired at that moment.
///
/// A ripple revealed while a capture runs is shown at once rather than waiting
/// for the capture. The hold is then broken, and `exposures` counts it so the
/// capture knows its result may contain the overlay.
pub struct SurfaceManager<S> {
    surface: S,
    desired: Cell<f32>,
    holds: Cell<u32>,
    exposed: Cell<bool>,
    exposures: Cell<u64>,
    size: Cell<DeviceSize>,
}

impl<S: OverlaySurface> SurfaceManager<S> {
    pub fn new(surface: S, viewport: &Viewport, z_index: i32) -> Rc<Self> {
        let manager = Rc::new(SurfaceManager {
            surface,
            desired: Cell::new(0.0),
            holds: Cell::new(0),
            exposed: Cell::new(false),
            exposures: Cell::new(0),
            size: Cell::new(viewport.device_size()),
        });
        manager.surface.apply_z_index(z_index);
        manager.surface.apply_opacity(0.0);
        manager.apply_size(viewport);
        manager
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn size(&self) -> DeviceSize {
        self.size.get()
    }

    /// Recompute the backing-store size. Returns true when it changed.
    pub fn resize(&self, viewport: &Viewport) -> bool {
        let size = viewport.device_size();
        let changed = size != self.size.get();
        if changed {
            log::debug!("surface resized to {}x{}", size.width, size.height);
        }
        self.apply_size(viewport);
        changed
    }

    fn apply_size(&self, viewport: &Viewport) {
        let size = viewport.device_size();
        self.size.set(size);
        self.surface.apply_size(size, (viewport.width, viewport.height));
    }

    pub fn reveal(&self) {
        let before = self.opacity();
        if self.is_held() && !self.exposed.get() {
            self.exposed.set(true);
            self.exposures.set(self.exposures.get() + 1);
            log::debug!("overlay revealed over a running capture");
        }
        self.desired.set(1.0);
        if self.opacity() != before {
            self.surface.apply_opacity(1.0);
        }
    }

    pub fn hide(&self) {
        self.set_opacity(0.0);
    }

    /// Opacity the engine asked for, regardless of capture holds.
    pub fn desired_opacity(&self) -> f32 {
        self.desired.get()
    }

    /// Opacity currently applied to the surface.
    pub fn opacity(&self) -> f32 {
        if self.holds.get() > 0 && !self.exposed.get() {
            0.0
        } else {
            self.desired.get()
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.desired.get() == 0.0
    }

    pub fn is_held(&self) -> bool {
        self.holds.get() > 0
    }

    /// How many times a reveal has broken a capture hold.
    pub fn exposures(&self) -> u64 {
        self.exposures.get()
    }

    fn set_opacity(&self, opacity: f32) {
        let before = self.opacity();
        self.desired.set(opacity);
        let after = self.opacity();
        if before != after {
            self.surface.apply_opacity(after);
        }
    }

    /// Hide the surface until the returned guard is dropped.
    pub fn hold_for_capture(self: &Rc<Self>) -> CaptureHold<S> {
        let before = self.opacity();
        self.holds.set(self.holds.get() + 1);
        self.exposed.set(false);
        if before != 0.0 {
            self.surface.apply_opacity(0.0);
        }
        CaptureHold {
            manager: Rc::clone(self),
        }
    }
}

/// Keeps the overlay hidden while a capture runs.
pub struct CaptureHold<S: OverlaySurface> {
    manager: Rc<SurfaceManager<S>>,
}

impl<S: OverlaySurface> Drop for CaptureHold<S> {
    fn drop(&mut self) {
        let m = &self.manager;
        let before = m.opacity();
        m.holds.set(m.holds.get().saturating_sub(1));
        if m.holds.get() == 0 {
            m.exposed.set(false);
        }
        let after = m.opacity();
        if after != before {
            m.surface.apply_opacity(after);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        opacity: RefCell<Vec<f32>>,
        sizes: RefCell<Vec<DeviceSize>>,
        z: Cell<i32>,
    }

    impl OverlaySurface for Rc<Recorder> {
        fn apply_opacity(&self, opacity: f32) {
            self.opacity.borrow_mut().push(opacity);
        }
        fn apply_size(&self, size: DeviceSize, _css: (f64, f64)) {
            self.sizes.borrow_mut().push(size);
        }
        fn apply_z_index(&self, z_index: i32) {
            self.z.set(z_index);
        }
    }

    fn manager() -> (Rc<Recorder>, Rc<SurfaceManager<Rc<Recorder>>>) {
        let rec = Rc::new(Recorder::default());
        let m = SurfaceManager::new(Rc::clone(&rec), &Viewport::new(100.0, 50.0, 2.0), 42);
        (rec, m)
    }

    #[test]
    fn starts_hidden_and_sized() {
        let (rec, m) = manager();
        assert_eq!(m.opacity(), 0.0);
        assert_eq!(*rec.opacity.borrow(), vec![0.0]);
        assert_eq!(rec.z.get(), 42);
        assert_eq!(m.size(), DeviceSize { width: 200, height: 100 });
    }

    #[test]
    fn hold_hides_and_restores_prior_opacity() {
        let (rec, m) = manager();
        m.reveal();
        {
            let _hold = m.hold_for_capture();
            assert_eq!(m.opacity(), 0.0);
            assert_eq!(m.desired_opacity(), 1.0);
        }
        assert_eq!(m.opacity(), 1.0);
        assert_eq!(*rec.opacity.borrow(), vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn reveal_during_hold_shows_at_once_and_is_counted() {
        let (rec, m) = manager();
        let hold = m.hold_for_capture();
        assert_eq!(m.exposures(), 0);
        m.reveal();
        assert_eq!(m.opacity(), 1.0);
        assert_eq!(m.exposures(), 1);
        assert_eq!(*rec.opacity.borrow(), vec![0.0, 1.0]);

        // Further reveals during the same hold are not new exposures.
        m.hide();
        m.reveal();
        assert_eq!(m.exposures(), 1);

        drop(hold);
        assert_eq!(m.opacity(), 1.0);
        assert_eq!(*rec.opacity.borrow(), vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn new_hold_hides_an_exposed_surface() {
        let (_rec, m) = manager();
        let first = m.hold_for_capture();
        m.reveal();
        let second = m.hold_for_capture();
        assert_eq!(m.opacity(), 0.0);
        drop(first);
        assert_eq!(m.opacity(), 0.0);
        drop(second);
        assert_eq!(m.opacity(), 1.0);
    }

    #[test]
    fn release_keeps_surface_hidden_when_hidden_meanwhile() {
        let (rec, m) = manager();
        m.reveal();
        let hold = m.hold_for_capture();
        m.hide();
        drop(hold);
        assert_eq!(m.opacity(), 0.0);
        assert_eq!(*rec.opacity.borrow(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn resize_reports_change() {
        let (rec, m) = manager();
        assert!(!m.resize(&Viewport::new(100.0, 50.0, 2.0)));
        assert!(m.resize(&Viewport::new(100.0, 50.0, 3.0)));
        assert_eq!(m.size(), DeviceSize { width: 300, height: 150 });
        assert_eq!(rec.sizes.borrow().len(), 3);
    }
}
