//! Window-side plumbing: environment signals, the overlay canvas, frame
//! scheduling, task spawning and listener lifetimes.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::future::LocalFutureObj;
use futures::task::{LocalSpawn, SpawnError};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use web_sys::{
    AddEventListenerOptions, Document, Event, EventTarget, HtmlCanvasElement, MediaQueryList,
    Performance, Window,
};

use super::{describe, Browser};
use crate::config::RippleConfig;
use crate::geometry::{DeviceSize, Viewport};
use crate::overlay::{Environment, FrameScheduler, RippleOverlay};
use crate::surface::OverlaySurface;

const REDUCED_MOTION_QUERY: &str = "(prefers-reduced-motion: reduce)";

/// An event listener removed when dropped.
pub struct DomListener {
    target: EventTarget,
    event: &'static str,
    callback: Closure<dyn FnMut(Event)>,
}

impl DomListener {
    pub fn new(
        target: &EventTarget,
        event: &'static str,
        passive: bool,
        handler: impl FnMut(Event) + 'static,
    ) -> Result<Self, JsValue> {
        let callback = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
        let options = AddEventListenerOptions::new();
        options.set_passive(passive);
        target.add_event_listener_with_callback_and_add_event_listener_options(
            event,
            callback.as_ref().unchecked_ref(),
            &options,
        )?;
        Ok(DomListener {
            target: target.clone(),
            event,
            callback,
        })
    }
}

impl Drop for DomListener {
    fn drop(&mut self) {
        let _ = self
            .target
            .remove_event_listener_with_callback(self.event, self.callback.as_ref().unchecked_ref());
    }
}

/// Viewport, clock and the reduced-motion preference, read from `window`.
pub struct BrowserEnvironment {
    window: Window,
    performance: Option<Performance>,
    reduced_motion: Rc<Cell<bool>>,
    _watch: Option<DomListener>,
}

impl BrowserEnvironment {
    pub fn new(window: Window) -> Self {
        let reduced_motion = Rc::new(Cell::new(false));
        let query = window.match_media(REDUCED_MOTION_QUERY).ok().flatten();
        let watch = query.and_then(|mql: MediaQueryList| {
            reduced_motion.set(mql.matches());
            let flag = Rc::clone(&reduced_motion);
            let list = mql.clone();
            DomListener::new(&mql, "change", true, move |_| {
                flag.set(list.matches());
                log::info!("reduced motion preference: {}", list.matches());
            })
            .map_err(|e| log::warn!("cannot observe {REDUCED_MOTION_QUERY}: {}", describe(&e)))
            .ok()
        });

        BrowserEnvironment {
            performance: window.performance(),
            window,
            reduced_motion,
            _watch: watch,
        }
    }
}

impl Environment for BrowserEnvironment {
    fn now(&self) -> f64 {
        match &self.performance {
            Some(p) => p.now() / 1000.0,
            None => js_sys::Date::now() / 1000.0,
        }
    }

    fn viewport(&self) -> Viewport {
        let w = &self.window;
        let dimension = |v: Result<JsValue, JsValue>| v.ok().and_then(|v| v.as_f64()).unwrap_or(1.0);
        Viewport {
            width: dimension(w.inner_width()),
            height: dimension(w.inner_height()),
            device_pixel_ratio: w.device_pixel_ratio(),
            scroll_x: w.scroll_x().unwrap_or(0.0),
            scroll_y: w.scroll_y().unwrap_or(0.0),
        }
    }

    fn prefers_reduced_motion(&self) -> bool {
        self.reduced_motion.get()
    }
}

/// The fixed, full-viewport, input-transparent overlay canvas.
pub struct CanvasSurface {
    canvas: HtmlCanvasElement,
}

impl CanvasSurface {
    /// Create the canvas and append it to `<body>`.
    pub fn create(document: &Document, config: &RippleConfig) -> Result<Self, JsValue> {
        let canvas: HtmlCanvasElement = document.create_element("canvas")?.dyn_into()?;
        canvas.set_attribute("aria-hidden", "true")?;
        canvas.set_attribute("data-page-ripple", "")?;
        let style = canvas.style();
        let transition = format!("opacity {}ms ease-out", (config.fade_out * 1000.0).round());
        for (name, value) in [
            ("position", "fixed"),
            ("inset", "0"),
            ("width", "100vw"),
            ("height", "100vh"),
            ("pointer-events", "none"),
            ("user-select", "none"),
            ("will-change", "opacity"),
            ("transition", transition.as_str()),
            ("opacity", "0"),
        ] {
            style.set_property(name, value)?;
        }
        document
            .body()
            .ok_or("document has no body")?
            .append_child(&canvas)?;
        Ok(CanvasSurface { canvas })
    }

    pub fn canvas(&self) -> &HtmlCanvasElement {
        &self.canvas
    }
}

impl OverlaySurface for CanvasSurface {
    fn apply_opacity(&self, opacity: f32) {
        let value = if opacity > 0.0 { "1" } else { "0" };
        if let Err(e) = self.canvas.style().set_property("opacity", value) {
            log::warn!("cannot set overlay opacity: {}", describe(&e));
        }
    }

    fn apply_size(&self, size: DeviceSize, _css: (f64, f64)) {
        if self.canvas.width() != size.width {
            self.canvas.set_width(size.width);
        }
        if self.canvas.height() != size.height {
            self.canvas.set_height(size.height);
        }
    }

    fn apply_z_index(&self, z_index: i32) {
        if let Err(e) = self.canvas.style().set_property("z-index", &z_index.to_string()) {
            log::warn!("cannot set overlay z-index: {}", describe(&e));
        }
    }
}

/// `requestAnimationFrame` driver; at most one frame pending.
pub struct RafScheduler {
    window: Window,
    pending: Rc<Cell<Option<i32>>>,
    callback: Closure<dyn FnMut()>,
}

impl RafScheduler {
    pub fn new(window: Window, overlay: Weak<RippleOverlay<Browser>>) -> Self {
        let pending = Rc::new(Cell::new(None));
        let slot = Rc::clone(&pending);
        let callback = Closure::wrap(Box::new(move || {
            slot.set(None);
            if let Some(overlay) = overlay.upgrade() {
                overlay.frame();
            }
        }) as Box<dyn FnMut()>);
        RafScheduler {
            window,
            pending,
            callback,
        }
    }
}

impl FrameScheduler for RafScheduler {
    fn request_frame(&self) -> bool {
        if self.pending.get().is_some() {
            return true;
        }
        match self
            .window
            .request_animation_frame(self.callback.as_ref().unchecked_ref())
        {
            Ok(id) => {
                self.pending.set(Some(id));
                true
            }
            Err(e) => {
                log::warn!("requestAnimationFrame failed: {}", describe(&e));
                false
            }
        }
    }

    fn cancel_frame(&self) {
        if let Some(id) = self.pending.take() {
            let _ = self.window.cancel_animation_frame(id);
        }
    }
}

/// Runs tasks on the browser's microtask queue.
pub struct BrowserSpawner;

impl LocalSpawn for BrowserSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}

/// Calls `on_change` whenever `devicePixelRatio` changes (zoom, moving to
/// another monitor). The media query only matches the current ratio, so it is
/// re-armed after every change.
pub struct DprWatcher {
    window: Window,
    on_change: Box<dyn Fn()>,
    current: RefCell<Option<DomListener>>,
    // A listener cannot be freed while it is running; keep it one round longer.
    retired: RefCell<Option<DomListener>>,
}

impl DprWatcher {
    pub fn install(window: Window, on_change: impl Fn() + 'static) -> Rc<Self> {
        let watcher = Rc::new(DprWatcher {
            window,
            on_change: Box::new(on_change),
            current: RefCell::new(None),
            retired: RefCell::new(None),
        });
        watcher.arm();
        watcher
    }

    fn arm(self: &Rc<Self>) {
        let query = format!("(resolution: {}dppx)", self.window.device_pixel_ratio());
        let mql = match self.window.match_media(&query) {
            Ok(Some(mql)) => mql,
            _ => return,
        };
        let weak = Rc::downgrade(self);
        let listener = DomListener::new(&mql, "change", true, move |_| {
            if let Some(watcher) = weak.upgrade() {
                log::debug!("device pixel ratio now {}", watcher.window.device_pixel_ratio());
                (watcher.on_change)();
                watcher.arm();
            }
        });
        match listener {
            Ok(listener) => {
                let previous = self.current.replace(Some(listener));
                self.retired.replace(previous);
            }
            Err(e) => log::warn!("cannot watch device pixel ratio: {}", describe(&e)),
        }
    }
}
