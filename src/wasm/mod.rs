//! Browser binding: wires the overlay to WebGL2, html2canvas and DOM events,
//! and exports the JS-facing `RippleHandle`.

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Element, Event, HtmlCanvasElement, TransitionEvent};

mod capture;
mod dom;
mod input;
mod render;

use self::capture::Html2CanvasCapture;
use self::dom::{BrowserEnvironment, BrowserSpawner, CanvasSurface, DomListener, DprWatcher, RafScheduler};
use self::input::RippleTrigger;
use self::render::WebGlRenderer;
use crate::config::RippleConfig;
use crate::error::RippleError;
use crate::geometry::CssPoint;
use crate::overlay::{OverlayParts, Platform, RippleOverlay};

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    // A second module instance on the page already installed a logger.
    console_log::init_with_level(log::Level::Info).ok();
}

/// Best-effort text of a thrown JS value.
pub(crate) fn describe(value: &JsValue) -> String {
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

impl From<RippleError> for JsValue {
    fn from(err: RippleError) -> JsValue {
        js_sys::Error::new(&err.to_string()).into()
    }
}

pub struct Browser;

impl Platform for Browser {
    type Bitmap = HtmlCanvasElement;
    type Renderer = WebGlRenderer;
    type Capture = Html2CanvasCapture;
    type Surface = CanvasSurface;
    type Env = BrowserEnvironment;
    type Frames = RafScheduler;
    type Spawner = BrowserSpawner;
}

struct Mounted {
    overlay: Rc<RippleOverlay<Browser>>,
    canvas: HtmlCanvasElement,
    listeners: RefCell<Vec<DomListener>>,
    _dpr: Rc<DprWatcher>,
}

impl Mounted {
    fn trigger(&self) -> RippleTrigger {
        RippleTrigger::new(&self.overlay)
    }
}

impl Drop for Mounted {
    fn drop(&mut self) {
        self.listeners.borrow_mut().clear();
        self.overlay.release();
        self.canvas.remove();
    }
}

/// The mounted page ripple. Dropping or `destroy()`ing it removes the overlay.
#[wasm_bindgen]
pub struct RippleHandle {
    inner: Option<Mounted>,
}

#[wasm_bindgen]
impl RippleHandle {
    /// Mount the overlay on `document.body`. `config` is `undefined` or a
    /// partial object such as `{ duration: 0.8, strength: 30 }`.
    ///
    /// Throws on invalid config or shader failure. Without WebGL2 the handle
    /// is returned disabled.
    pub fn mount(config: JsValue) -> Result<RippleHandle, JsValue> {
        let config = parse_config(&config)?;
        let window = web_sys::window().ok_or("no window")?;
        let document = window.document().ok_or("no document")?;

        let surface = CanvasSurface::create(&document, &config)?;
        let canvas = surface.canvas().clone();
        let renderer = match WebGlRenderer::new(&canvas) {
            Ok(renderer) => renderer,
            Err(err @ RippleError::ContextUnavailable(_)) => {
                log::warn!("page ripple disabled: {err}");
                canvas.remove();
                return Ok(RippleHandle { inner: None });
            }
            Err(err) => {
                log::error!("{err}");
                canvas.remove();
                return Err(err.into());
            }
        };

        let parts = OverlayParts::<Browser> {
            config,
            renderer,
            capture: Html2CanvasCapture::new(document),
            surface,
            env: BrowserEnvironment::new(window.clone()),
            spawner: BrowserSpawner,
        };
        let frames_window = window.clone();
        let overlay = RippleOverlay::new(parts, move |weak| RafScheduler::new(frames_window, weak));

        let weak = Rc::downgrade(&overlay);
        let dpr = DprWatcher::install(window.clone(), move || {
            if let Some(overlay) = weak.upgrade() {
                overlay.resize();
            }
        });

        let mounted = Mounted {
            listeners: RefCell::new(Vec::new()),
            overlay,
            canvas,
            _dpr: dpr,
        };
        let listeners = window_listeners(&window, &mounted)?;
        mounted.listeners.borrow_mut().extend(listeners);
        Ok(RippleHandle {
            inner: Some(mounted),
        })
    }

    /// Start a ripple at viewport CSS coordinates.
    pub fn trigger(&self, x: f64, y: f64) {
        if let Some(mounted) = &self.inner {
            mounted.overlay.trigger(CssPoint::new(x, y));
        }
    }

    /// Ripple from `element`'s center when it is clicked or activated from the
    /// keyboard. Its pointer presses no longer reach the page-wide listener.
    #[wasm_bindgen(js_name = bindElement)]
    pub fn bind_element(&self, element: &Element) -> Result<(), JsValue> {
        let Some(mounted) = &self.inner else {
            return Ok(());
        };
        let bound = input::bind_local(element, mounted.trigger())?;
        mounted.listeners.borrow_mut().extend(bound);
        Ok(())
    }

    /// A plain `(x, y) => void` function that triggers this overlay, for
    /// handing to components. It does nothing once the handle is destroyed.
    #[wasm_bindgen(js_name = triggerFn)]
    pub fn trigger_fn(&self) -> js_sys::Function {
        let trigger = self.inner.as_ref().map(Mounted::trigger);
        let callback = Closure::wrap(Box::new(move |x: f64, y: f64| {
            if let Some(trigger) = &trigger {
                trigger.fire(CssPoint::new(x, y));
            }
        }) as Box<dyn FnMut(f64, f64)>);
        callback.into_js_value().unchecked_into()
    }

    /// False when WebGL2 was unavailable or the handle was destroyed.
    #[wasm_bindgen(getter)]
    pub fn enabled(&self) -> bool {
        self.inner.is_some()
    }

    #[wasm_bindgen(getter)]
    pub fn animating(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|m| m.overlay.state().animating())
    }

    /// Remove listeners, free GPU resources and detach the canvas.
    pub fn destroy(&mut self) {
        if self.inner.take().is_some() {
            log::info!("page ripple destroyed");
        }
    }
}

fn parse_config(value: &JsValue) -> Result<RippleConfig, RippleError> {
    if value.is_undefined() || value.is_null() {
        return Ok(RippleConfig::DEFAULT);
    }
    let json = js_sys::JSON::stringify(value)
        .map_err(|e| RippleError::Platform(describe(&e)))?
        .as_string()
        .unwrap_or_default();
    Ok(RippleConfig::from_json(&json)?)
}

fn window_listeners(window: &web_sys::Window, mounted: &Mounted) -> Result<Vec<DomListener>, JsValue> {
    let mut listeners = vec![input::global_pointer(window, mounted.trigger())?];

    let weak = Rc::downgrade(&mounted.overlay);
    let on_resize = move |_: Event| {
        if let Some(overlay) = weak.upgrade() {
            overlay.resize();
        }
    };
    listeners.push(DomListener::new(window, "resize", true, on_resize.clone())?);
    if let Some(visual) = window.visual_viewport() {
        listeners.push(DomListener::new(&visual, "resize", true, on_resize)?);
    }

    let weak = Rc::downgrade(&mounted.overlay);
    listeners.push(DomListener::new(&mounted.canvas, "transitionend", true, move |event: Event| {
        let is_opacity = event
            .dyn_ref::<TransitionEvent>()
            .is_some_and(|e| e.property_name() == "opacity");
        if is_opacity {
            if let Some(overlay) = weak.upgrade() {
                overlay.fade_finished();
            }
        }
    })?);
    Ok(listeners)
}
