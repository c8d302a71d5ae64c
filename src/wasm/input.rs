//! Trigger sources: the global pointer listener and locally bound elements.

use std::rc::{Rc, Weak};

use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Element, Event, KeyboardEvent, MouseEvent, Window};

use super::dom::DomListener;
use super::Browser;
use crate::geometry::CssPoint;
use crate::overlay::RippleOverlay;

/// Weak handle event sources fire into. Firing after teardown does nothing.
#[derive(Clone)]
pub struct RippleTrigger {
    overlay: Weak<RippleOverlay<Browser>>,
}

impl RippleTrigger {
    pub fn new(overlay: &Rc<RippleOverlay<Browser>>) -> Self {
        RippleTrigger {
            overlay: Rc::downgrade(overlay),
        }
    }

    pub fn fire(&self, point: CssPoint) {
        if let Some(overlay) = self.overlay.upgrade() {
            overlay.trigger(point);
        }
    }
}

/// Every pointer press anywhere on the page starts a ripple at the pointer.
pub fn global_pointer(window: &Window, trigger: RippleTrigger) -> Result<DomListener, JsValue> {
    DomListener::new(window, "pointerdown", true, move |event: Event| {
        if let Some(e) = event.dyn_ref::<MouseEvent>() {
            trigger.fire(CssPoint::new(e.client_x() as f64, e.client_y() as f64));
        }
    })
}

/// Bind an element (typically a button) so that activating it ripples from
/// its center. Its presses never reach the global listener, so one press
/// gives exactly one ripple.
pub fn bind_local(element: &Element, trigger: RippleTrigger) -> Result<Vec<DomListener>, JsValue> {
    let press = DomListener::new(element, "pointerdown", false, |event: Event| {
        event.stop_propagation();
    })?;

    let target = element.clone();
    let on_click = trigger.clone();
    let click = DomListener::new(element, "click", true, move |_| {
        on_click.fire(center_of(&target));
    })?;

    let target = element.clone();
    let key = DomListener::new(element, "keydown", false, move |event: Event| {
        let Some(e) = event.dyn_ref::<KeyboardEvent>() else {
            return;
        };
        if matches!(e.key().as_str(), "Enter" | " ") {
            e.prevent_default();
            // A held key repeats keydown; only the first press ripples.
            if !e.repeat() {
                trigger.fire(center_of(&target));
            }
        }
    })?;

    Ok(vec![press, click, key])
}

/// Center of the element's bounding box in viewport CSS pixels.
pub fn center_of(element: &Element) -> CssPoint {
    let rect = element.get_bounding_client_rect();
    CssPoint::new(
        rect.left() + rect.width() / 2.0,
        rect.top() + rect.height() / 2.0,
    )
}
