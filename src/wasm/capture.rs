//! Page capture through the page's `html2canvas` global.

use futures::FutureExt;
use js_sys::{Object, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{CanvasRenderingContext2d, Document, Element, HtmlCanvasElement};

use super::describe;
use crate::error::RippleError;
use crate::geometry::CaptureRegion;
use crate::snapshot::{CaptureFuture, PageCapture};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_name = html2canvas)]
    fn html2canvas(element: &Element, options: &JsValue) -> Result<Promise, JsValue>;
}

/// Renders the whole document at device scale, then crops the visible viewport.
pub struct Html2CanvasCapture {
    document: Document,
}

impl Html2CanvasCapture {
    pub fn new(document: Document) -> Self {
        Html2CanvasCapture { document }
    }

    fn start(&self, region: CaptureRegion) -> Result<Promise, RippleError> {
        let root = self
            .document
            .document_element()
            .ok_or_else(|| RippleError::Capture("document has no root element".into()))?;
        let options = Object::new();
        let set = |key: &str, value: JsValue| {
            Reflect::set(&options, &key.into(), &value).map_err(|e| RippleError::Capture(describe(&e)))
        };
        set("backgroundColor", JsValue::NULL)?;
        set("useCORS", JsValue::TRUE)?;
        set("logging", JsValue::FALSE)?;
        set("scale", JsValue::from_f64(region.scale()))?;
        html2canvas(&root, &options).map_err(|e| RippleError::Capture(describe(&e)))
    }
}

impl PageCapture for Html2CanvasCapture {
    type Bitmap = HtmlCanvasElement;

    fn capture(&self, region: CaptureRegion) -> CaptureFuture<HtmlCanvasElement> {
        // Kick the render off now so it runs while the overlay is hidden.
        let started = self.start(region);
        let document = self.document.clone();
        async move {
            let page = JsFuture::from(started?)
                .await
                .map_err(|e| RippleError::Capture(describe(&e)))?
                .dyn_into::<HtmlCanvasElement>()
                .map_err(|_| RippleError::Capture("html2canvas did not return a canvas".into()))?;
            crop(&document, &page, region)
        }
        .boxed_local()
    }
}

/// Copy the viewport slice of the full-page render into a canvas of exactly the region size.
fn crop(
    document: &Document,
    page: &HtmlCanvasElement,
    region: CaptureRegion,
) -> Result<HtmlCanvasElement, RippleError> {
    let err = |e: JsValue| RippleError::Capture(describe(&e));
    let out: HtmlCanvasElement = document
        .create_element("canvas")
        .map_err(err)?
        .dyn_into()
        .map_err(|_| RippleError::Capture("createElement(canvas) is not a canvas".into()))?;
    out.set_width(region.width);
    out.set_height(region.height);

    let ctx: CanvasRenderingContext2d = out
        .get_context("2d")
        .map_err(err)?
        .ok_or_else(|| RippleError::Capture("2d context unavailable".into()))?
        .dyn_into()
        .map_err(|_| RippleError::Capture("unexpected 2d context type".into()))?;

    let (w, h) = (region.width as f64, region.height as f64);
    ctx.draw_image_with_html_canvas_element_and_sw_and_sh_and_dx_and_dy_and_dw_and_dh(
        page,
        region.x as f64,
        region.y as f64,
        w,
        h,
        0.0,
        0.0,
        w,
        h,
    )
    .map_err(err)?;
    Ok(out)
}
