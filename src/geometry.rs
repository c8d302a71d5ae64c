//! Viewport geometry. All coordinates are top-down (y = 0 at the top edge).

/// Extra margin added to the farthest-corner distance, in device pixels per unit of DPR.
const CORNER_MARGIN_DPR: f64 = 2.0;
/// Ring overshoot so it has fully cleared the screen by the end of the duration.
const OVERSHOOT: f64 = 1.06;

/// A point in viewport CSS pixels (`clientX`/`clientY` space).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CssPoint {
    pub x: f64,
    pub y: f64,
}

impl CssPoint {
    pub fn new(x: f64, y: f64) -> Self {
        CssPoint { x, y }
    }
}

/// A point in `[0,1]²` relative to the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub const CENTER: NormalizedPoint = NormalizedPoint { x: 0.5, y: 0.5 };

    /// Position in device pixels for a surface of `size`.
    pub fn to_device(self, size: DeviceSize) -> (f64, f64) {
        (self.x * size.width as f64, self.y * size.height as f64)
    }
}

/// Backing-store dimensions in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSize {
    pub width: u32,
    pub height: u32,
}

/// The device-pixel rectangle of the full page render that is visible in the
/// viewport. Two snapshots with equal regions show the same part of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    /// Scale the full page must be rendered at, as hundredths of a pixel ratio.
    pub scale_centi: u32,
}

impl CaptureRegion {
    pub fn scale(&self) -> f64 {
        self.scale_centi as f64 / 100.0
    }

    pub fn size(&self) -> DeviceSize {
        DeviceSize {
            width: self.width,
            height: self.height,
        }
    }
}

/// Layout viewport as observed at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// CSS pixels.
    pub width: f64,
    /// CSS pixels.
    pub height: f64,
    pub device_pixel_ratio: f64,
    /// Document scroll offset in CSS pixels.
    pub scroll_x: f64,
    pub scroll_y: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64, device_pixel_ratio: f64) -> Self {
        Viewport {
            width,
            height,
            device_pixel_ratio,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }

    pub fn scrolled(self, scroll_x: f64, scroll_y: f64) -> Self {
        Viewport {
            scroll_x,
            scroll_y,
            ..self
        }
    }

    /// Pixel ratio clamped to at least 1, ignoring nonsense values.
    pub fn dpr(&self) -> f64 {
        if self.device_pixel_ratio.is_finite() {
            self.device_pixel_ratio.max(1.0)
        } else {
            1.0
        }
    }

    pub fn device_size(&self) -> DeviceSize {
        let dpr = self.dpr();
        DeviceSize {
            width: device_px(self.width * dpr),
            height: device_px(self.height * dpr),
        }
    }

    /// Normalize a client-space point. No vertical flip happens here.
    pub fn normalize(&self, point: CssPoint) -> NormalizedPoint {
        let w = self.width.max(1.0);
        let h = self.height.max(1.0);
        NormalizedPoint {
            x: unit(point.x / w),
            y: unit(point.y / h),
        }
    }

    pub fn capture_region(&self) -> CaptureRegion {
        let dpr = self.dpr();
        let size = self.device_size();
        CaptureRegion {
            x: (self.scroll_x * dpr).floor() as i64,
            y: (self.scroll_y * dpr).floor() as i64,
            width: size.width,
            height: size.height,
            scale_centi: (dpr * 100.0).round() as u32,
        }
    }
}

fn device_px(v: f64) -> u32 {
    if v.is_finite() && v >= 1.0 {
        v.floor() as u32
    } else {
        1
    }
}

fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.5
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Largest distance from `center` (device px) to any corner of `size`.
pub fn max_corner_distance(center: (f64, f64), size: DeviceSize) -> f64 {
    let (cx, cy) = center;
    let w = size.width as f64;
    let h = size.height as f64;
    [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
        .iter()
        .map(|&(x, y)| (cx - x).hypot(cy - y))
        .fold(0.0, f64::max)
}

/// Ring speed (device px/s) that carries the ring past the farthest corner
/// within `duration`, with a small overshoot.
pub fn propagation_speed(center: NormalizedPoint, viewport: &Viewport, duration: f64) -> f64 {
    let size = viewport.device_size();
    let reach = max_corner_distance(center.to_device(size), size) + CORNER_MARGIN_DPR * viewport.dpr();
    reach * OVERSHOOT / duration
}
