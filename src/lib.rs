//! Full-screen page ripple: snapshot the page, then push a chromatic
//! distortion ring across it and fade back to the live page.
//!
//! The engine is platform independent and runs on the host for tests; the
//! browser binding (WebGL2, html2canvas capture, DOM events) only compiles
//! for `wasm32`.

pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod overlay;
pub mod shader;
pub mod snapshot;
pub mod surface;

pub use config::{RippleConfig, RippleConfigPatch};
pub use engine::{FrameStep, Phase, RippleEngine, RippleRenderer, RippleState};
pub use error::{ConfigError, RippleError};
pub use geometry::{CssPoint, DeviceSize, NormalizedPoint, Viewport};
pub use overlay::{Environment, FrameScheduler, OverlayParts, Platform, RippleOverlay};
pub use shader::FrameUniforms;
pub use snapshot::{PageCapture, Snapshot, SnapshotPipeline};
pub use surface::{OverlaySurface, SurfaceManager};

// Only compile wasm-specific code when targeting wasm32.
#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(target_arch = "wasm32")]
pub use wasm::RippleHandle;
