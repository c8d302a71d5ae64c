//! Ripple parameters and partial overrides.

use serde::Deserialize;

use crate::error::ConfigError;

/// Immutable per-overlay ripple parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RippleConfig {
    /// Seconds from trigger to the start of the fade-out.
    pub duration: f64,
    /// Peak displacement in CSS pixels, scaled by the device pixel ratio at draw time.
    pub strength: f64,
    /// Base propagation rate in pixels/second. Each trigger replaces it with a
    /// speed computed from the viewport so the ring always clears every corner.
    pub speed: f64,
    /// Ring thickness in pixels.
    pub width: f64,
    /// Length of the opacity transition used for reveal and fade, in seconds.
    pub fade_out: f64,
    /// Stacking order of the overlay canvas.
    pub z_index: i32,
}

impl RippleConfig {
    pub const DEFAULT: RippleConfig = RippleConfig {
        duration: 1.1,
        strength: 22.0,
        speed: 900.0,
        width: 48.0,
        fade_out: 0.14,
        z_index: 9999,
    };

    /// Merge `patch` over `self` and validate the result.
    pub fn merged(self, patch: &RippleConfigPatch) -> Result<RippleConfig, ConfigError> {
        let config = RippleConfig {
            duration: patch.duration.unwrap_or(self.duration),
            strength: patch.strength.unwrap_or(self.strength),
            speed: patch.speed.unwrap_or(self.speed),
            width: patch.width.unwrap_or(self.width),
            fade_out: patch.fade_out.unwrap_or(self.fade_out),
            z_index: patch.z_index.unwrap_or(self.z_index),
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by a JSON object such as `{"duration": 0.8}`.
    /// An empty string or `null` yields the defaults.
    pub fn from_json(json: &str) -> Result<RippleConfig, ConfigError> {
        let json = json.trim();
        if json.is_empty() || json == "null" {
            return Ok(RippleConfig::DEFAULT);
        }
        let patch: RippleConfigPatch =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        RippleConfig::DEFAULT.merged(&patch)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("duration", self.duration)?;
        non_negative("strength", self.strength)?;
        positive("speed", self.speed)?;
        positive("width", self.width)?;
        non_negative("fadeOut", self.fade_out)?;
        Ok(())
    }
}

impl Default for RippleConfig {
    fn default() -> Self {
        RippleConfig::DEFAULT
    }
}

/// Partial override; absent fields keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RippleConfigPatch {
    pub duration: Option<f64>,
    pub strength: Option<f64>,
    pub speed: Option<f64>,
    pub width: Option<f64>,
    pub fade_out: Option<f64>,
    pub z_index: Option<i32>,
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field, value })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}
