use std::fmt;

/// Which half of the program pair failed to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("`{field}` must be a finite number (got {value})")]
    NotFinite { field: &'static str, value: f64 },
    #[error("`{field}` must be greater than zero (got {value})")]
    NotPositive { field: &'static str, value: f64 },
    #[error("`{field}` must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("malformed config: {0}")]
    Parse(String),
}

/// Everything that can go wrong between setup and the last frame.
///
/// Variants carry strings rather than source errors so a single capture
/// result can be cloned out to every trigger waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RippleError {
    #[error("rendering context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },
    #[error("shader program failed to link: {0}")]
    ProgramLink(String),
    #[error("page capture failed: {0}")]
    Capture(String),
    #[error("texture upload failed: {0}")]
    TextureUpload(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Platform(String),
}
