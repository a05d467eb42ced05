//! Error Handling Module
//!
//! Defines the error type for MDD construction, loss assembly and configuration.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Main error type for MDD operations
#[derive(Error, Debug)]
pub enum MddError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device/hardware error (accelerator requested but unavailable)
    #[error("Device error: {0}")]
    Device(String),

    /// Backbone identifier not present in the registry
    #[error("Unknown backbone architecture: '{0}'")]
    UnknownBackbone(String),

    /// A loss was requested without any labeled source rows
    #[error("Empty source slice: at least one labeled source row is required")]
    EmptySourceSlice,

    /// The source labels cover the whole batch, leaving nothing to adapt to
    #[error("Empty target slice: {labels} source labels for a batch of {batch} rows leaves no target rows")]
    EmptyTargetSlice { labels: usize, batch: usize },

    /// Logits carry a different number of classes than the model was built for
    #[error("Class dimension mismatch: expected {expected} classes, got {actual}")]
    ClassDimensionMismatch { expected: usize, actual: usize },

    /// A source label lies outside `[0, class_num)`
    #[error("Label out of range: {label} is not in [0, {class_num})")]
    LabelOutOfRange { label: i64, class_num: usize },

    /// Tensor shapes that must agree do not
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An optimizer step was asked to backpropagate a loss built without a graph
    #[error("Loss has no gradient graph: {0}")]
    DetachedLoss(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MddError {
    fn from(err: serde_json::Error) -> Self {
        MddError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for MddError {
    fn from(err: toml::de::Error) -> Self {
        MddError::Serialization(err.to_string())
    }
}

/// Convenience Result type for MDD operations
pub type Result<T> = std::result::Result<T, MddError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| MddError::Config(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| MddError::Config(format!("{}: {}", f(), e)))
    }
}
