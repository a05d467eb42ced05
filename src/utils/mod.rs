//! Utilities module for errors, logging, metrics, and config files
//!
//! This module provides:
//! - The crate error type
//! - Structured logging with tracing
//! - Running loss/accuracy metrics for the training driver
//! - TOML config loading for the CLI

pub mod error;
pub mod logging;
pub mod metrics;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

pub use error::{MddError, Result, ResultExt};
pub use logging::{init_logging, LogConfig, LogLevel};
pub use metrics::{AccuracyTracker, LossMeter, RunningAverage};

/// Load any deserializable config from a TOML file
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;

    Ok(toml::from_str(&content)?)
}

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}
