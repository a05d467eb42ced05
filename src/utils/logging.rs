//! Logging Module
//!
//! Structured logging via the `tracing` crate. The library only emits events;
//! binaries decide where they go by calling [`init_logging`].

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::utils::error::{MddError, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose config: per-forward shape and schedule events become visible
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| MddError::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}
