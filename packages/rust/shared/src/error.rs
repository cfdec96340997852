//! Error types for foodprint.
//!
//! Library crates use [`FoodprintError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all foodprint operations.
#[derive(Debug, thiserror::Error)]
pub enum FoodprintError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the classification service.
    #[error("network error: {0}")]
    Network(String),

    /// The classification service rejected us for rate limiting.
    /// Retried with backoff inside the client; surfaces only once
    /// the retry budget is exhausted.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Classification error (API failure or schema-nonconforming response).
    #[error("classification error: {0}")]
    Classify(String),

    /// Tabular parsing error (worksheet or stage file).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Category cache load/persist error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (missing required column, bad header, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FoodprintError>;

impl FoodprintError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the distinguishable rate-limit condition.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
