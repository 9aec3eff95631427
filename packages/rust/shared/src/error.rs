//! Error types for marketlore.
//!
//! Library crates use [`MarketloreError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all marketlore operations.
///
/// Variants follow the pipeline stages so a failure can be attributed to
/// the smallest unit that produced it (one source, one article, one upsert).
#[derive(Debug, thiserror::Error)]
pub enum MarketloreError {
    /// Missing credentials or an unreadable/invalid configuration.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network, HTTP status, or timeout failure while fetching a source.
    #[error("source fetch error: {0}")]
    SourceFetch(String),

    /// Malformed feed, sitemap, API payload, or article HTML.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Model output could not be turned into a knowledge record.
    #[error("distillation error: {0}")]
    Distillation(String),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Transient upstream failure (transport, timeout, HTTP 429 or 5xx).
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, unknown enum value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MarketloreError>;

impl MarketloreError {
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

    /// Whether this is a missing-credentials / config condition.
    ///
    /// Subsystems treat these as degraded mode rather than failure.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Whether another attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceFetch(_) | Self::Unavailable(_))
    }
}
