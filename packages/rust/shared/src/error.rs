//! Error types for Sourcestream.
//!
//! Library crates use [`SourcestreamError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.
//!
//! Page-level fetch failures are deliberately *not* represented here: they are
//! classified into [`crate::types::FetchErrorKind`] and carried inside the
//! fetched document, because a failed candidate page is unit-local data, not
//! an error that should propagate.

use std::path::PathBuf;

/// Top-level error type for all Sourcestream operations.
#[derive(Debug, thiserror::Error)]
pub enum SourcestreamError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside the per-page fetch taxonomy.
    #[error("network error: {0}")]
    Network(String),

    /// JSON or response-body parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Key-value cache I/O error (always absorbed by callers, never fatal).
    #[error("cache error: {0}")]
    Cache(String),

    /// Search provider error (missing key, HTTP failure, bad payload).
    #[error("search error: {0}")]
    Search(String),

    /// Traffic-metric provider error (degraded to zero by callers).
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Text-generation client error (transport or API failure).
    #[error("generation error: {0}")]
    Generation(String),

    /// Data validation error (malformed outline, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SourcestreamError>;

impl SourcestreamError {
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
}
