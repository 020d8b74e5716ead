//! Error types for LinkIntel.
//!
//! Library crates use [`LinkIntelError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all LinkIntel operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkIntelError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of a row fetch (client setup, robots.txt).
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or cache layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The managed header row could not be read or written. Always run-fatal.
    #[error("schema error: {0}")]
    Schema(String),

    /// Spreadsheet transport error (reading rows, writing a cell batch).
    #[error("sheet error: {0}")]
    Sheet(String),

    /// A classifier could not summarize fetched content.
    #[error("classification error: {0}")]
    Classification(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad row range, invalid namespace, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LinkIntelError>;

impl LinkIntelError {
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
