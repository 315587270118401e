//! Error types for dumpsift.
//!
//! Library crates use [`DumpsiftError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all dumpsift operations.
#[derive(Debug, thiserror::Error)]
pub enum DumpsiftError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Archive could not be extracted (corrupt, unsupported, or encrypted).
    #[error("archive error: {0}")]
    Archive(String),

    /// Structured data could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Balance or price provider error.
    #[error("provider error: {0}")]
    Provider(String),

    /// Supervisor or unit lifecycle error.
    #[error("supervisor error: {0}")]
    Supervisor(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DumpsiftError>;

impl DumpsiftError {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DumpsiftError::config("watch_dir must not be empty");
        assert_eq!(err.to_string(), "config error: watch_dir must not be empty");

        let err = DumpsiftError::Storage("database is locked".into());
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn io_errors_keep_their_path() {
        let err = DumpsiftError::io("/srv/drop/a.zip", std::io::Error::other("disk full"));
        let text = err.to_string();
        assert!(text.contains("/srv/drop/a.zip"));
        assert!(text.contains("disk full"));
    }
}
