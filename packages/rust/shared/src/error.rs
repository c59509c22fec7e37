//! Error types for triagesync.
//!
//! Library crates use [`SyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all triagesync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Ticket source unreachable or returned malformed data.
    /// Aborts the run before any plan execution.
    #[error("tracker error: {0}")]
    Tracker(String),

    /// Duplicate-link graph violates the acyclicity assumption.
    /// Scoped to a single candidate; resolution of others continues.
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Summarization or publishing failure for one ticket.
    /// Isolated to that plan entry, recorded in the execution report.
    #[error("backend error: {0}")]
    Backend(String),

    /// Persistent store unavailable or rejected an operation.
    /// Fatal for the run.
    #[error("store error: {0}")]
    Store(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad mode arguments, invalid record state, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an integrity error from any displayable message.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity {
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

    /// Whether this error terminates the whole run, as opposed to a
    /// per-entry failure that gets swallowed into the report.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Tracker(_) | Self::Store(_) | Self::Config { .. } | Self::Io { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SyncError::config("missing tracker credentials");
        assert_eq!(err.to_string(), "config error: missing tracker credentials");

        let err = SyncError::integrity("duplicate cycle: FEED-1 -> FEED-2 -> FEED-1");
        assert!(err.to_string().contains("FEED-2"));
    }

    #[test]
    fn fatality_split() {
        assert!(SyncError::Tracker("down".into()).is_fatal());
        assert!(SyncError::Store("locked".into()).is_fatal());
        assert!(!SyncError::Backend("quota".into()).is_fatal());
        assert!(!SyncError::integrity("cycle").is_fatal());
    }
}
