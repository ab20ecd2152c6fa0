//! Error types for the support bundle collector.
//!
//! The taxonomy mirrors the run's fatality rules: `Configuration` and
//! `Resource` errors halt forward progress (cleanup still runs), while
//! `Command` and `Timeout` are recorded per-command and never abort a run.

use thiserror::Error;

/// Result type alias for collector operations.
pub type DiagResult<T> = std::result::Result<T, DiagError>;

/// Main error type for collector operations.
#[derive(Debug, Error, Clone)]
pub enum DiagError {
    /// Invalid or ambiguous catalog configuration. Fatal before execution.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Filesystem or archive failure. Fatal for the stage that hit it.
    #[error("Resource error: {operation} {path}: {reason}")]
    Resource {
        operation: String,
        path: String,
        reason: String,
    },

    /// A diagnostic command failed. Recorded, never fatal to the run.
    #[error("Command failed: {id} - {reason}")]
    Command { id: String, reason: String },

    /// A diagnostic command exceeded its timeout. Recorded, never fatal.
    #[error("Command timed out: {id} after {seconds}s")]
    Timeout { id: String, seconds: u64 },

    /// The run was cancelled externally.
    #[error("Run cancelled")]
    Cancelled,
}

impl DiagError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn resource(
        operation: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Resource {
            operation: operation.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn command(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(id: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            id: id.into(),
            seconds,
        }
    }

    /// Whether this error halts the run (as opposed to being recorded
    /// against a single command and carried on from).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Resource { .. } | Self::Cancelled
        )
    }
}
