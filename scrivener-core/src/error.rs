//! Error types for scrivener-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the scrivener-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Taxonomy table failed to load or validate
    #[error("taxonomy error: {0}")]
    Taxonomy(String),

    /// A tool needs a project but none could be resolved
    #[error("no active project: {guidance}")]
    NoActiveProject { guidance: String },

    /// Path is not usable as a project root
    #[error("not a valid project root: {}", .0.display())]
    InvalidProjectRoot(PathBuf),

    /// Atomic replace of the context pointer failed
    #[error("failed to write context pointer {}: {source}", path.display())]
    ContextWriteConflict {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Telemetry event could not be persisted
    #[error("telemetry write failed: {0}")]
    TelemetryWriteFailure(String),

    /// Workflow recompute ran past its budget
    #[error("recompute exceeded budget: {elapsed_ms}ms > {budget_ms}ms")]
    RecomputeTimeout { elapsed_ms: u64, budget_ms: u64 },

    /// Project not found in this store
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session status change not allowed by the lifecycle
    #[error("invalid session transition: {from} -> {to}")]
    InvalidSessionTransition { from: String, to: String },

    /// No tool registered under this name
    #[error("tool not found: {0}")]
    ToolNotFound(String),
}

impl Error {
    /// Whether this error may be surfaced to the caller of a tool.
    ///
    /// Only failures that prevent choosing a project (or finding the tool at
    /// all) cross the interceptor boundary; everything else degrades.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Error::NoActiveProject { .. } | Error::InvalidProjectRoot(_) | Error::ToolNotFound(_)
        )
    }
}

/// Result type alias for scrivener-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_visible_errors() {
        let err = Error::NoActiveProject {
            guidance: "run `scrivener switch <path>`".to_string(),
        };
        assert!(err.is_user_visible());
        assert!(err.to_string().contains("scrivener switch"));

        assert!(!Error::TelemetryWriteFailure("disk full".to_string()).is_user_visible());
        assert!(!Error::RecomputeTimeout {
            elapsed_ms: 30,
            budget_ms: 10
        }
        .is_user_visible());
    }
}
