//! Error types for symbol indexing and search

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SymbolsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Index {} has no commit metadata", .0.display())]
    MissingCommit(PathBuf),

    #[error("Git error in {repo}: {message}")]
    Git { repo: String, message: String },

    #[error("Parse error for {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Background task failed: {0}")]
    BuildTask(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Config parse error: {0}")]
    ConfigParse(String),
}

impl SymbolsError {
    /// True for errors caused by the caller giving up (cancel or deadline).
    /// These are transient and the request can be retried.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// True for errors caused by a malformed request rather than the system.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidPattern { .. } | Self::InvalidRequest(_))
    }

    pub(crate) fn git(repo: &str, message: impl Into<String>) -> Self {
        Self::Git {
            repo: repo.to_string(),
            message: message.into(),
        }
    }
}
