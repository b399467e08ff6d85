//! Error types for trackdown

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Ticket not found: {0}")]
    NotFound(String),

    #[error("Ticket already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid ticket ID: {0}")]
    InvalidId(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A document changed on disk after it was read, or a sync pair diverged.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exhausted{}", reset_at.as_ref().map(|t| format!(" (resets at {t})")).unwrap_or_default())]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to write {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote rejected request: {0}")]
    Remote(String),

    #[error("Tracker not initialized. Run 'trackdown init' first.")]
    NotInitialized,

    #[error("Tracker already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid ticket kind: {0}")]
    InvalidKind(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that end a whole sync attempt instead of a single item.
    pub fn is_fatal_for_sync(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_) | Error::RateLimited { .. } | Error::Network(_)
        )
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
