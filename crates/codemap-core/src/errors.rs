//! Error types for the codemap core library.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable reason an archive was rejected before extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    EmptyArchive,
    InvalidArchive,
    TooLarge,
    BombSuspected,
    TooManyEntries,
    PathTraversal,
}

impl RejectReason {
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::EmptyArchive => "empty_archive",
            RejectReason::InvalidArchive => "invalid_archive",
            RejectReason::TooLarge => "too_large",
            RejectReason::BombSuspected => "bomb_suspected",
            RejectReason::TooManyEntries => "too_many_entries",
            RejectReason::PathTraversal => "path_traversal",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An archive rejected by the guard. Nothing has been written when this is
/// produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct ValidationError {
    pub reason: RejectReason,
    pub detail: String,
}

impl ValidationError {
    pub fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Top-level error enum for the codemap core library.
#[derive(Debug, thiserror::Error)]
pub enum CodemapError {
    #[error("Archive rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Analysis cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodemapError {
    /// Stable code for callers that map errors onto their own protocol.
    pub fn code(&self) -> &'static str {
        match self {
            CodemapError::Validation(err) => err.reason.code(),
            CodemapError::Extraction(_) => "extraction_failed",
            CodemapError::NotFound(_) => "not_found",
            CodemapError::Busy(_) => "busy",
            CodemapError::Cancelled(_) => "cancelled",
            CodemapError::InvalidRequest(_) => "invalid_request",
            CodemapError::Config(_) => "config",
            CodemapError::Io(_) | CodemapError::Sqlite(_) | CodemapError::Json(_) => "internal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CodemapError::NotFound(_))
    }
}

pub type CodemapResult<T> = Result<T, CodemapError>;
