use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::state::ResumeKey;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Scan state error: {0}")]
    State(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Matching invariant violated: {0}")]
    MatchingInvariant(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Scan cancelled")]
    Cancelled,
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::State(err.to_string())
    }
}

/// What went wrong with a single work item. Per-file failures are recorded
/// under one of these tags and never abort the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingErrorKind {
    Corrupted,
    Read,
    Timeout,
    Extraction,
    Persistence,
}

impl ProcessingErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingErrorKind::Corrupted => "corrupted",
            ProcessingErrorKind::Read => "read",
            ProcessingErrorKind::Timeout => "timeout",
            ProcessingErrorKind::Extraction => "extraction",
            ProcessingErrorKind::Persistence => "persistence",
        }
    }
}

impl fmt::Display for ProcessingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of a failed work item.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    pub resume_key: ResumeKey,
    pub kind: ProcessingErrorKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ProcessingError {
    pub fn new(resume_key: ResumeKey, kind: ProcessingErrorKind, message: impl Into<String>) -> Self {
        Self {
            resume_key,
            kind,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}
