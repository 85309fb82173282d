// ⚠️ Error Taxonomy - What went wrong, and whether the run survives it
//
// Per-item errors (FetchError, ParseError, single-transaction StorageError)
// are recorded in the run report. Only a fatal StorageError aborts a run.

use crate::batch::RunReport;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// FETCH ERRORS
// ============================================================================

/// Terminal outcome of a fetch once the retry budget is spent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Identifier does not exist upstream. Never retried.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// Anti-automation challenge survived every challenge-path attempt
    #[error("blocked by anti-automation challenge after {attempts} attempts: {url}")]
    Blocked { url: String, attempts: u32 },

    /// Timeouts, 5xx, connection resets after exponential backoff ran out
    #[error("transient failure after {attempts} attempts for {url}: {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },
}

// ============================================================================
// PARSE ERRORS
// ============================================================================

/// The document arrived but its shape is not what we expect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Page content exists but the identity anchor is gone (markup changed)
    #[error("{kind} page is missing required anchor `{anchor}`")]
    MissingAnchor {
        kind: &'static str,
        anchor: &'static str,
    },

    /// Empty shell page: the site renders this for identifiers it does not know
    #[error("document is not a {kind} record")]
    NotARecord { kind: &'static str },

    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
}

// ============================================================================
// STORAGE ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection-level failure. Fatal to a run.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// One identity's transaction failed and was rolled back
    #[error("transaction failed for {key}: {source}")]
    Transaction {
        key: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Stored data contradicts the schema's guarantees. Fatal to a run.
    #[error("schema invariant violated: {0}")]
    Invariant(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Classify a rusqlite error raised while writing `key`
    pub fn from_sqlite(key: impl Into<String>, err: rusqlite::Error) -> Self {
        let key = key.into();
        if is_connection_level(&err) {
            StorageError::Unavailable(format!("{}: {}", key, err))
        } else {
            StorageError::Transaction { key, source: err }
        }
    }

    /// Whether this failure must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::Invariant(_)
        )
    }
}

fn is_connection_level(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;

    matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
                | ErrorCode::PermissionDenied
        )
    )
}

// ============================================================================
// PER-ITEM CLASSIFICATION
// ============================================================================

/// Anything that can go wrong while processing one work item
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The worker task died before reporting back
    #[error("worker crashed: {0}")]
    Crashed(String),
}

/// Error kind as it appears in the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Blocked,
    Transient,
    Parse,
    Storage,
    Crashed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Blocked => "blocked",
            FailureKind::Transient => "transient",
            FailureKind::Parse => "parse_error",
            FailureKind::Storage => "storage",
            FailureKind::Crashed => "crashed",
        }
    }
}

// ============================================================================
// RUN ABORT
// ============================================================================

/// A run stopped on a fatal storage failure. Carries the partial report so
/// the operator still sees which items landed.
#[derive(Debug, Error)]
#[error("run {} aborted: {cause}", .report.run_id)]
pub struct RunAborted {
    pub report: Box<RunReport>,
    #[source]
    pub cause: StorageError,
}
