//! Error types for repoql.

use repoql_locator::LocateError;
use thiserror::Error;

/// Result type for repoql operations.
pub type Result<T> = std::result::Result<T, RepoqlError>;

#[derive(Error, Debug)]
pub enum RepoqlError {
    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error("invalid revision {revision:?}: {reason}")]
    InvalidRevision { revision: String, reason: String },

    #[error("unsupported constraint on {table}.{column}: {reason}")]
    UnsupportedConstraint {
        table: &'static str,
        column: String,
        reason: String,
    },

    #[error("{0} iterator used after close")]
    UseAfterClose(&'static str),

    #[error("{0} iterator has no current row")]
    NoCurrentRow(&'static str),

    #[error("{table} has no column {index}")]
    ColumnOutOfRange { table: &'static str, index: usize },

    #[error("query cancelled")]
    Cancelled,

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid date {0:?}: expected YYYY-MM-DD or a SQLite date modifier such as '-7 days'")]
    InvalidDate(String),
}

impl RepoqlError {
    /// Whether running the same query again later could succeed, such as
    /// after a transport failure while cloning.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepoqlError::Locate(err) => err.is_retryable(),
            RepoqlError::Cancelled => true,
            _ => false,
        }
    }

    pub(crate) fn invalid_revision(revision: Option<&str>, err: &git2::Error) -> Self {
        RepoqlError::InvalidRevision {
            revision: revision.unwrap_or("HEAD").to_string(),
            reason: err.message().to_string(),
        }
    }
}
