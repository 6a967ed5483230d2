//! Virtual tables over git data.
//!
//! Every table follows the same protocol: a fixed column list, equality
//! pushdown on hidden columns (`repository`, `revision`), and a lazy
//! [`EntityIterator`] that releases its native resources as soon as it is
//! exhausted or closed. The SQLite adapter in [`crate::sql`] speaks this
//! protocol and nothing table-specific.
//!
//! | Table     | Rows                                   |
//! |-----------|----------------------------------------|
//! | `files`   | blobs in the tree of a revision        |
//! | `commits` | commits reachable from a revision      |
//! | `stats`   | per-file line changes of those commits |

pub mod commits;
pub mod files;
pub mod iterator;
pub mod stats;
mod walk;

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use git2::{Oid, Repository};
use parking_lot::{Mutex, RwLock};
use repoql_locator::{normalize, RepositoryHandle};
use tokio_util::sync::CancellationToken;

use crate::config::{Options, Settings};
use crate::error::{RepoqlError, Result};

pub use commits::CommitsTable;
pub use files::FilesTable;
pub use iterator::{CursorState, EntityIterator, RowSource};
pub use rusqlite::types::Value;
pub use stats::StatsTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Blob,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INT",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// Which ORDER BY direction a column can produce natively.
///
/// A table may only claim an order it is certain to deliver; anything else
/// is left for SQLite to sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortSupport {
    Unsupported,
    Ascending,
    Descending,
}

impl SortSupport {
    pub fn honors(self, desc: bool) -> bool {
        match self {
            SortSupport::Unsupported => false,
            SortSupport::Ascending => !desc,
            SortSupport::Descending => desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub not_null: bool,
    /// Hidden columns are left out of `SELECT *` and double as table-function
    /// arguments. Only they accept pushed-down constraints.
    pub hidden: bool,
    pub sort: SortSupport,
}

impl ColumnDef {
    pub const fn visible(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            not_null: false,
            hidden: false,
            sort: SortSupport::Unsupported,
        }
    }

    pub const fn hidden(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            not_null: true,
            hidden: true,
            sort: SortSupport::Unsupported,
        }
    }
}

/// An equality constraint on a hidden column.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub column: usize,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: usize,
    pub desc: bool,
}

/// A table the query engine can scan.
pub trait Table: Send + Sync {
    fn name(&self) -> &'static str;

    fn columns(&self) -> &'static [ColumnDef];

    /// Starts a scan. A hidden column without a constraint takes its
    /// default. `order` only contains terms the table declared it can honor.
    fn open(&self, constraints: &[Constraint], order: &[OrderBy]) -> Result<EntityIterator>;
}

/// Reads the text value constrained on `column`, if any.
pub(crate) fn text_constraint(constraints: &[Constraint], column: usize) -> Option<String> {
    constraints
        .iter()
        .find(|c| c.column == column)
        .and_then(|c| match &c.value {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
        })
}

/// Shared state every table reads when it opens: configuration, the locator
/// chain, and the cancellation token of the running query.
pub struct TableContext {
    options: Options,
    cancel: RwLock<CancellationToken>,
    /// The last error a table raised, kept typed while SQLite carries only
    /// its message.
    failure: Mutex<Option<(String, RepoqlError)>>,
}

impl TableContext {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            cancel: RwLock::new(CancellationToken::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.options.settings
    }

    /// Token for the query currently running.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.read().clone()
    }

    pub fn cancel(&self) {
        self.cancel.read().cancel();
    }

    /// Installs a fresh token if the current one has fired, so a cancelled
    /// query does not poison the next one.
    pub fn reset_cancellation(&self) {
        let mut cancel = self.cancel.write();
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
    }

    /// Records `err` as the failure of the running statement and returns the
    /// message to hand to SQLite.
    pub(crate) fn record_failure(&self, err: RepoqlError) -> String {
        let message = err.to_string();
        *self.failure.lock() = Some((message.clone(), err));
        message
    }

    /// Takes the recorded failure if SQLite reported it as `message`.
    pub(crate) fn take_failure(&self, message: &str) -> Option<RepoqlError> {
        let mut failure = self.failure.lock();
        match failure.take() {
            Some((recorded, err)) if message.contains(&recorded) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn clear_failure(&self) {
        self.failure.lock().take();
    }

    /// Resolves the repository a query asked for, falling back to the
    /// configured default. Returns the reference used alongside the handle.
    pub fn open_repository(
        &self,
        cancel: &CancellationToken,
        requested: Option<&str>,
    ) -> Result<(String, Arc<RepositoryHandle>)> {
        let reference = self.options.settings.effective_repository(requested).to_string();
        let target = normalize(&reference, &self.options.policy)?;
        let handle = self.options.locator.open(cancel, &target)?;
        Ok((reference, handle))
    }

    /// Resolves repository and revision and opens a native repository owned
    /// by the caller.
    pub(crate) fn open_scope(
        &self,
        cancel: &CancellationToken,
        repository: Option<String>,
        revision: Option<String>,
    ) -> Result<Scope> {
        let (repository, handle) = self.open_repository(cancel, repository.as_deref())?;
        let commit = handle
            .resolve_revision(revision.as_deref())
            .map_err(|e| RepoqlError::invalid_revision(revision.as_deref(), &e))?;
        let repo = handle.open_cursor()?;
        tracing::debug!(
            repository = %repository,
            commit = %commit,
            "opened table scope"
        );
        Ok(Scope {
            repository,
            revision: revision
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "HEAD".to_string()),
            commit,
            repo,
        })
    }
}

/// What one scan works against. The repository is exclusively the scan's.
pub(crate) struct Scope {
    pub repository: String,
    pub revision: String,
    pub commit: Oid,
    pub repo: Repository,
}

/// Formats a git timestamp as RFC 3339 in the signature's own offset.
pub(crate) fn format_git_time(time: git2::Time) -> String {
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60).unwrap_or_else(|| Utc.fix());
    DateTime::from_timestamp(time.seconds(), 0)
        .map(|dt| dt.with_timezone(&offset).to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_support_honors_direction() {
        assert!(!SortSupport::Unsupported.honors(false));
        assert!(SortSupport::Ascending.honors(false));
        assert!(!SortSupport::Ascending.honors(true));
        assert!(SortSupport::Descending.honors(true));
    }

    #[test]
    fn test_text_constraint_lookup() {
        let constraints = vec![
            Constraint {
                column: 3,
                value: Value::Text("acme/widgets".to_string()),
            },
            Constraint {
                column: 4,
                value: Value::Null,
            },
        ];
        assert_eq!(text_constraint(&constraints, 3).as_deref(), Some("acme/widgets"));
        assert_eq!(text_constraint(&constraints, 4), None);
        assert_eq!(text_constraint(&constraints, 5), None);
    }

    #[test]
    fn test_recorded_failure_is_taken_once_by_message() {
        let context = TableContext::new(Options::default());
        context.record_failure(RepoqlError::Cancelled);
        assert!(context.take_failure("syntax error").is_none());

        let message = context.record_failure(RepoqlError::InvalidRevision {
            revision: "nope".to_string(),
            reason: "not found".to_string(),
        });
        assert!(matches!(
            context.take_failure(&message),
            Some(RepoqlError::InvalidRevision { revision, .. }) if revision == "nope"
        ));
        assert!(context.take_failure(&message).is_none());
    }

    #[test]
    fn test_format_git_time_keeps_offset() {
        let time = git2::Time::new(1_700_000_000, 120);
        assert_eq!(format_git_time(time), "2023-11-15T00:13:20+02:00");
    }
}
