//! `files`: the blobs in a revision's tree.
//!
//! ```sql
//! SELECT path, executable, length(contents) FROM files('/path/to/repo', 'HEAD~3');
//! ```
//!
//! Opening a scan walks the whole tree once to list paths, ids, and modes.
//! Blob contents are only read when the `contents` column is asked for, so
//! memory stays proportional to the number of files, not their size.

use std::sync::Arc;

use git2::{FileMode, ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};
use rusqlite::types::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{RepoqlError, Result};
use crate::tables::{
    text_constraint, ColumnDef, ColumnType, Constraint, EntityIterator, OrderBy, RowSource, Table,
    TableContext,
};

const PATH: usize = 0;
const EXECUTABLE: usize = 1;
const CONTENTS: usize = 2;
const REPOSITORY: usize = 3;
const REVISION: usize = 4;

static COLUMNS: [ColumnDef; 5] = [
    ColumnDef::visible("path", ColumnType::Text),
    ColumnDef::visible("executable", ColumnType::Integer),
    ColumnDef::visible("contents", ColumnType::Blob),
    ColumnDef::hidden("repository", ColumnType::Text),
    ColumnDef::hidden("revision", ColumnType::Text),
];

pub struct FilesTable {
    context: Arc<TableContext>,
}

impl FilesTable {
    pub fn new(context: Arc<TableContext>) -> Self {
        Self { context }
    }
}

impl Table for FilesTable {
    fn name(&self) -> &'static str {
        "files"
    }

    fn columns(&self) -> &'static [ColumnDef] {
        &COLUMNS
    }

    fn open(&self, constraints: &[Constraint], _order: &[OrderBy]) -> Result<EntityIterator> {
        let cancel = self.context.cancellation();
        let scope = self.context.open_scope(
            &cancel,
            text_constraint(constraints, REPOSITORY),
            text_constraint(constraints, REVISION),
        )?;

        let files = list_blobs(&scope.repo, scope.commit, &cancel)?;
        tracing::debug!(
            repository = %scope.repository,
            commit = %scope.commit,
            files = files.len(),
            "listed files"
        );

        let source = FilesSource {
            repository: scope.repository,
            revision: scope.revision,
            repo: scope.repo,
            files,
            index: None,
        };
        Ok(EntityIterator::new(self.name(), COLUMNS.len(), cancel, source))
    }
}

struct FileEntry {
    path: String,
    id: Oid,
    executable: bool,
}

/// Pre-order walk of the commit's tree, keeping blobs only. Subtrees and
/// submodule links are skipped.
fn list_blobs(repo: &Repository, commit: Oid, cancel: &CancellationToken) -> Result<Vec<FileEntry>> {
    let tree = repo.find_commit(commit)?.tree()?;
    let executable_mode = i32::from(FileMode::BlobExecutable);

    let mut files = Vec::with_capacity(tree.len());
    let mut cancelled = false;
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if cancel.is_cancelled() {
            cancelled = true;
            return TreeWalkResult::Abort;
        }
        if entry.kind() != Some(ObjectType::Blob) {
            return TreeWalkResult::Ok;
        }
        let name = String::from_utf8_lossy(entry.name_bytes());
        files.push(FileEntry {
            path: format!("{root}{name}"),
            id: entry.id(),
            executable: entry.filemode() == executable_mode,
        });
        TreeWalkResult::Ok
    })
    .or_else(|e| if cancelled { Ok(()) } else { Err(e) })?;

    if cancelled {
        return Err(RepoqlError::Cancelled);
    }
    Ok(files)
}

struct FilesSource {
    repository: String,
    revision: String,
    repo: Repository,
    files: Vec<FileEntry>,
    index: Option<usize>,
}

impl FilesSource {
    fn current(&self) -> Option<&FileEntry> {
        self.index.and_then(|i| self.files.get(i))
    }
}

impl RowSource for FilesSource {
    fn advance(&mut self, _cancel: &CancellationToken) -> Result<bool> {
        let next = self.index.map_or(0, |i| i + 1);
        self.index = Some(next.min(self.files.len()));
        Ok(next < self.files.len())
    }

    fn column(&self, index: usize) -> Result<Value> {
        let Some(file) = self.current() else {
            return Err(RepoqlError::NoCurrentRow("files"));
        };
        Ok(match index {
            PATH => Value::Text(file.path.clone()),
            EXECUTABLE => Value::Integer(i64::from(file.executable)),
            CONTENTS => Value::Blob(self.repo.find_blob(file.id)?.content().to_vec()),
            REPOSITORY => Value::Text(self.repository.clone()),
            REVISION => Value::Text(self.revision.clone()),
            _ => {
                return Err(RepoqlError::ColumnOutOfRange {
                    table: "files",
                    index,
                })
            }
        })
    }
}
