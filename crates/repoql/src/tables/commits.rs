//! `commits`: the commit log reachable from a revision.

use std::sync::Arc;

use git2::{Commit, Mailmap, Repository, Signature};
use rusqlite::types::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{RepoqlError, Result};
use crate::tables::walk::CommitWalk;
use crate::tables::{
    format_git_time, text_constraint, ColumnDef, ColumnType, Constraint, EntityIterator, OrderBy,
    RowSource, Table, TableContext,
};

const REPOSITORY: usize = 9;
const REVISION: usize = 10;

static COLUMNS: [ColumnDef; 11] = [
    ColumnDef::visible("hash", ColumnType::Text),
    ColumnDef::visible("message", ColumnType::Text),
    ColumnDef::visible("author_name", ColumnType::Text),
    ColumnDef::visible("author_email", ColumnType::Text),
    ColumnDef::visible("author_when", ColumnType::Text),
    ColumnDef::visible("committer_name", ColumnType::Text),
    ColumnDef::visible("committer_email", ColumnType::Text),
    ColumnDef::visible("committer_when", ColumnType::Text),
    ColumnDef::visible("parents", ColumnType::Integer),
    ColumnDef::hidden("repository", ColumnType::Text),
    ColumnDef::hidden("revision", ColumnType::Text),
];

/// Walks history newest-first. Identities go through `.mailmap` unless the
/// engine was configured with `skip_mailmap`.
pub struct CommitsTable {
    context: Arc<TableContext>,
}

impl CommitsTable {
    pub fn new(context: Arc<TableContext>) -> Self {
        Self { context }
    }
}

impl Table for CommitsTable {
    fn name(&self) -> &'static str {
        "commits"
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

        let mailmap = if self.context.settings().skip_mailmap {
            None
        } else {
            scope.repo.mailmap().ok()
        };
        let walk = CommitWalk::new(&scope.repo, scope.commit)?;

        let source = CommitsSource {
            repository: scope.repository,
            revision: scope.revision,
            repo: scope.repo,
            mailmap,
            walk,
            current: None,
        };
        Ok(EntityIterator::new(self.name(), COLUMNS.len(), cancel, source))
    }
}

struct CommitRow {
    hash: String,
    message: String,
    author_name: String,
    author_email: String,
    author_when: String,
    committer_name: String,
    committer_email: String,
    committer_when: String,
    parents: i64,
}

impl CommitRow {
    fn read(commit: &Commit<'_>, mailmap: Option<&Mailmap>) -> Result<Self> {
        let (author, committer) = match mailmap {
            Some(mailmap) => (
                commit.author_with_mailmap(mailmap)?,
                commit.committer_with_mailmap(mailmap)?,
            ),
            None => (commit.author().to_owned(), commit.committer().to_owned()),
        };
        Ok(Self {
            hash: commit.id().to_string(),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            author_name: signature_name(&author),
            author_email: signature_email(&author),
            author_when: format_git_time(author.when()),
            committer_name: signature_name(&committer),
            committer_email: signature_email(&committer),
            committer_when: format_git_time(committer.when()),
            parents: commit.parent_count() as i64,
        })
    }
}

fn signature_name(sig: &Signature<'_>) -> String {
    String::from_utf8_lossy(sig.name_bytes()).into_owned()
}

fn signature_email(sig: &Signature<'_>) -> String {
    String::from_utf8_lossy(sig.email_bytes()).into_owned()
}

struct CommitsSource {
    repository: String,
    revision: String,
    repo: Repository,
    mailmap: Option<Mailmap>,
    walk: CommitWalk,
    current: Option<CommitRow>,
}

impl RowSource for CommitsSource {
    fn advance(&mut self, _cancel: &CancellationToken) -> Result<bool> {
        self.current = match self.walk.next_commit(&self.repo)? {
            Some(commit) => Some(CommitRow::read(&commit, self.mailmap.as_ref())?),
            None => None,
        };
        Ok(self.current.is_some())
    }

    fn column(&self, index: usize) -> Result<Value> {
        let Some(row) = self.current.as_ref() else {
            return Err(RepoqlError::NoCurrentRow("commits"));
        };
        Ok(match index {
            0 => Value::Text(row.hash.clone()),
            1 => Value::Text(row.message.clone()),
            2 => Value::Text(row.author_name.clone()),
            3 => Value::Text(row.author_email.clone()),
            4 => Value::Text(row.author_when.clone()),
            5 => Value::Text(row.committer_name.clone()),
            6 => Value::Text(row.committer_email.clone()),
            7 => Value::Text(row.committer_when.clone()),
            8 => Value::Integer(row.parents),
            REPOSITORY => Value::Text(self.repository.clone()),
            REVISION => Value::Text(self.revision.clone()),
            _ => {
                return Err(RepoqlError::ColumnOutOfRange {
                    table: "commits",
                    index,
                })
            }
        })
    }
}
