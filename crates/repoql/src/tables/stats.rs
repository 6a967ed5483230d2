//! `stats`: lines added and removed per file, per commit.
//!
//! Each commit is diffed against its first parent (or the empty tree for a
//! root commit). Binary files appear with zero counts. The hidden
//! `max_count` argument stops the walk after that many commits, so
//! `stats WHERE revision = <hash> AND max_count = 1` diffs one commit.

use std::collections::VecDeque;
use std::sync::Arc;

use git2::{Commit, Diff, DiffOptions, Patch, Repository};
use rusqlite::types::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{RepoqlError, Result};
use crate::tables::walk::CommitWalk;
use crate::tables::{
    text_constraint, ColumnDef, ColumnType, Constraint, EntityIterator, OrderBy, RowSource, Table,
    TableContext,
};

const REPOSITORY: usize = 4;
const REVISION: usize = 5;
const MAX_COUNT: usize = 6;

static COLUMNS: [ColumnDef; 7] = [
    ColumnDef::visible("commit_hash", ColumnType::Text),
    ColumnDef::visible("file_path", ColumnType::Text),
    ColumnDef::visible("additions", ColumnType::Integer),
    ColumnDef::visible("deletions", ColumnType::Integer),
    ColumnDef::hidden("repository", ColumnType::Text),
    ColumnDef::hidden("revision", ColumnType::Text),
    ColumnDef {
        not_null: false,
        ..ColumnDef::hidden("max_count", ColumnType::Integer)
    },
];

pub struct StatsTable {
    context: Arc<TableContext>,
}

impl StatsTable {
    pub fn new(context: Arc<TableContext>) -> Self {
        Self { context }
    }
}

impl Table for StatsTable {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn columns(&self) -> &'static [ColumnDef] {
        &COLUMNS
    }

    fn open(&self, constraints: &[Constraint], _order: &[OrderBy]) -> Result<EntityIterator> {
        let max_count = max_count(constraints)?;
        let cancel = self.context.cancellation();
        let scope = self.context.open_scope(
            &cancel,
            text_constraint(constraints, REPOSITORY),
            text_constraint(constraints, REVISION),
        )?;
        let walk = CommitWalk::new(&scope.repo, scope.commit)?;

        let source = StatsSource {
            repository: scope.repository,
            revision: scope.revision,
            repo: scope.repo,
            walk,
            max_count,
            walked: 0,
            pending: VecDeque::new(),
            current: None,
        };
        Ok(EntityIterator::new(self.name(), COLUMNS.len(), cancel, source))
    }
}

fn max_count(constraints: &[Constraint]) -> Result<Option<usize>> {
    let Some(raw) = text_constraint(constraints, MAX_COUNT) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| RepoqlError::UnsupportedConstraint {
            table: "stats",
            column: "max_count".to_string(),
            reason: format!("expected a non-negative integer, got {raw:?}"),
        })
}

struct FileStat {
    commit_hash: String,
    file_path: String,
    additions: i64,
    deletions: i64,
}

fn diff_against_first_parent<'r>(repo: &'r Repository, commit: &Commit<'_>) -> Result<Diff<'r>> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parents().next() {
        Some(parent) => Some(parent.tree()?),
        None => None,
    };
    let mut opts = DiffOptions::new();
    opts.ignore_submodules(true);
    Ok(repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?)
}

fn file_stats(repo: &Repository, commit: &Commit<'_>) -> Result<Vec<FileStat>> {
    let diff = diff_against_first_parent(repo, commit)?;
    let commit_hash = commit.id().to_string();

    let mut stats = Vec::with_capacity(diff.deltas().len());
    for (idx, delta) in diff.deltas().enumerate() {
        let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) else {
            continue;
        };
        let (additions, deletions) = match Patch::from_diff(&diff, idx)? {
            Some(patch) => {
                let (_, additions, deletions) = patch.line_stats()?;
                (additions as i64, deletions as i64)
            }
            None => (0, 0),
        };
        stats.push(FileStat {
            commit_hash: commit_hash.clone(),
            file_path: path.to_string_lossy().into_owned(),
            additions,
            deletions,
        });
    }
    Ok(stats)
}

struct StatsSource {
    repository: String,
    revision: String,
    repo: Repository,
    walk: CommitWalk,
    max_count: Option<usize>,
    walked: usize,
    pending: VecDeque<FileStat>,
    current: Option<FileStat>,
}

impl RowSource for StatsSource {
    fn advance(&mut self, cancel: &CancellationToken) -> Result<bool> {
        // Commits that touch no files (empty merges) yield no rows; keep
        // walking until one does.
        while self.pending.is_empty() {
            if cancel.is_cancelled() {
                return Err(RepoqlError::Cancelled);
            }
            if self.max_count.is_some_and(|max| self.walked >= max) {
                self.current = None;
                return Ok(false);
            }
            let Some(commit) = self.walk.next_commit(&self.repo)? else {
                self.current = None;
                return Ok(false);
            };
            self.walked += 1;
            self.pending.extend(file_stats(&self.repo, &commit)?);
        }
        self.current = self.pending.pop_front();
        Ok(self.current.is_some())
    }

    fn column(&self, index: usize) -> Result<Value> {
        let Some(stat) = self.current.as_ref() else {
            return Err(RepoqlError::NoCurrentRow("stats"));
        };
        Ok(match index {
            0 => Value::Text(stat.commit_hash.clone()),
            1 => Value::Text(stat.file_path.clone()),
            2 => Value::Integer(stat.additions),
            3 => Value::Integer(stat.deletions),
            REPOSITORY => Value::Text(self.repository.clone()),
            REVISION => Value::Text(self.revision.clone()),
            MAX_COUNT => match self.max_count {
                Some(max) => Value::Integer(max as i64),
                None => Value::Null,
            },
            _ => {
                return Err(RepoqlError::ColumnOutOfRange {
                    table: "stats",
                    index,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(value: Value) -> Vec<Constraint> {
        vec![Constraint {
            column: MAX_COUNT,
            value,
        }]
    }

    #[test]
    fn test_max_count_accepts_integers_and_numeric_text() {
        assert_eq!(max_count(&[]).unwrap(), None);
        assert_eq!(max_count(&constraint(Value::Integer(1))).unwrap(), Some(1));
        assert_eq!(max_count(&constraint(Value::Text(" 3 ".to_string()))).unwrap(), Some(3));
    }

    #[test]
    fn test_max_count_rejects_non_numbers() {
        for value in [Value::Integer(-1), Value::Text("all".to_string())] {
            let err = max_count(&constraint(value)).unwrap_err();
            assert!(matches!(
                err,
                RepoqlError::UnsupportedConstraint { table: "stats", .. }
            ));
        }
    }
}
