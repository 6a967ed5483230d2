//! Lazy commit-graph walk used by `commits` and `stats`.

use std::collections::{BinaryHeap, HashSet};

use git2::{Commit, Oid, Repository};

/// Heap entry: newest committer time first, ties broken by id.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Pending(i64, Oid);

/// Visits every commit reachable from a starting point exactly once, newest
/// first by committer time.
///
/// Holds only object ids, so it does not borrow the repository between
/// steps. A parent newer than an already-visited child (clock skew) is
/// still emitted, just later; the order is deterministic but not strictly
/// sorted by time.
pub(crate) struct CommitWalk {
    queue: BinaryHeap<Pending>,
    seen: HashSet<Oid>,
}

impl CommitWalk {
    pub fn new(repo: &Repository, start: Oid) -> Result<Self, git2::Error> {
        let commit = repo.find_commit(start)?;
        let mut walk = Self {
            queue: BinaryHeap::new(),
            seen: HashSet::new(),
        };
        walk.seen.insert(start);
        walk.queue.push(Pending(commit.time().seconds(), start));
        Ok(walk)
    }

    pub fn next_commit<'r>(&mut self, repo: &'r Repository) -> Result<Option<Commit<'r>>, git2::Error> {
        let Some(Pending(_, id)) = self.queue.pop() else {
            return Ok(None);
        };
        let commit = repo.find_commit(id)?;
        for parent in commit.parents() {
            if self.seen.insert(parent.id()) {
                self.queue.push(Pending(parent.time().seconds(), parent.id()));
            }
        }
        Ok(Some(commit))
    }
}
