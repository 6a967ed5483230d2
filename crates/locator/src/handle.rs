//! Opened repositories.

use std::path::{Path, PathBuf};

use git2::{Oid, Repository};
use parking_lot::Mutex;

use crate::reference::CacheKey;

/// An opened repository, shared by every query that resolves the same key.
///
/// The handle owns its native `git2::Repository` behind a mutex, so shared
/// access is serialized. Iterators that walk the object graph should not
/// borrow that repository for their whole lifetime; they call
/// [`open_cursor`](Self::open_cursor) to get a repository of their own and
/// drop it when they finish.
pub struct RepositoryHandle {
    key: CacheKey,
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    repo: Mutex<Repository>,
}

impl RepositoryHandle {
    pub fn new(key: CacheKey, repo: Repository) -> Self {
        let git_dir = repo.path().to_path_buf();
        let workdir = repo.workdir().map(Path::to_path_buf);
        Self {
            key,
            git_dir,
            workdir,
            repo: Mutex::new(repo),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The repository's object store (`.git` directory, or the repository
    /// itself when bare).
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The working tree, if the repository has one.
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    /// Runs `f` with exclusive access to the shared native repository.
    pub fn with_repo<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Repository) -> T,
    {
        let repo = self.repo.lock();
        f(&repo)
    }

    /// Opens an independent native repository over the same object store.
    ///
    /// The caller owns the result; dropping it releases the native resources.
    pub fn open_cursor(&self) -> Result<Repository, git2::Error> {
        Repository::open(&self.git_dir)
    }

    /// Resolves `revision` to a commit id. `None` or an empty string means
    /// the current `HEAD`.
    pub fn resolve_revision(&self, revision: Option<&str>) -> Result<Oid, git2::Error> {
        self.with_repo(|repo| {
            let commit = match revision.map(str::trim).filter(|r| !r.is_empty()) {
                None => repo.head()?.peel_to_commit()?,
                Some(rev) => repo.revparse_single(rev)?.peel_to_commit()?,
            };
            Ok(commit.id())
        })
    }
}

impl std::fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("key", &self.key)
            .field("git_dir", &self.git_dir)
            .field("workdir", &self.workdir)
            .finish()
    }
}
