//! Open repositories that already exist on disk.

use std::sync::Arc;

use git2::Repository;
use tokio_util::sync::CancellationToken;

use crate::error::{LocateError, Result};
use crate::handle::RepositoryHandle;
use crate::reference::{ReferenceKind, Target};
use crate::Locator;

/// Opens local repositories. No network access and no side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemLocator;

impl FilesystemLocator {
    pub fn new() -> Self {
        Self
    }
}

impl Locator for FilesystemLocator {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    /// Uses `git2::Repository::discover`, so a directory nested inside a
    /// checkout opens the enclosing repository.
    fn open(&self, cancel: &CancellationToken, target: &Target) -> Result<Arc<RepositoryHandle>> {
        if cancel.is_cancelled() {
            return Err(LocateError::Cancelled(target.key.to_string()));
        }
        let ReferenceKind::LocalPath(path) = &target.kind else {
            return Err(LocateError::NotFound(format!(
                "{} is not a local path",
                target.raw
            )));
        };

        let repo = Repository::discover(path).map_err(|e| {
            LocateError::NotFound(format!("{}: {}", path.display(), e.message()))
        })?;
        Ok(Arc::new(RepositoryHandle::new(target.key.clone(), repo)))
    }
}
