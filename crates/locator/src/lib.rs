//! # repoql-locator
//!
//! Turns repository references into open git repositories.
//!
//! A reference is whatever a user typed: a local path, a clone URL, or an
//! `owner/repo` shorthand. [`normalize`] classifies it and derives a
//! [`CacheKey`]; a [`Locator`] resolves the resulting [`Target`] into a shared
//! [`RepositoryHandle`].
//!
//! Locators compose. The backends ([`FilesystemLocator`], [`CloneLocator`])
//! are tried in order by a [`MultiLocator`], and the decorators
//! ([`CachingLocator`], [`LoggingLocator`]) wrap any locator without changing
//! what it returns.
//!
//! ```no_run
//! use std::sync::Arc;
//! use repoql_locator::{default_chain, normalize, Locator, ResolutionPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! let policy = Arc::new(ResolutionPolicy::default());
//! let locator = default_chain(policy.clone());
//!
//! let target = normalize(".", &policy)?;
//! let handle = locator.open(&CancellationToken::new(), &target)?;
//! println!("opened {}", handle.git_dir().display());
//! # Ok::<(), repoql_locator::LocateError>(())
//! ```

pub mod caching;
pub mod clone;
pub mod error;
pub mod filesystem;
pub mod handle;
pub mod logging;
pub mod multi;
pub mod policy;
pub mod reference;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use caching::CachingLocator;
pub use clone::CloneLocator;
pub use error::{Attempt, LocateError, Result};
pub use filesystem::FilesystemLocator;
pub use handle::RepositoryHandle;
pub use logging::LoggingLocator;
pub use multi::MultiLocator;
pub use policy::{Credentials, ResolutionPolicy};
pub use reference::{normalize, CacheKey, ReferenceKind, Target};

/// Resolves a normalized reference into an open repository.
///
/// Implementations must be safe to share between threads: a single locator
/// chain serves every connection in the process.
pub trait Locator: Send + Sync {
    /// Short name used in logs and aggregated errors.
    fn name(&self) -> &'static str;

    /// Opens the repository identified by `target`.
    ///
    /// Long-running work (network transfers) should stop promptly once
    /// `cancel` fires and report [`LocateError::Cancelled`].
    fn open(&self, cancel: &CancellationToken, target: &Target) -> Result<Arc<RepositoryHandle>>;
}

impl<L: Locator + ?Sized> Locator for Box<L> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn open(&self, cancel: &CancellationToken, target: &Target) -> Result<Arc<RepositoryHandle>> {
        (**self).open(cancel, target)
    }
}

impl<L: Locator + ?Sized> Locator for Arc<L> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn open(&self, cancel: &CancellationToken, target: &Target) -> Result<Arc<RepositoryHandle>> {
        (**self).open(cancel, target)
    }
}

/// The locator chain used by the command line: local checkouts first, then
/// clones, with every resolution logged and successful handles cached.
pub fn default_chain(
    policy: Arc<ResolutionPolicy>,
) -> CachingLocator<LoggingLocator<MultiLocator>> {
    CachingLocator::new(LoggingLocator::new(MultiLocator::new(policy)))
}
