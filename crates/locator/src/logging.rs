//! Structured logging around any locator.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::handle::RepositoryHandle;
use crate::reference::Target;
use crate::Locator;

/// Records the start, success or failure, and duration of every resolution.
/// The wrapped locator's result is returned untouched.
pub struct LoggingLocator<L> {
    inner: L,
}

impl<L: Locator> LoggingLocator<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: Locator> Locator for LoggingLocator<L> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn open(&self, cancel: &CancellationToken, target: &Target) -> Result<Arc<RepositoryHandle>> {
        let started = Instant::now();
        tracing::debug!(key = %target.key, locator = self.inner.name(), "resolving repository");

        let outcome = self.inner.open(cancel, target);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(handle) => tracing::info!(
                key = %target.key,
                git_dir = %handle.git_dir().display(),
                elapsed_ms,
                "repository resolved"
            ),
            Err(err) => tracing::warn!(
                key = %target.key,
                error = %err,
                retryable = err.is_retryable(),
                elapsed_ms,
                "repository resolution failed"
            ),
        }
        outcome
    }
}
