//! Try several backends in order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clone::CloneLocator;
use crate::error::{Attempt, LocateError, Result};
use crate::filesystem::FilesystemLocator;
use crate::handle::RepositoryHandle;
use crate::policy::ResolutionPolicy;
use crate::reference::Target;
use crate::Locator;

/// Tries each backend in registration order and returns the first success.
///
/// When every backend fails, the error lists each backend's reason, since
/// "not a local path" and "authentication rejected" call for very different
/// fixes.
pub struct MultiLocator {
    backends: Vec<Box<dyn Locator>>,
}

impl MultiLocator {
    /// Filesystem first, then clone.
    pub fn new(policy: Arc<ResolutionPolicy>) -> Self {
        Self::empty()
            .with(FilesystemLocator::new())
            .with(CloneLocator::new(policy))
    }

    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Appends a backend with the lowest priority so far.
    pub fn with(mut self, backend: impl Locator + 'static) -> Self {
        self.backends.push(Box::new(backend));
        self
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

impl Locator for MultiLocator {
    fn name(&self) -> &'static str {
        "multi"
    }

    fn open(&self, cancel: &CancellationToken, target: &Target) -> Result<Arc<RepositoryHandle>> {
        let mut attempts = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            match backend.open(cancel, target) {
                Ok(handle) => return Ok(handle),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    tracing::debug!(backend = backend.name(), key = %target.key, error = %err, "locator backend failed");
                    attempts.push(Attempt {
                        backend: backend.name(),
                        error: err,
                    });
                }
            }
        }
        Err(LocateError::Exhausted {
            key: target.key.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::normalize;
    use git2::Repository;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Failing {
        name: &'static str,
        error: LocateError,
        calls: Arc<AtomicUsize>,
    }

    impl Locator for Failing {
        fn name(&self) -> &'static str {
            self.name
        }

        fn open(&self, _cancel: &CancellationToken, _target: &Target) -> Result<Arc<RepositoryHandle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    #[test]
    fn test_default_backend_order() {
        let multi = MultiLocator::new(Arc::new(ResolutionPolicy::new()));
        assert_eq!(multi.backend_names(), vec!["filesystem", "clone"]);
    }

    #[test]
    fn test_first_success_stops_the_chain() {
        let temp = TempDir::new().unwrap();
        Repository::init(temp.path()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let multi = MultiLocator::empty().with(FilesystemLocator::new()).with(Failing {
            name: "never",
            error: LocateError::NotFound("unused".to_string()),
            calls: calls.clone(),
        });

        let target = normalize(temp.path().to_str().unwrap(), &ResolutionPolicy::new()).unwrap();
        multi.open(&CancellationToken::new(), &target).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_total_failure_reports_every_backend() {
        let temp = TempDir::new().unwrap();
        let policy = Arc::new(ResolutionPolicy::new().with_clone_dir(temp.path().join("clones")));
        let multi = MultiLocator::new(policy.clone());

        let target = normalize(
            temp.path().join("missing").join("repo").to_str().unwrap(),
            &policy,
        )
        .unwrap();
        let err = multi.open(&CancellationToken::new(), &target).unwrap_err();

        match &err {
            LocateError::Exhausted { attempts, .. } => {
                let backends: Vec<_> = attempts.iter().map(|a| a.backend).collect();
                assert_eq!(backends, vec!["filesystem", "clone"]);
            }
            other => panic!("expected aggregated error, got {:?}", other),
        }
        let message = err.to_string();
        assert!(message.contains("filesystem:"));
        assert!(message.contains("clone:"));
    }

    #[test]
    fn test_cancellation_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let multi = MultiLocator::empty()
            .with(Failing {
                name: "first",
                error: LocateError::Cancelled("k".to_string()),
                calls: calls.clone(),
            })
            .with(Failing {
                name: "second",
                error: LocateError::NotFound("unused".to_string()),
                calls: calls.clone(),
            });

        let target = normalize("https://example.com/a/b", &ResolutionPolicy::new()).unwrap();
        let err = multi.open(&CancellationToken::new(), &target).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
