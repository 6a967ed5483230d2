//! Memoize resolved repositories by cache key.
//!
//! The cache guarantees at most one resolution in flight per key. The first
//! caller for a key inserts a [`Flight`] and resolves outside the map lock;
//! later callers for the same key find the flight and wait on it, then share
//! its outcome. Callers for other keys only touch the map lock briefly, so
//! they never wait behind someone else's clone.
//!
//! Successful handles stay until [`CachingLocator::evict`]. Failures are
//! handed to the callers that were waiting and then forgotten, so the next
//! call retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{LocateError, Result};
use crate::handle::RepositoryHandle;
use crate::reference::{CacheKey, Target};
use crate::Locator;

/// How often a waiter re-checks its own cancellation token.
const WAIT_SLICE: Duration = Duration::from_millis(25);

type Outcome = Result<Arc<RepositoryHandle>>;

/// A resolution in progress that other callers can wait on.
struct Flight {
    outcome: Mutex<Option<Outcome>>,
    landed: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            landed: Condvar::new(),
        }
    }

    fn land(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.landed.notify_all();
    }

    fn wait(&self, cancel: &CancellationToken, key: &CacheKey) -> Outcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            if cancel.is_cancelled() {
                return Err(LocateError::Cancelled(key.to_string()));
            }
            self.landed.wait_for(&mut slot, WAIT_SLICE);
        }
    }
}

enum Entry {
    Resolving(Arc<Flight>),
    Ready(Arc<RepositoryHandle>),
}

/// Wraps a locator and memoizes its handles per [`CacheKey`].
pub struct CachingLocator<L> {
    inner: L,
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl<L: Locator> CachingLocator<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Drops the cached handle for `key`, if resolved. In-flight
    /// resolutions are left alone.
    pub fn evict(&self, key: &CacheKey) -> Option<Arc<RepositoryHandle>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(Entry::Ready(_)) => match entries.remove(key) {
                Some(Entry::Ready(handle)) => Some(handle),
                _ => None,
            },
            _ => None,
        }
    }

    /// Number of resolved handles held.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| matches!(e, Entry::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Publishes the outcome of a resolution, including when the resolving
/// thread unwinds: waiters must never be left parked on a dead flight.
struct FlightGuard<'a> {
    entries: &'a Mutex<HashMap<CacheKey, Entry>>,
    key: &'a CacheKey,
    flight: Arc<Flight>,
    landed: bool,
}

impl FlightGuard<'_> {
    fn finish(mut self, outcome: Outcome) -> Outcome {
        {
            let mut entries = self.entries.lock();
            match &outcome {
                Ok(handle) => {
                    entries.insert(self.key.clone(), Entry::Ready(handle.clone()));
                }
                Err(_) => {
                    entries.remove(self.key);
                }
            }
        }
        self.flight.land(outcome.clone());
        self.landed = true;
        outcome
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.landed {
            return;
        }
        self.entries.lock().remove(self.key);
        self.flight
            .land(Err(LocateError::Interrupted(self.key.to_string())));
    }
}

impl<L: Locator> Locator for CachingLocator<L> {
    fn name(&self) -> &'static str {
        "caching"
    }

    fn open(&self, cancel: &CancellationToken, target: &Target) -> Result<Arc<RepositoryHandle>> {
        let flight = {
            let mut entries = self.entries.lock();
            match entries.get(&target.key) {
                Some(Entry::Ready(handle)) => {
                    tracing::trace!(key = %target.key, "repository cache hit");
                    return Ok(handle.clone());
                }
                Some(Entry::Resolving(flight)) => {
                    let flight = flight.clone();
                    drop(entries);
                    tracing::debug!(key = %target.key, "waiting for in-flight resolution");
                    return flight.wait(cancel, &target.key);
                }
                None => {
                    let flight = Arc::new(Flight::new());
                    entries.insert(target.key.clone(), Entry::Resolving(flight.clone()));
                    flight
                }
            }
        };

        let guard = FlightGuard {
            entries: &self.entries,
            key: &target.key,
            flight,
            landed: false,
        };
        let outcome = self.inner.open(cancel, target);
        guard.finish(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ResolutionPolicy;
    use crate::reference::normalize;
    use git2::Repository;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    /// Resolves every key to the same scratch repository, counting calls.
    /// The first `failures` calls fail with a transient error.
    struct Scripted {
        repo_dir: TempDir,
        calls: AtomicUsize,
        failures: usize,
        delay: Duration,
        gate: Mutex<Option<mpsc::Receiver<()>>>,
        gated_key: Option<CacheKey>,
    }

    impl Scripted {
        fn new() -> Self {
            let repo_dir = TempDir::new().unwrap();
            Repository::init(repo_dir.path()).unwrap();
            Self {
                repo_dir,
                calls: AtomicUsize::new(0),
                failures: 0,
                delay: Duration::ZERO,
                gate: Mutex::new(None),
                gated_key: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Locator for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn open(&self, _cancel: &CancellationToken, target: &Target) -> Outcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.gated_key.as_ref() == Some(&target.key) {
                let gate = self.gate.lock().take();
                if let Some(rx) = gate {
                    rx.recv().unwrap();
                }
            }
            thread::sleep(self.delay);
            if call < self.failures {
                return Err(LocateError::RemoteUnavailable {
                    url: target.raw.clone(),
                    reason: "connection reset".to_string(),
                });
            }
            let repo = Repository::open(self.repo_dir.path()).unwrap();
            Ok(Arc::new(RepositoryHandle::new(target.key.clone(), repo)))
        }
    }

    fn target(raw: &str) -> Target {
        normalize(raw, &ResolutionPolicy::new()).unwrap()
    }

    #[test]
    fn test_repeated_opens_share_one_handle() {
        let cache = CachingLocator::new(Scripted::new());
        let t = target("https://example.com/acme/widgets");
        let cancel = CancellationToken::new();

        let first = cache.open(&cancel, &t).unwrap();
        let second = cache.open(&cancel, &t).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.inner().calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_callers_trigger_one_resolution() {
        let mut scripted = Scripted::new();
        scripted.delay = Duration::from_millis(100);
        let cache = Arc::new(CachingLocator::new(scripted));
        let t = target("https://example.com/acme/widgets");
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let t = t.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.open(&CancellationToken::new(), &t).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.inner().calls(), 1);
        assert!(results.iter().all(|h| Arc::ptr_eq(h, &results[0])));
    }

    #[test]
    fn test_concurrent_callers_share_the_failure() {
        let mut scripted = Scripted::new();
        scripted.failures = 1;
        scripted.delay = Duration::from_millis(100);
        let cache = Arc::new(CachingLocator::new(scripted));
        let t = target("https://example.com/acme/widgets");
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let t = t.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.open(&CancellationToken::new(), &t)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.inner().calls(), 1);
        let first = results[0].as_ref().unwrap_err();
        assert!(matches!(first, LocateError::RemoteUnavailable { .. }));
        assert!(results.iter().all(|r| r.as_ref().unwrap_err() == first));
    }

    #[test]
    fn test_failures_are_not_cached() {
        let mut scripted = Scripted::new();
        scripted.failures = 1;
        let cache = CachingLocator::new(scripted);
        let t = target("https://example.com/acme/widgets");
        let cancel = CancellationToken::new();

        let err = cache.open(&cancel, &t).unwrap_err();
        assert!(err.is_retryable());
        assert!(cache.is_empty());

        cache.open(&cancel, &t).unwrap();
        assert_eq!(cache.inner().calls(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_block_each_other() {
        let (tx, rx) = mpsc::channel();
        let slow = target("https://example.com/acme/slow");
        let mut scripted = Scripted::new();
        scripted.gate = Mutex::new(Some(rx));
        scripted.gated_key = Some(slow.key.clone());
        let cache = Arc::new(CachingLocator::new(scripted));

        let blocked = {
            let cache = cache.clone();
            thread::spawn(move || cache.open(&CancellationToken::new(), &slow))
        };
        while cache.inner().calls() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        // The slow key is parked on its gate; another key must still resolve.
        let fast = target("https://example.com/acme/fast");
        cache.open(&CancellationToken::new(), &fast).unwrap();

        tx.send(()).unwrap();
        blocked.join().unwrap().unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cancelled_waiter_leaves_flight_intact() {
        let (tx, rx) = mpsc::channel();
        let t = target("https://example.com/acme/widgets");
        let mut scripted = Scripted::new();
        scripted.gate = Mutex::new(Some(rx));
        scripted.gated_key = Some(t.key.clone());
        let cache = Arc::new(CachingLocator::new(scripted));

        let leader = {
            let cache = cache.clone();
            let t = t.clone();
            thread::spawn(move || cache.open(&CancellationToken::new(), &t))
        };
        while cache.inner().calls() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cache.open(&cancel, &t).unwrap_err();
        assert!(err.is_cancelled());

        tx.send(()).unwrap();
        leader.join().unwrap().unwrap();
        assert_eq!(cache.inner().calls(), 1);
        cache.open(&CancellationToken::new(), &t).unwrap();
        assert_eq!(cache.inner().calls(), 1);
    }

    #[test]
    fn test_evict_forces_new_resolution() {
        let cache = CachingLocator::new(Scripted::new());
        let t = target("https://example.com/acme/widgets");
        let cancel = CancellationToken::new();

        let first = cache.open(&cancel, &t).unwrap();
        let evicted = cache.evict(&t.key).unwrap();
        assert!(Arc::ptr_eq(&first, &evicted));

        let second = cache.open(&cancel, &t).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.inner().calls(), 2);
    }
}
