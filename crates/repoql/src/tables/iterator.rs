//! The row iterator shared by every table.

use rusqlite::types::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{RepoqlError, Result};

/// Produces the rows of one scan. Implemented per table.
///
/// Dropping a source must release everything it holds (native repository,
/// walker state). [`EntityIterator`] decides when that happens.
pub trait RowSource {
    /// Moves to the next row. `Ok(false)` means there are no more rows.
    fn advance(&mut self, cancel: &CancellationToken) -> Result<bool>;

    /// Reads column `index` of the current row. Called only while
    /// positioned, with an index inside the table's column list.
    fn column(&self, index: usize) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Opened, not yet advanced.
    Ready,
    /// On a row.
    Positioned,
    /// Past the last row (or failed); the source has been released.
    Exhausted,
    /// Closed explicitly. Terminal.
    Closed,
}

/// A lazy, forward-only, non-restartable scan over a table.
///
/// ```text
/// Ready --next--> Positioned --next--> Positioned | Exhausted
///   any state --close--> Closed
/// ```
///
/// The row source is dropped the moment the scan is exhausted, fails, or is
/// closed, whichever comes first, and never twice.
pub struct EntityIterator {
    table: &'static str,
    width: usize,
    state: CursorState,
    source: Option<Box<dyn RowSource>>,
    cancel: CancellationToken,
}

impl EntityIterator {
    pub fn new(
        table: &'static str,
        width: usize,
        cancel: CancellationToken,
        source: impl RowSource + 'static,
    ) -> Self {
        Self {
            table,
            width,
            state: CursorState::Ready,
            source: Some(Box::new(source)),
            cancel,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_positioned(&self) -> bool {
        self.state == CursorState::Positioned
    }

    /// Advances one row; `Ok(true)` when positioned on a new row.
    pub fn next(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Closed => return Err(RepoqlError::UseAfterClose(self.table)),
            CursorState::Exhausted => return Ok(false),
            CursorState::Ready | CursorState::Positioned => {}
        }
        if self.cancel.is_cancelled() {
            self.release(CursorState::Exhausted);
            return Err(RepoqlError::Cancelled);
        }
        let Some(source) = self.source.as_mut() else {
            self.state = CursorState::Exhausted;
            return Ok(false);
        };
        match source.advance(&self.cancel) {
            Ok(true) => {
                self.state = CursorState::Positioned;
                Ok(true)
            }
            Ok(false) => {
                self.release(CursorState::Exhausted);
                Ok(false)
            }
            Err(err) => {
                self.release(CursorState::Exhausted);
                Err(err)
            }
        }
    }

    /// Reads a column of the current row. Repeatable; no side effects.
    pub fn column(&self, index: usize) -> Result<Value> {
        match self.state {
            CursorState::Closed => Err(RepoqlError::UseAfterClose(self.table)),
            CursorState::Positioned if index >= self.width => Err(RepoqlError::ColumnOutOfRange {
                table: self.table,
                index,
            }),
            CursorState::Positioned => match self.source.as_ref() {
                Some(source) => source.column(index),
                None => Err(RepoqlError::NoCurrentRow(self.table)),
            },
            CursorState::Ready | CursorState::Exhausted => Err(RepoqlError::NoCurrentRow(self.table)),
        }
    }

    /// Releases the scan. Safe to call any number of times.
    pub fn close(&mut self) {
        self.release(CursorState::Closed);
    }

    fn release(&mut self, state: CursorState) {
        if self.source.take().is_some() {
            tracing::trace!(table = self.table, ?state, "released table scan");
        }
        self.state = state;
    }
}

impl std::fmt::Debug for EntityIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityIterator")
            .field("table", &self.table)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Yields `rows` rows of `[n, n * 10]` and counts how often it is dropped.
    struct Counting {
        rows: i64,
        current: i64,
        drops: Arc<AtomicUsize>,
    }

    impl RowSource for Counting {
        fn advance(&mut self, _cancel: &CancellationToken) -> Result<bool> {
            if self.current >= self.rows {
                return Ok(false);
            }
            self.current += 1;
            Ok(true)
        }

        fn column(&self, index: usize) -> Result<Value> {
            Ok(Value::Integer(self.current * if index == 0 { 1 } else { 10 }))
        }
    }

    impl Drop for Counting {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn iterator(rows: i64) -> (EntityIterator, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        let source = Counting {
            rows,
            current: 0,
            drops: drops.clone(),
        };
        (
            EntityIterator::new("counting", 2, CancellationToken::new(), source),
            drops,
        )
    }

    #[test]
    fn test_exhaustion_releases_source_once() {
        let (mut iter, drops) = iterator(2);
        assert_eq!(iter.state(), CursorState::Ready);

        assert!(iter.next().unwrap());
        assert_eq!(iter.column(0).unwrap(), Value::Integer(1));
        assert_eq!(iter.column(1).unwrap(), Value::Integer(10));
        assert_eq!(iter.column(1).unwrap(), Value::Integer(10));
        assert!(iter.next().unwrap());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        assert!(!iter.next().unwrap());
        assert_eq!(iter.state(), CursorState::Exhausted);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        assert!(!iter.next().unwrap());
        iter.close();
        iter.close();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_early_close_releases_source() {
        let (mut iter, drops) = iterator(10);
        assert!(iter.next().unwrap());
        iter.close();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(iter.state(), CursorState::Closed);
    }

    #[test]
    fn test_use_after_close_fails() {
        let (mut iter, _) = iterator(3);
        iter.close();
        assert!(matches!(iter.next(), Err(RepoqlError::UseAfterClose("counting"))));
        assert!(matches!(iter.column(0), Err(RepoqlError::UseAfterClose(_))));
    }

    #[test]
    fn test_column_requires_current_row() {
        let (mut iter, _) = iterator(1);
        assert!(matches!(iter.column(0), Err(RepoqlError::NoCurrentRow(_))));
        assert!(iter.next().unwrap());
        assert!(matches!(
            iter.column(2),
            Err(RepoqlError::ColumnOutOfRange { index: 2, .. })
        ));
        assert!(!iter.next().unwrap());
        assert!(matches!(iter.column(0), Err(RepoqlError::NoCurrentRow(_))));
    }

    #[test]
    fn test_cancellation_stops_the_scan() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let source = Counting {
            rows: 5,
            current: 0,
            drops: drops.clone(),
        };
        let mut iter = EntityIterator::new("counting", 2, cancel.clone(), source);

        assert!(iter.next().unwrap());
        cancel.cancel();
        assert!(matches!(iter.next(), Err(RepoqlError::Cancelled)));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(!iter.next().unwrap());
    }

    #[test]
    fn test_drop_without_close_releases_source() {
        let (mut iter, drops) = iterator(4);
        assert!(iter.next().unwrap());
        drop(iter);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
