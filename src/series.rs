//! Growth-only sample series shared between the acquisition writer and readers
//!
//! Every series produced by the analyzer is append-only: elements are never
//! mutated, reordered or removed once pushed. The writer publishes the new
//! length with a release store only after the element is in place, so a
//! reader that observes length `L` may safely read indices `[0, L)` while
//! the writer keeps appending past `L`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// One derived data point: a value plus the raw-series index it belongs to.
///
/// Timestamps are raw-series indices rather than wall-clock times; plotting
/// the raw series with `x0 = 0, dx = 1` lines the derived series up with it
/// directly. Averaged entries sit on half indices, hence `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    /// Derived value (volts)
    pub value: f64,
    /// Raw-series index at the time the value was produced
    pub timestamp: f64,
}

/// Append-only, single-writer/multi-reader series.
///
/// # Example
/// ```
/// use pindaq::series::Series;
///
/// let series: Series<f64> = Series::new();
/// series.push(1.0);
/// series.push(2.0);
/// assert_eq!(series.len(), 2);
/// assert_eq!(series.slice_from(1), vec![2.0]);
/// ```
#[derive(Debug)]
pub struct Series<T> {
    data: RwLock<Vec<T>>,
    len: AtomicUsize,
}

impl<T: Copy> Series<T> {
    /// Create an empty series
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Vec::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Create a series pre-populated with seed elements
    pub fn with_seed(seed: &[T]) -> Self {
        Self {
            data: RwLock::new(seed.to_vec()),
            len: AtomicUsize::new(seed.len()),
        }
    }

    /// Append one element. Only the single producing thread calls this.
    pub fn push(&self, value: T) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.push(value);
        // Length is published after the element is stored.
        self.len.store(data.len(), Ordering::Release);
    }

    /// Published length. Elements below this index are immutable.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether nothing has been published yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, if already published
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len() {
            return None;
        }
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(index).copied()
    }

    /// Most recently published element
    pub fn last(&self) -> Option<T> {
        let len = self.len();
        if len == 0 {
            None
        } else {
            self.get(len - 1)
        }
    }

    /// Snapshot of all elements from `start` up to the published length.
    ///
    /// This is the incremental read used by the savers and by display
    /// polling: keep a cursor, call `slice_from(cursor)`, advance the
    /// cursor by the returned length.
    pub fn slice_from(&self, start: usize) -> Vec<T> {
        let len = self.len();
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data[start.min(len)..len].to_vec()
    }
}

impl<T: Copy> Default for Series<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_and_len() {
        let series: Series<f64> = Series::new();
        assert!(series.is_empty());

        series.push(1.5);
        series.push(2.5);

        assert_eq!(series.len(), 2);
        assert_eq!(series.get(0), Some(1.5));
        assert_eq!(series.get(1), Some(2.5));
        assert_eq!(series.get(2), None);
        assert_eq!(series.last(), Some(2.5));
    }

    #[test]
    fn test_seeded_series() {
        let series = Series::with_seed(&[0.0, 0.0, 0.0]);
        assert_eq!(series.len(), 3);
        series.push(1.0);
        assert_eq!(series.len(), 4);
        assert_eq!(series.get(3), Some(1.0));
    }

    #[test]
    fn test_slice_from_is_incremental() {
        let series: Series<u64> = Series::new();
        for i in 0..10 {
            series.push(i);
        }

        let mut cursor = 0;
        let first = series.slice_from(cursor);
        cursor += first.len();
        assert_eq!(first, (0..10).collect::<Vec<_>>());

        for i in 10..15 {
            series.push(i);
        }
        let second = series.slice_from(cursor);
        assert_eq!(second, (10..15).collect::<Vec<_>>());

        // Past-the-end cursor yields an empty delta, not a panic
        assert!(series.slice_from(100).is_empty());
    }

    #[test]
    fn test_observed_prefix_is_stable() {
        let series: Arc<Series<u64>> = Arc::new(Series::new());
        let writer = Arc::clone(&series);

        let handle = std::thread::spawn(move || {
            for i in 0..10_000u64 {
                writer.push(i);
            }
        });

        // Concurrent reader: any observed prefix must equal 0..len
        loop {
            let len = series.len();
            let snapshot = series.slice_from(0);
            assert!(snapshot.len() >= len);
            for (i, &v) in snapshot.iter().enumerate() {
                assert_eq!(v, i as u64);
            }
            if len == 10_000 {
                break;
            }
        }

        handle.join().expect("writer thread panicked");
    }
}
