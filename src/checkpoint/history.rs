//! Bounded, time-ordered history of validated snapshots.
//!
//! K_i: Insertion order is collection order; the oldest entry is evicted first.
//! K_i: Owned by the scheduler; nothing else mutates it.

use crate::models::{PlrError, Result, Snapshot};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<Snapshot>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer holding at most `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a snapshot, evicting the oldest when full.
    pub fn push(&mut self, snapshot: Snapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The `k`-th most recent entry (0 = newest).
    pub fn peek_from_end(&self, k: usize) -> Result<&Snapshot> {
        let available = self.entries.len();
        if k >= available {
            return Err(PlrError::InsufficientHistory {
                requested: k,
                available,
            });
        }
        Ok(&self.entries[available - 1 - k])
    }

    /// The two newest entries as `(previous, newest)`.
    pub fn latest_pair(&self) -> Option<(&Snapshot, &Snapshot)> {
        let newest = self.peek_from_end(0).ok()?;
        let previous = self.peek_from_end(1).ok()?;
        Some((previous, newest))
    }

    /// Drop every entry (a new job has started).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_snapshot;

    fn times(buffer: &HistoryBuffer) -> Vec<f64> {
        buffer.iter().map(|s| s.collection_time).collect()
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buffer = HistoryBuffer::new(5);
        for t in 0..8 {
            buffer.push(sample_snapshot(t as f64));
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(times(&buffer), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_peek_from_end() {
        let mut buffer = HistoryBuffer::new(3);
        buffer.push(sample_snapshot(1.0));
        buffer.push(sample_snapshot(2.0));

        assert_eq!(buffer.peek_from_end(0).unwrap().collection_time, 2.0);
        assert_eq!(buffer.peek_from_end(1).unwrap().collection_time, 1.0);
        assert!(matches!(
            buffer.peek_from_end(2),
            Err(PlrError::InsufficientHistory {
                requested: 2,
                available: 2
            })
        ));
    }

    #[test]
    fn test_latest_pair_and_clear() {
        let mut buffer = HistoryBuffer::new(4);
        buffer.push(sample_snapshot(1.0));
        assert!(buffer.latest_pair().is_none());

        buffer.push(sample_snapshot(2.0));
        let (previous, newest) = buffer.latest_pair().unwrap();
        assert_eq!(previous.collection_time, 1.0);
        assert_eq!(newest.collection_time, 2.0);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 4);
    }
}
