//! Bounded ring buffer with eviction-aware sequence numbers
//!
//! Every telemetry stream is held in a [`RingBuffer`]. The buffer keeps the
//! newest `capacity` items and a monotonic `total_added` counter that is
//! never reset, so the live items always carry the sequence numbers
//! `total_added - len + 1 ..= total_added`.

use crate::pagination::Sequenced;

/// Fixed-capacity FIFO that evicts the oldest entries on overflow.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    total_added: u64,
}

impl<T: Clone> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
            total_added: 0,
        }
    }

    /// Append a batch, evicting the oldest items when over capacity.
    ///
    /// Returns `true` when eviction happened. On eviction the retained tail
    /// is copied into a fresh allocation so the evicted items are dropped
    /// together with the old backing storage.
    pub fn push_batch<I>(&mut self, batch: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let before = self.items.len();
        self.items.extend(batch);
        self.total_added += (self.items.len() - before) as u64;

        if self.items.len() <= self.capacity {
            return false;
        }

        let start = self.items.len() - self.capacity;
        let mut kept = Vec::with_capacity(self.capacity);
        kept.extend(self.items.drain(start..));
        self.items = kept;
        true
    }

    /// Append a single item
    pub fn push(&mut self, item: T) -> bool {
        self.push_batch(std::iter::once(item))
    }

    /// Copy of the live items, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.items.clone()
    }

    /// Borrow the live items, oldest first
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Newest live item
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Number of live items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds no items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of live items
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items ever appended (never reset, not even by `clear`)
    #[must_use]
    pub fn total_added(&self) -> u64 {
        self.total_added
    }

    /// Sequence number of the oldest live item
    #[must_use]
    pub fn oldest_sequence(&self) -> i64 {
        self.total_added as i64 - self.items.len() as i64 + 1
    }

    /// Drop all live items. Sequence numbers keep counting from `total_added`.
    pub fn clear(&mut self) {
        self.items = Vec::new();
    }

    /// Pair every live item with its sequence number and timestamp
    pub fn sequenced<F>(&self, timestamp: F) -> Vec<Sequenced<T>>
    where
        F: Fn(&T) -> String,
    {
        let base = self.oldest_sequence();
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| Sequenced {
                sequence: base + i as i64,
                timestamp: timestamp(item),
                item: item.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests;
