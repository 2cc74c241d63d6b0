//! Fixed-capacity circular store with overwrite-oldest semantics.
//!
//! Slots are written before `start`/`len` advance, so an index or sequence
//! number observed by a reader always resolves to a populated slot.

use serde::{Deserialize, Serialize};

/// Default number of log lines retained per project.
pub const DEFAULT_RING_CAPACITY: usize = devstack_core::config::DEFAULT_LOG_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingStats {
    pub capacity: usize,
    pub len: usize,
    pub total_pushed: u64,
    pub dropped_overflow: u64,
}

impl RingStats {
    /// Fill ratio as a percentage (0..=100).
    #[must_use]
    pub fn fill_pct(&self) -> u8 {
        if self.capacity == 0 {
            return 100;
        }
        let pct = self
            .len
            .saturating_mul(100)
            .checked_div(self.capacity)
            .unwrap_or(100)
            .min(100);
        u8::try_from(pct).unwrap_or(100)
    }
}

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    /// Physical index of the oldest retained item once the buffer is full.
    start: usize,
    total_pushed: u64,
    dropped_overflow: u64,
}

impl<T> RingBuffer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    /// Create an empty buffer; a capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity: capacity.max(1),
            start: 0,
            total_pushed: 0,
            dropped_overflow: 0,
        }
    }

    /// Append an item, silently evicting the oldest one at capacity.
    pub fn push(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            self.items[self.start] = item;
            self.start = (self.start + 1) % self.capacity;
            self.dropped_overflow = self.dropped_overflow.saturating_add(1);
        }
        self.total_pushed = self.total_pushed.saturating_add(1);
    }

    /// The `index`-th oldest retained item.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.items.len() {
            return None;
        }
        self.items.get((self.start + index) % self.items.len())
    }

    /// The most recently pushed item still retained.
    #[must_use]
    pub fn newest(&self) -> Option<&T> {
        self.items.len().checked_sub(1).and_then(|last| self.get(last))
    }

    /// Look up an item by the sequence number it was pushed with
    /// (0 for the first push ever). Evicted or future sequences are `None`.
    #[must_use]
    pub fn get_seq(&self, seq: u64) -> Option<&T> {
        let offset = seq.checked_sub(self.first_seq())?;
        self.get(usize::try_from(offset).ok()?)
    }

    /// Sequence number of the oldest retained item.
    #[must_use]
    pub fn first_seq(&self) -> u64 {
        self.total_pushed.saturating_sub(self.items.len() as u64)
    }

    /// Sequence number the next push will receive.
    #[must_use]
    pub const fn next_seq(&self) -> u64 {
        self.total_pushed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every item; capacity is unchanged and sequence numbers keep
    /// increasing so in-flight readers never alias old positions.
    pub fn clear(&mut self) {
        self.items.clear();
        self.start = 0;
    }

    /// Oldest-to-newest iteration over retained items.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.items.len()).filter_map(move |idx| self.get(idx))
    }

    #[must_use]
    pub fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity,
            len: self.items.len(),
            total_pushed: self.total_pushed,
            dropped_overflow: self.dropped_overflow,
        }
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
