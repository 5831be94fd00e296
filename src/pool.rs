//! Allocation reuse for command and geometry buffers.
//!
//! Buffers released at the end of an entry's life are [`reset`](Poolable::reset)
//! (contents cleared, capacity kept) and stored in a [`BufferPool`] sorted by
//! capacity. [`acquire`](BufferPool::acquire) hands out the smallest pooled
//! buffer that is large enough, so that frame after frame the same
//! allocations are recycled instead of reallocated.
//!
//! # Example
//!
//! ```
//! use redlilium_draw_commands::pool::{BufferPool, Poolable};
//!
//! #[derive(Default)]
//! struct Scratch {
//!     bytes: Vec<u8>,
//! }
//!
//! impl Poolable for Scratch {
//!     fn new_empty() -> Self {
//!         Scratch::default()
//!     }
//!     fn reset(&mut self) {
//!         self.bytes.clear();
//!     }
//!     fn capacity_bytes(&self) -> usize {
//!         self.bytes.capacity()
//!     }
//! }
//!
//! let mut pool = BufferPool::<Scratch>::new();
//! pool.release(Scratch { bytes: Vec::with_capacity(64) }, 0);
//! assert_eq!(pool.len(), 1);
//!
//! let scratch = pool.acquire(32, 1);
//! assert!(scratch.bytes.capacity() >= 64);
//! assert!(pool.is_empty());
//! ```

/// A buffer whose allocation outlives its contents.
pub trait Poolable {
    /// Instance handed out when the pool has nothing large enough.
    fn new_empty() -> Self;

    /// Drop the contents. Capacity must survive: clear vectors in place.
    fn reset(&mut self);

    /// Total retained allocation in bytes. Used to sort the pool.
    fn capacity_bytes(&self) -> usize;
}

struct PoolSlot<T> {
    item: T,
    capacity: usize,
    last_used: u64,
}

/// Capacity-sorted pool of reusable buffers.
pub struct BufferPool<T: Poolable> {
    /// Sorted ascending by capacity.
    slots: Vec<PoolSlot<T>>,
    /// Epoch at which the largest slot was last handed out or returned.
    largest_touched: u64,
}

impl<T: Poolable> BufferPool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            largest_touched: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sum of retained capacity over all pooled items.
    pub fn total_capacity(&self) -> usize {
        self.slots.iter().map(|s| s.capacity).sum()
    }

    /// Take the smallest pooled item with at least `min_capacity` bytes.
    ///
    /// Falls back to the largest pooled item, then to a fresh empty one.
    pub fn acquire(&mut self, min_capacity: usize, epoch: u64) -> T {
        if self.slots.is_empty() {
            return T::new_empty();
        }
        let index = self
            .slots
            .partition_point(|s| s.capacity < min_capacity)
            .min(self.slots.len() - 1);
        if index == self.slots.len() - 1 {
            self.largest_touched = epoch;
        }
        self.slots.remove(index).item
    }

    /// Reset `item` and return it to the pool.
    pub fn release(&mut self, mut item: T, epoch: u64) {
        item.reset();
        let capacity = item.capacity_bytes();
        let index = self.slots.partition_point(|s| s.capacity <= capacity);
        if index == self.slots.len() {
            self.largest_touched = epoch;
        }
        self.slots.insert(
            index,
            PoolSlot {
                item,
                capacity,
                last_used: epoch,
            },
        );
    }

    /// Drop the largest pooled item if it has sat unused for `max_idle` epochs.
    ///
    /// Returns `true` if an item was dropped. At most one item is trimmed per
    /// call, so a pool shrinks gradually after a spike.
    pub fn trim(&mut self, epoch: u64, max_idle: u64) -> bool {
        let Some(largest) = self.slots.last() else {
            return false;
        };
        let idle_since = largest.last_used.max(self.largest_touched);
        if epoch.saturating_sub(idle_since) < max_idle {
            return false;
        }
        let dropped = self.slots.pop();
        if let Some(next) = self.slots.last() {
            self.largest_touched = next.last_used;
        }
        if let Some(slot) = dropped {
            log::debug!(
                "trimmed pooled buffer of {} bytes (idle for {} epochs)",
                slot.capacity,
                epoch - idle_since
            );
        }
        true
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl<T: Poolable> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new()
    }
}
