use std::cell::RefCell;
use std::rc::Rc;

use bytemuck::Pod;

use super::ranges::{ListenerRef, RangeAllocator};

/// Smallest logical capacity a stream reports.
pub const MIN_CAPACITY: usize = 256;

/// Growable CPU-side byte sequence mirrored by a [`StreamingBuffer`](super::StreamingBuffer).
///
/// The caller owns the stream; buffers hold a shared reference. Capacity is a
/// logical, deterministic quantity (powers of two from [`MIN_CAPACITY`]) so the
/// GPU allocation size does not depend on the allocator.
#[derive(Debug, Clone)]
pub struct ByteStream {
    bytes: Vec<u8>,
    capacity: usize,
    /// Lowest offset written since the last upload.
    dirty_from: Option<usize>,
    ranges: RangeAllocator,
}

pub type SharedStream = Rc<RefCell<ByteStream>>;

impl ByteStream {
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            dirty_from: None,
            ranges: RangeAllocator::new(),
        }
    }

    /// Wraps a new stream for sharing with buffers.
    pub fn shared() -> SharedStream {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    // ── writes ────────────────────────────────────────────────────────────

    /// Appends raw bytes; returns the offset they start at.
    pub fn push_bytes(&mut self, data: &[u8]) -> usize {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(data);
        self.grow_to(self.bytes.len());
        if !data.is_empty() {
            self.touch(offset);
        }
        offset
    }

    /// Appends one plain-old-data value.
    pub fn push<T: Pod>(&mut self, value: T) -> usize {
        self.push_bytes(bytemuck::bytes_of(&value))
    }

    pub fn extend<T: Pod>(&mut self, values: &[T]) -> usize {
        self.push_bytes(bytemuck::cast_slice(values))
    }

    /// Overwrites bytes in place.
    ///
    /// # Panics
    ///
    /// If `offset + data.len()` exceeds [`len`](Self::len).
    pub fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        if !data.is_empty() {
            self.touch(offset);
        }
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.bytes.len() {
            self.bytes.truncate(len);
            self.touch(len);
        }
    }

    /// Drops all bytes and pending invalidations. Capacity is kept.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.ranges.clear();
        self.touch(0);
    }

    /// Lowers the logical capacity to the smallest power of two that holds
    /// both the current contents and `min`.
    pub fn shrink_to(&mut self, min: usize) {
        let capacity = min.max(self.bytes.len()).max(MIN_CAPACITY).next_power_of_two();
        if capacity < self.capacity {
            self.capacity = capacity;
            self.bytes.shrink_to(capacity);
        }
    }

    fn grow_to(&mut self, len: usize) {
        while self.capacity < len {
            self.capacity *= 2;
        }
    }

    fn touch(&mut self, offset: usize) {
        self.dirty_from = Some(self.dirty_from.map_or(offset, |d| d.min(offset)));
    }

    // ── invalidation ──────────────────────────────────────────────────────

    /// Records a range as no longer referenced. Bytes stay in place until
    /// the next compaction.
    pub fn invalidate(&mut self, offset: usize, length: usize, owner: Option<ListenerRef>) {
        self.ranges.invalidate(offset, length, owner);
    }

    pub fn unused_bytes(&self) -> usize {
        self.ranges.unused_bytes()
    }

    pub fn ranges(&self) -> &RangeAllocator {
        &self.ranges
    }

    /// Erases every invalidated range now; returns the bytes removed.
    pub fn compact(&mut self) -> usize {
        let lowest = self.ranges.pending().iter().map(|r| r.offset).min();
        let removed = self.ranges.compact(&mut self.bytes);
        if removed > 0 {
            if let Some(lowest) = lowest {
                self.touch(lowest.min(self.bytes.len()));
            }
            log::trace!("compacted {removed} bytes; {} remain", self.bytes.len());
        }
        removed
    }

    // ── upload bookkeeping ────────────────────────────────────────────────

    pub fn dirty_from(&self) -> Option<usize> {
        self.dirty_from
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_from.is_some()
    }

    /// Forces the next upload to cover the whole stream.
    pub fn mark_dirty(&mut self) {
        self.touch(0);
    }

    pub(crate) fn mark_synced(&mut self) {
        self.dirty_from = None;
    }
}

impl Default for ByteStream {
    fn default() -> Self {
        Self::new()
    }
}
