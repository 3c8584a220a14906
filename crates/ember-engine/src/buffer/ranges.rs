//! Retired byte ranges inside an append-only buffer.
//!
//! Invalidation only records a range; bytes move when [`RangeAllocator::compact`]
//! runs, which a [`StreamingBuffer`](super::StreamingBuffer) defers until its
//! next full upload.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Notified when a retired range is physically removed.
///
/// Called synchronously during compaction, highest offset first, so an
/// implementor can shift any stored offset greater than `offset` down by
/// `length`. Implementations must only adjust their own bookkeeping; the
/// stream that is being compacted is borrowed for the whole call.
pub trait RangeListener {
    fn on_range_invalidated(&mut self, offset: usize, length: usize);
}

/// Non-owning listener reference; a dropped listener is simply skipped.
pub type ListenerRef = Weak<RefCell<dyn RangeListener>>;

/// Downgrades a shared listener to the form ranges store.
pub fn listener<L: RangeListener + 'static>(l: &Rc<RefCell<L>>) -> ListenerRef {
    let l: Rc<RefCell<dyn RangeListener>> = l.clone();
    Rc::downgrade(&l)
}

/// A pending retired range.
#[derive(Clone)]
pub struct ByteRange {
    pub offset: usize,
    pub length: usize,
    owners: Vec<ListenerRef>,
}

impl ByteRange {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    fn overlaps(&self, offset: usize, end: usize) -> bool {
        self.offset < end && offset < self.end()
    }

    fn add_owner(&mut self, owner: ListenerRef) {
        if !self.owners.iter().any(|o| Weak::ptr_eq(o, &owner)) {
            self.owners.push(owner);
        }
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }
}

impl std::fmt::Debug for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRange")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("owners", &self.owners.len())
            .finish()
    }
}

/// Pending invalidations plus the running unused-byte counter.
///
/// Overlapping invalidations are merged into their union and every owner of
/// a merged range is notified once with the merged range. Ranges that merely
/// touch stay separate.
#[derive(Debug, Default, Clone)]
pub struct RangeAllocator {
    pending: Vec<ByteRange>,
    unused: usize,
}

impl RangeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `offset..offset + length` as no longer referenced.
    ///
    /// Zero-length ranges are ignored.
    pub fn invalidate(&mut self, offset: usize, length: usize, owner: Option<ListenerRef>) {
        if length == 0 {
            return;
        }

        let mut merged = ByteRange { offset, length, owners: Vec::new() };
        if let Some(owner) = owner {
            merged.owners.push(owner);
        }

        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].overlaps(merged.offset, merged.end()) {
                let other = self.pending.swap_remove(i);
                log::debug!(
                    "merging overlapping invalidation {}..{} into {}..{}",
                    other.offset,
                    other.end(),
                    merged.offset,
                    merged.end()
                );
                self.unused -= other.length;
                let end = merged.end().max(other.end());
                merged.offset = merged.offset.min(other.offset);
                merged.length = end - merged.offset;
                for o in other.owners {
                    merged.add_owner(o);
                }
                // The union may now reach ranges already checked.
                i = 0;
            } else {
                i += 1;
            }
        }

        self.unused += merged.length;
        self.pending.push(merged);
    }

    /// Bytes recorded as unused and not yet compacted away.
    pub fn unused_bytes(&self) -> usize {
        self.unused
    }

    pub fn pending(&self) -> &[ByteRange] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Erases every pending range from `bytes`, highest offset first, and
    /// notifies owners after each erase. Returns the number of bytes removed.
    ///
    /// Ranges reaching past the end of `bytes` are clamped to it; owners of a
    /// range clamped to nothing are not notified.
    pub fn compact(&mut self, bytes: &mut Vec<u8>) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        self.pending.sort_unstable_by(|a, b| b.offset.cmp(&a.offset));
        let mut removed = 0;
        for range in self.pending.drain(..) {
            let start = range.offset.min(bytes.len());
            let end = range.end().min(bytes.len());
            if end < range.end() {
                log::warn!(
                    "invalidated range {}..{} extends past buffer end {}; clamped",
                    range.offset,
                    range.end(),
                    bytes.len()
                );
            }
            if end == start {
                continue;
            }
            bytes.drain(start..end);
            removed += end - start;
            log::trace!("compacted {start}..{end} ({} owners)", range.owner_count());

            for owner in range.owners.iter().filter_map(Weak::upgrade) {
                match owner.try_borrow_mut() {
                    Ok(mut l) => l.on_range_invalidated(start, end - start),
                    Err(_) => log::warn!("range listener busy during compaction; notification dropped"),
                }
            }
        }
        self.unused = 0;
        removed
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.unused = 0;
    }
}
