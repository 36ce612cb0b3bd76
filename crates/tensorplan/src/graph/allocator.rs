//! Simulated offset allocator backing the graph memory plan.
//!
//! `alloc`/`free` replay the schedule's tensor lifetimes over a virtual
//! address space, tracking the peak footprint. `materialize` then asks the
//! runtime for one contiguous buffer of `peak` bytes; tensor storage is the
//! recorded offsets into that buffer. Free blocks are indexed two ways, by
//! size for best-fit allocation and by offset for neighbour coalescing, and
//! the views are kept synchronised.

use std::collections::{BTreeMap, BTreeSet};
use std::ptr::NonNull;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::runtime::NativeCpuRuntime;

/// Matches the widest scalar supported by tensor dtypes.
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Raised when the host runtime cannot back the planned arena.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("graph arena of {bytes} bytes could not be allocated by the host runtime")]
    ArenaExhausted { bytes: usize },
}

pub struct OffsetAllocator {
    runtime: Arc<NativeCpuRuntime>,
    used: usize,
    peak: usize,
    alignment: usize,
    /// Free blocks as (size, offset), ordered by size for best-fit lookup.
    free_by_size: BTreeSet<(usize, usize)>,
    /// Free blocks as offset -> size, ordered by offset for coalescing.
    free_by_offset: BTreeMap<usize, usize>,
    base: Option<NonNull<u8>>,
}

impl OffsetAllocator {
    pub fn new(runtime: Arc<NativeCpuRuntime>) -> Self {
        OffsetAllocator {
            runtime,
            used: 0,
            peak: 0,
            alignment: DEFAULT_ALIGNMENT,
            free_by_size: BTreeSet::new(),
            free_by_offset: BTreeMap::new(),
            base: None,
        }
    }

    /// Bytes currently live in the simulation.
    pub fn used(&self) -> usize {
        self.used
    }

    /// High-water mark; equals the arena size at materialisation.
    pub fn peak(&self) -> usize {
        self.peak
    }

    fn aligned(&self, size: usize) -> usize {
        size.div_ceil(self.alignment) * self.alignment
    }

    /// Simulates an allocation and returns the offset of the block.
    ///
    /// Policy: best-fit over the free list; failing that, grow a free block
    /// that ends exactly at the watermark; failing that, extend the
    /// watermark by the full request.
    pub fn alloc(&mut self, size: usize) -> usize {
        assert!(
            self.base.is_none(),
            "allocator is materialised; no further simulated allocs"
        );
        let size = self.aligned(size);

        if let Some(&(capacity, offset)) = self.free_by_size.range((size, 0)..).next() {
            self.free_by_size.remove(&(capacity, offset));
            self.free_by_offset.remove(&offset);
            if capacity > size {
                self.insert_block(offset + size, capacity - size);
            }
            self.used += size;
            return offset;
        }

        if let Some((&offset, &capacity)) = self.free_by_offset.iter().next_back() {
            if offset + capacity == self.peak {
                self.free_by_size.remove(&(capacity, offset));
                self.free_by_offset.remove(&offset);
                self.peak += size - capacity;
                self.used += size;
                return offset;
            }
        }

        let offset = self.peak;
        self.peak += size;
        self.used += size;
        offset
    }

    /// Simulates releasing a block previously returned by [`alloc`](Self::alloc).
    ///
    /// Coalesces with the left and/or right neighbour into a single block
    /// covering the union.
    pub fn free(&mut self, offset: usize, size: usize) {
        assert!(
            self.base.is_none(),
            "allocator is materialised; no further simulated frees"
        );
        let size = self.aligned(size);
        assert!(self.used >= size, "free of {size} bytes exceeds live total {}", self.used);

        let mut start = offset;
        let mut length = size;

        if let Some((&left_offset, &left_size)) = self.free_by_offset.range(..offset).next_back() {
            if left_offset + left_size == offset {
                self.free_by_size.remove(&(left_size, left_offset));
                self.free_by_offset.remove(&left_offset);
                start = left_offset;
                length += left_size;
            }
        }

        if let Some((&right_offset, &right_size)) =
            self.free_by_offset.range(offset + size..).next()
        {
            if right_offset == offset + size {
                self.free_by_size.remove(&(right_size, right_offset));
                self.free_by_offset.remove(&right_offset);
                length += right_size;
            }
        }

        self.insert_block(start, length);
        self.used -= size;
    }

    fn insert_block(&mut self, offset: usize, size: usize) {
        self.free_by_size.insert((size, offset));
        self.free_by_offset.insert(offset, size);
    }

    /// Lazily allocates the real arena of `peak` bytes from the runtime.
    ///
    /// The first call performs the allocation; later calls return the cached
    /// base pointer. Simulated alloc/free are forbidden afterwards.
    pub fn materialize(&mut self) -> Result<NonNull<u8>, AllocError> {
        if let Some(base) = self.base {
            return Ok(base);
        }
        let base = self
            .runtime
            .alloc(self.peak)
            .ok_or(AllocError::ArenaExhausted { bytes: self.peak })?;
        debug!(used = self.used, peak = self.peak, "graph arena materialised");
        self.base = Some(base);
        Ok(base)
    }

    /// Base pointer of the materialised arena, if any.
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.base
    }

    /// Free blocks as (offset, size) pairs in offset order. Test hook.
    pub fn free_blocks(&self) -> Vec<(usize, usize)> {
        self.free_by_offset.iter().map(|(&o, &s)| (o, s)).collect()
    }
}

impl Drop for OffsetAllocator {
    fn drop(&mut self) {
        if let Some(base) = self.base.take() {
            unsafe { self.runtime.dealloc(base, self.peak) };
        }
    }
}
