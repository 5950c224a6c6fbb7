//! Per-processor caches of single free pages.
//!
//! Pools move pages to and from their segment's buddy allocator in
//! batches of `transfer` pages and never hold more than `size`.

use crate::config::PoolGeometry;
use crate::list::PageList;
use crate::page::Page;

/// Private stack of free single pages of one processor in one segment.
///
/// Pooled pages are not counted in the segment's free count; they have
/// already been taken from the buddy allocator.
#[derive(Debug)]
pub(crate) struct CpuPool {
    geometry: PoolGeometry,
    list: PageList,
    fills: u64,
    drains: u64,
}

/// Snapshot of one CPU pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuPoolStats {
    pub size: usize,
    pub transfer: usize,
    /// Pages currently in the pool.
    pub count: usize,
    /// Refills from the buddy allocator so far.
    pub fills: u64,
    /// Drains to the buddy allocator so far.
    pub drains: u64,
}

impl CpuPool {
    pub(crate) const fn new(geometry: PoolGeometry) -> Self {
        Self {
            geometry,
            list: PageList::new(),
            fills: 0,
            drains: 0,
        }
    }

    #[inline]
    pub(crate) const fn transfer_size(&self) -> usize {
        self.geometry.transfer
    }

    #[inline]
    pub(crate) const fn is_full(&self) -> bool {
        self.list.len() >= self.geometry.size
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub(crate) fn push(&mut self, pages: &[Page], idx: u32) {
        self.list.push_front(pages, idx);
    }

    #[inline]
    pub(crate) fn pop(&mut self, pages: &[Page]) -> Option<u32> {
        self.list.pop_front(pages)
    }

    pub(crate) const fn note_fill(&mut self) {
        self.fills += 1;
    }

    pub(crate) const fn note_drain(&mut self) {
        self.drains += 1;
    }

    pub(crate) const fn stats(&self) -> CpuPoolStats {
        CpuPoolStats {
            size: self.geometry.size,
            transfer: self.geometry.transfer,
            count: self.list.len(),
            fills: self.fills,
            drains: self.drains,
        }
    }
}
