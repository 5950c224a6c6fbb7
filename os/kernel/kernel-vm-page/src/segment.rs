//! Memory segments.
//!
//! A [`Segment`] owns a contiguous physical range: its buddy allocator,
//! its two page-cache queues and one pool of free pages per processor. The
//! allocator and the queues share the segment lock; every CPU pool has a
//! lock of its own, always taken before the segment lock.
//!
//! Backpressure lives here as well. An allocation that finds the segment
//! at or below `low` starts pageout; at or below `min` an unprivileged
//! caller is refused and the allocation pause is set. A privileged
//! allocation that leaves fewer than `min` pages behind sets the pause too.

use crate::PhysAddr;
use crate::buddy::{BuddyAllocator, Span};
use crate::config::{PoolGeometry, Thresholds};
use crate::cpu_pool::{CpuPool, CpuPoolStats};
use crate::env::Pageout;
use crate::error::halt;
use crate::page::{ORDER_UNLISTED, Page};
use crate::queue::PageQueue;
use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_sync::{PinGuard, Preemption, SpinLock, SpinLockGuard, lock_pair};

/// Maximum number of segments.
pub const MAX_SEGMENTS: usize = 4;

/// Which memory an allocation must come from.
///
/// Each selector names the highest segment the caller accepts; allocation
/// falls back to lower segments from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Selector {
    /// Reachable by legacy DMA.
    Dma = 0,
    /// Reachable by 32-bit DMA.
    Dma32 = 1,
    /// Permanently mapped in the kernel.
    DirectMap = 2,
    /// Anything.
    HighMem = 3,
}

impl Selector {
    /// Index of the highest segment the selector accepts.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Queue a cached page sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKind {
    Active,
    Inactive,
}

/// Mutable part of a segment, under the segment lock.
#[derive(Debug)]
pub(crate) struct SegmentState {
    pub(crate) buddy: BuddyAllocator,
    active: PageQueue,
    inactive: PageQueue,
    pub(crate) nr_wired: usize,
    pub(crate) nr_reserved: usize,
}

impl SegmentState {
    const fn new(nr_reserved: usize) -> Self {
        Self {
            buddy: BuddyAllocator::new(),
            active: PageQueue::new(),
            inactive: PageQueue::new(),
            nr_wired: 0,
            nr_reserved,
        }
    }

    #[inline]
    pub(crate) const fn nr_active(&self) -> usize {
        self.active.len()
    }

    #[inline]
    pub(crate) const fn nr_inactive(&self) -> usize {
        self.inactive.len()
    }

    fn check_enqueue(page: &Page) {
        if page.object().is_none()
            || page.is_free()
            || page.order() != ORDER_UNLISTED
            || page.bits().queued()
        {
            halt(format_args!("cannot queue page {}", page.phys_addr()));
        }
    }

    pub(crate) fn add_active(&mut self, pages: &[Page], idx: u32) {
        let page = &pages[idx as usize];
        Self::check_enqueue(page);
        page.update_bits(|b| b.with_active(true).with_reference(true));
        self.active.enqueue(pages, idx);
    }

    pub(crate) fn add_inactive(&mut self, pages: &[Page], idx: u32) {
        let page = &pages[idx as usize];
        Self::check_enqueue(page);
        page.update_bits(|b| b.with_inactive(true));
        self.inactive.enqueue(pages, idx);
    }

    pub(crate) fn enqueue(&mut self, pages: &[Page], idx: u32, queue: QueueKind) {
        match queue {
            QueueKind::Active => self.add_active(pages, idx),
            QueueKind::Inactive => self.add_inactive(pages, idx),
        }
    }

    /// Takes the page off whichever queue it is on.
    pub(crate) fn dequeue(&mut self, pages: &[Page], idx: u32) -> Option<QueueKind> {
        let page = &pages[idx as usize];
        let bits = page.bits();
        let kind = if bits.active() {
            self.active.remove(pages, idx);
            QueueKind::Active
        } else if bits.inactive() {
            self.inactive.remove(pages, idx);
            QueueKind::Inactive
        } else {
            return None;
        };
        page.update_bits(|b| b.with_active(false).with_inactive(false));
        Some(kind)
    }

    pub(crate) const fn first(&self, queue: QueueKind, external_only: bool) -> Option<u32> {
        match queue {
            QueueKind::Active => self.active.peek_first(external_only),
            QueueKind::Inactive => self.inactive.peek_first(external_only),
        }
    }
}

/// Allocation context shared by every buddy allocation.
pub(crate) struct Pressure<'a> {
    pub(crate) paused: &'a AtomicBool,
    pub(crate) privileged: bool,
    pub(crate) pageout: &'a dyn Pageout,
}

/// Counters of one segment.
///
/// `free + pooled + active + inactive + wired + reserved == pages`, except
/// for pages allocated and not yet queued or wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStats {
    pub index: usize,
    /// First address of the segment.
    pub start: PhysAddr,
    /// One past the last address.
    pub end: PhysAddr,
    /// Descriptors in the segment.
    pub pages: usize,
    /// Pages on the buddy free lists.
    pub free: usize,
    /// Free pages parked in CPU pools.
    pub pooled: usize,
    /// Pages on the active queue.
    pub active: usize,
    /// Pages on the inactive queue.
    pub inactive: usize,
    /// Pages with a non-zero wire count.
    pub wired: usize,
    /// [`PageType::Reserved`](crate::PageType::Reserved) pages not yet
    /// handed over with [`VmPages::manage`](crate::VmPages::manage).
    pub reserved: usize,
    pub thresholds: Thresholds,
}

/// A contiguous physical range with its own allocator, pools and queues.
pub struct Segment {
    index: usize,
    span: Span,
    nr_pages: usize,
    thresholds: Thresholds,
    pool_geometry: PoolGeometry,
    state: SpinLock<SegmentState>,
    pools: Box<[SpinLock<CpuPool>]>,
}

impl Segment {
    pub(crate) fn new(
        index: usize,
        span: Span,
        nr_pages: usize,
        nr_reserved: usize,
        thresholds: Thresholds,
        pool_geometry: PoolGeometry,
        cpus: usize,
    ) -> Self {
        Self {
            index,
            span,
            nr_pages,
            thresholds,
            pool_geometry,
            state: SpinLock::new(SegmentState::new(nr_reserved)),
            pools: (0..cpus)
                .map(|_| SpinLock::new(CpuPool::new(pool_geometry)))
                .collect(),
        }
    }

    /// Position in the segment table, as named by [`Selector`].
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// First physical address.
    #[must_use]
    pub const fn start(&self) -> PhysAddr {
        self.span.start
    }

    /// One past the last physical address.
    #[must_use]
    pub const fn end(&self) -> PhysAddr {
        self.span.end
    }

    /// Number of page descriptors, reserved pages included.
    #[must_use]
    pub const fn nr_pages(&self) -> usize {
        self.nr_pages
    }

    /// Free-page thresholds derived at setup.
    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Size and transfer batch of every CPU pool of this segment.
    #[must_use]
    pub const fn pool_geometry(&self) -> PoolGeometry {
        self.pool_geometry
    }

    #[inline]
    pub(crate) const fn span(&self) -> Span {
        self.span
    }

    /// `pa` lies inside the segment.
    #[inline]
    #[must_use]
    pub fn contains(&self, pa: PhysAddr) -> bool {
        self.span.contains(pa)
    }

    #[inline]
    pub(crate) fn lock(&self) -> SpinLockGuard<'_, SegmentState> {
        self.state.lock()
    }

    /// Locks two different segments in canonical order.
    ///
    /// Segments live in one slice sorted by index, so lock address order is
    /// index order.
    pub(crate) fn lock_two<'a>(
        a: &'a Self,
        b: &'a Self,
    ) -> (SpinLockGuard<'a, SegmentState>, SpinLockGuard<'a, SegmentState>) {
        debug_assert_ne!(a.index, b.index);
        lock_pair(&a.state, &b.state)
    }

    pub(crate) fn pool(&self, cpu: usize) -> &SpinLock<CpuPool> {
        self.pools
            .get(cpu)
            .unwrap_or_else(|| halt(format_args!("cpu {cpu} beyond configured processors")))
    }

    /// Nothing left to page out, or enough free pages.
    pub(crate) const fn usable(&self, st: &SegmentState) -> bool {
        (st.nr_active() + st.nr_inactive() == 0) || st.buddy.nr_free() >= self.thresholds.high
    }

    /// Free pages above the high threshold, so one can be given away.
    pub(crate) const fn page_available(&self, st: &SegmentState) -> bool {
        st.buddy.nr_free() > self.thresholds.high
    }

    /// Buddy allocation with the free-page thresholds applied.
    pub(crate) fn alloc_from_buddy(
        &self,
        st: &mut SegmentState,
        pages: &[Page],
        order: u8,
        pressure: &Pressure<'_>,
    ) -> Option<u32> {
        if pressure.paused.load(Ordering::Acquire) && !pressure.privileged {
            return None;
        }

        let free = st.buddy.nr_free();
        if free <= self.thresholds.low {
            pressure.pageout.start();
            if free <= self.thresholds.min && !pressure.privileged {
                pressure.paused.store(true, Ordering::Release);
                return None;
            }
        }

        let idx = st.buddy.alloc(pages, order)?;
        if st.buddy.nr_free() < self.thresholds.min {
            pressure.paused.store(true, Ordering::Release);
        }
        Some(idx)
    }

    #[inline]
    pub(crate) fn free_to_buddy(&self, st: &mut SegmentState, pages: &[Page], idx: u32, order: u8) {
        st.buddy.free(pages, self.span, idx, order);
    }

    /// Moves up to one transfer batch from the buddy allocator into `pool`.
    fn pool_fill(&self, pool: &mut CpuPool, pages: &[Page], pressure: &Pressure<'_>) -> usize {
        let mut st = self.state.lock();
        let mut filled = 0;
        while filled < pool.transfer_size() {
            let Some(idx) = self.alloc_from_buddy(&mut st, pages, 0, pressure) else {
                break;
            };
            pool.push(pages, idx);
            filled += 1;
        }
        if filled > 0 {
            pool.note_fill();
        }
        filled
    }

    /// Returns up to one transfer batch (or everything) from `pool`.
    fn pool_drain(&self, pool: &mut CpuPool, pages: &[Page], all: bool) {
        let mut st = self.state.lock();
        let n = if all { pool.len() } else { pool.transfer_size() };
        for _ in 0..n {
            let Some(idx) = pool.pop(pages) else { break };
            self.free_to_buddy(&mut st, pages, idx, 0);
        }
        pool.note_drain();
    }

    /// Allocates a block, single pages through the caller's CPU pool.
    pub(crate) fn alloc<P: Preemption + ?Sized>(
        &self,
        pages: &[Page],
        order: u8,
        pressure: &Pressure<'_>,
        sched: &P,
    ) -> Option<u32> {
        if order != 0 {
            let mut st = self.state.lock();
            return self.alloc_from_buddy(&mut st, pages, order, pressure);
        }

        let pin = PinGuard::new(sched);
        let mut pool = self.pool(pin.cpu()).lock();
        if pool.is_empty() && self.pool_fill(&mut pool, pages, pressure) == 0 {
            return None;
        }
        pool.pop(pages)
    }

    /// Returns a block, single pages through the caller's CPU pool.
    pub(crate) fn free<P: Preemption + ?Sized>(
        &self,
        pages: &[Page],
        idx: u32,
        order: u8,
        sched: &P,
    ) {
        if order != 0 {
            let mut st = self.state.lock();
            self.free_to_buddy(&mut st, pages, idx, order);
            return;
        }

        let pin = PinGuard::new(sched);
        let mut pool = self.pool(pin.cpu()).lock();
        if pool.is_full() {
            self.pool_drain(&mut pool, pages, false);
        }
        pool.push(pages, idx);
    }

    /// Empties every CPU pool of this segment into the buddy allocator.
    pub(crate) fn drain_pools(&self, pages: &[Page]) {
        for pool in &self.pools {
            let mut pool = pool.lock();
            if !pool.is_empty() {
                self.pool_drain(&mut pool, pages, true);
            }
        }
    }

    pub(crate) fn pool_stats(&self, cpu: usize) -> Option<CpuPoolStats> {
        self.pools.get(cpu).map(|p| p.lock().stats())
    }

    pub(crate) fn stats(&self) -> SegmentStats {
        let pooled = self.pools.iter().map(|p| p.lock().len()).sum();
        let st = self.state.lock();
        SegmentStats {
            index: self.index,
            start: self.span.start,
            end: self.span.end,
            pages: self.nr_pages,
            free: st.buddy.nr_free(),
            pooled,
            active: st.nr_active(),
            inactive: st.nr_inactive(),
            wired: st.nr_wired,
            reserved: st.nr_reserved,
            thresholds: self.thresholds,
        }
    }
}

impl core::fmt::Debug for Segment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Segment")
            .field("index", &self.index)
            .field("start", &self.span.start)
            .field("end", &self.span.end)
            .field("nr_pages", &self.nr_pages)
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}
