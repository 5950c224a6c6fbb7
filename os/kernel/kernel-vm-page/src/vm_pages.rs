use crate::buddy::{MAX_ORDER, NR_FREE_LISTS};
use crate::config::VmPageConfig;
use crate::cpu_pool::CpuPoolStats;
use crate::env::{Pageout, Scheduler, VmEnv, WaitChannel};
use crate::error::{VmPageError, halt};
use crate::page::{Page, PageType};
use crate::segment::{Pressure, Segment, SegmentStats, Selector};
use crate::{PAGE_SIZE, PhysAddr};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use kernel_sync::SpinLock;

/// The physical page engine.
///
/// Built once by [`Bootstrap::setup`](crate::Bootstrap::setup) and shared by
/// reference for the rest of the kernel's life.
///
/// Lock order: pause lock, page-queue lock, segment locks by index. CPU pool
/// locks come before their segment's lock. Object locks are only ever
/// try-locked while any of these are held.
pub struct VmPages<E: VmEnv> {
    pub(crate) config: VmPageConfig,
    pub(crate) pages: Box<[Page]>,
    pub(crate) segments: Box<[Segment]>,
    pub(crate) pause_lock: SpinLock<()>,
    pub(crate) queue_lock: SpinLock<()>,
    pub(crate) paused: AtomicBool,
    pub(crate) laundry: AtomicUsize,
    pub(crate) external_laundry: AtomicUsize,
    pub(crate) eviction_warned: AtomicBool,
    pub(crate) env: E,
}

impl<E: VmEnv> VmPages<E> {
    pub(crate) fn from_parts(
        config: VmPageConfig,
        pages: Box<[Page]>,
        segments: Box<[Segment]>,
        env: E,
    ) -> Self {
        Self {
            config,
            pages,
            segments,
            pause_lock: SpinLock::new(()),
            queue_lock: SpinLock::new(()),
            paused: AtomicBool::new(false),
            laundry: AtomicUsize::new(0),
            external_laundry: AtomicUsize::new(0),
            eviction_warned: AtomicBool::new(false),
            env,
        }
    }

    #[must_use]
    pub const fn env(&self) -> &E {
        &self.env
    }

    #[must_use]
    pub const fn config(&self) -> &VmPageConfig {
        &self.config
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    #[must_use]
    pub fn segment_stats(&self, index: usize) -> Option<SegmentStats> {
        self.segments.get(index).map(Segment::stats)
    }

    #[must_use]
    pub fn cpu_pool_stats(&self, seg: usize, cpu: usize) -> Option<CpuPoolStats> {
        self.segments.get(seg)?.pool_stats(cpu)
    }

    /// Unprivileged allocations are currently refused.
    #[must_use]
    pub fn pause_active(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pages handed to pageout and not yet written back.
    #[must_use]
    pub fn laundry_count(&self) -> usize {
        self.laundry.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn external_laundry_count(&self) -> usize {
        self.external_laundry.load(Ordering::Acquire)
    }

    /// Bytes of memory covered by the descriptor table.
    #[must_use]
    pub fn mem_size(&self) -> u64 {
        self.segments.iter().map(|s| s.nr_pages() as u64 * PAGE_SIZE).sum()
    }

    /// Bytes on the buddy free lists of all segments.
    #[must_use]
    pub fn mem_free(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.lock().buddy.nr_free() as u64 * PAGE_SIZE)
            .sum()
    }

    /// Descriptor of the page containing `pa`.
    #[must_use]
    pub fn lookup(&self, pa: PhysAddr) -> Option<&Page> {
        let seg = self.segments.iter().find(|s| s.contains(pa))?;
        Some(&self.pages[seg.span().index_of(pa) as usize])
    }

    /// Table index of the page containing `pa`.
    ///
    /// # Errors
    ///
    /// [`VmPageError::AddressNotManaged`] if no segment covers `pa`.
    pub fn table_index(&self, pa: PhysAddr) -> Result<usize, VmPageError> {
        self.lookup(pa)
            .map(Page::index)
            .ok_or(VmPageError::AddressNotManaged(pa))
    }

    /// Descriptor at a table index.
    #[must_use]
    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    /// Index of `page`, which must come from this engine's table.
    pub(crate) fn checked_index(&self, page: &Page) -> u32 {
        match self.pages.get(page.index()) {
            #[allow(clippy::cast_possible_truncation)]
            Some(p) if ptr::eq(p, page) => page.index() as u32,
            _ => halt(format_args!("foreign page descriptor {}", page.phys_addr())),
        }
    }

    #[inline]
    pub(crate) fn segment_of(&self, page: &Page) -> &Segment {
        &self.segments[page.seg_index()]
    }

    fn pressure(&self) -> Pressure<'_> {
        Pressure {
            paused: &self.paused,
            privileged: self.env.is_privileged(),
            pageout: &self.env,
        }
    }

    fn set_block_kind(&self, idx: u32, order: u8, kind: PageType) {
        let start = idx as usize;
        for page in &self.pages[start..start + (1 << order)] {
            page.set_kind(kind);
        }
    }

    /// Allocates a block of `1 << order` pages.
    ///
    /// Starts at the segment named by `selector` (or the highest loaded one)
    /// and falls back to lower segments. Returns `None` when the caller is
    /// unprivileged and memory is short; the caller should then
    /// [`wait`](Self::wait).
    ///
    /// # Panics
    ///
    /// Halts if a privileged thread cannot be served, for an order above
    /// [`MAX_ORDER`], or for [`PageType::Free`].
    pub fn alloc(&self, order: u8, selector: Selector, kind: PageType) -> Option<&Page> {
        if order > MAX_ORDER {
            halt(format_args!("order {order} above maximum"));
        }
        if kind == PageType::Free {
            halt(format_args!("allocating a page as free"));
        }

        let pressure = self.pressure();
        let top = selector.index().min(self.segments.len() - 1);
        for seg in self.segments[..=top].iter().rev() {
            if let Some(idx) = seg.alloc(&self.pages, order, &pressure, &self.env) {
                self.set_block_kind(idx, order, kind);
                return Some(&self.pages[idx as usize]);
            }
        }

        if pressure.privileged {
            halt(format_args!("privileged thread unable to allocate page"));
        }
        None
    }

    /// Single-page allocation that waits out allocation pauses.
    ///
    /// # Panics
    ///
    /// Halts if called from a privileged thread that cannot be served.
    pub fn grab(&self, selector: Selector, kind: PageType) -> &Page {
        loop {
            if let Some(page) = self.alloc(0, selector, kind) {
                return page;
            }
            self.wait(|| ());
        }
    }

    /// Returns a block of `1 << order` pages.
    ///
    /// A page still on a queue or wired is taken off first, and the page
    /// loses its owner. The object layer is expected to have dropped the page
    /// from the object already.
    ///
    /// # Panics
    ///
    /// Halts on double free, on reserved pages, on orders above
    /// [`MAX_ORDER`] and on descriptors not from this table.
    pub fn free(&self, page: &Page, order: u8) {
        if order > MAX_ORDER {
            halt(format_args!("order {order} above maximum"));
        }
        let idx = self.checked_index(page);
        match page.kind() {
            PageType::Free => halt(format_args!("double free of {}", page.phys_addr())),
            PageType::Reserved => halt(format_args!("freeing reserved page {}", page.phys_addr())),
            _ => {}
        }

        let seg = self.segment_of(page);
        let bits = page.bits();
        if bits.queued() || page.wire_count() > 0 {
            let _queues = self.queue_lock.lock();
            let mut st = seg.lock();
            st.dequeue(&self.pages, idx);
            if page.wire_count() > 0 {
                st.nr_wired -= 1;
                page.set_wire_count(0);
            }
        }
        if bits.laundry() {
            self.laundry.fetch_sub(1, Ordering::AcqRel);
        }
        if bits.external_laundry() {
            self.external_laundry.fetch_sub(1, Ordering::AcqRel);
        }

        page.set_owner(None);
        let start = idx as usize;
        for p in &self.pages[start..start + (1 << order)] {
            p.reset_bits();
            p.set_kind(PageType::Free);
        }
        seg.free(&self.pages, idx, order, &self.env);

        if self.paused.load(Ordering::Acquire) {
            self.env.start();
        }
    }

    /// Blocks until the allocation pause is lifted, then runs `continuation`.
    ///
    /// # Panics
    ///
    /// Halts when called from a privileged thread.
    pub fn wait<R>(&self, continuation: impl FnOnce() -> R) -> R {
        if self.env.is_privileged() {
            halt(format_args!("privileged thread waiting for pages"));
        }
        self.env
            .sleep_while(WaitChannel::AllocPaused, &|| self.paused.load(Ordering::Acquire));
        continuation()
    }

    /// Lifts the allocation pause if every segment is usable.
    ///
    /// Returns whether all segments are usable. Waiters are woken whenever
    /// this returns `true`.
    pub fn check_usable(&self) -> bool {
        let _pause = self.pause_lock.lock();
        for seg in &self.segments {
            let st = seg.lock();
            if !seg.usable(&st) {
                return false;
            }
        }

        if self.paused.swap(false, Ordering::AcqRel) {
            log::debug!("vm_page: allocation pause lifted");
        }
        self.env.wakeup(WaitChannel::AllocPaused);
        true
    }

    /// Returns every pooled page to its buddy allocator.
    pub fn drain_cpu_pools(&self) {
        for seg in &self.segments {
            seg.drain_pools(&self.pages);
        }
    }

    /// Free blocks of a segment as sorted `(order, address)` pairs.
    #[must_use]
    pub fn free_list_snapshot(&self, seg: usize) -> Option<Vec<(u8, PhysAddr)>> {
        let seg = self.segments.get(seg)?;
        let st = seg.lock();
        let mut blocks: Vec<_> = st
            .buddy
            .blocks(&self.pages)
            .map(|(order, idx)| (order, self.pages[idx as usize].phys_addr()))
            .collect();
        drop(st);
        blocks.sort_unstable();
        Some(blocks)
    }

    /// Number of free blocks per order in a segment.
    #[must_use]
    pub fn free_block_counts(&self, seg: usize) -> Option<[usize; NR_FREE_LISTS]> {
        Some(self.segments.get(seg)?.lock().buddy.block_counts())
    }

    /// Hands a reserved page over to the allocator.
    ///
    /// # Errors
    ///
    /// [`VmPageError::NotReserved`] if the page is not [`PageType::Reserved`].
    pub fn manage(&self, page: &Page) -> Result<(), VmPageError> {
        let idx = self.checked_index(page);
        let seg = self.segment_of(page);
        let mut st = seg.lock();
        if page.kind() != PageType::Reserved {
            return Err(VmPageError::NotReserved(page.phys_addr()));
        }
        page.set_kind(PageType::Free);
        st.nr_reserved -= 1;
        seg.free_to_buddy(&mut st, &self.pages, idx, 0);
        Ok(())
    }
}
