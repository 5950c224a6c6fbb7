//! Reclamation: pulling cache pages, evicting them and aging the active
//! queue.

use crate::env::{MemoryObjects, ObjectGuard, Pageout, Pmap, VmEnv};
use crate::error::halt;
use crate::page::{ObjectId, Page};
use crate::segment::{QueueKind, Segment, SegmentState};
use crate::vm_pages::VmPages;
use core::sync::atomic::Ordering;

/// Result of one [`VmPages::evict`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictOutcome {
    /// A page was reclaimed or handed to pageout.
    pub evicted: bool,
    /// The caller should wait for laundry or free memory before retrying.
    pub should_wait: bool,
}

/// A cache page taken off its queue, with its object locked.
pub(crate) struct Pulled<'a, E: MemoryObjects> {
    pub(crate) idx: u32,
    pub(crate) from: QueueKind,
    pub(crate) object: ObjectGuard<'a, E>,
}

impl<E: MemoryObjects> Pulled<'_, E> {
    pub(crate) fn object_id(&self) -> ObjectId {
        self.object.object()
    }
}

impl<E: VmEnv> VmPages<E> {
    fn can_move(&self, page: &Page, object: ObjectId) -> bool {
        let bits = page.bits();
        !bits.busy() && !bits.laundry() && self.env.is_alive(object)
    }

    /// Takes the first movable page off one queue.
    ///
    /// Pages whose object is locked elsewhere, or that cannot move, go back
    /// to the tail. The scan ends when the first page seen comes around
    /// again. Caller holds the page-queue lock and the segment lock.
    pub(crate) fn pull_page(
        &self,
        st: &mut SegmentState,
        queue: QueueKind,
        external_only: bool,
    ) -> Option<Pulled<'_, E>> {
        let mut first = None;
        loop {
            let idx = st.first(queue, external_only)?;
            match first {
                None => first = Some(idx),
                Some(seen) if seen == idx => return None,
                Some(_) => {}
            }

            st.dequeue(&self.pages, idx);
            let page = &self.pages[idx as usize];
            let Some(object) = page.object() else {
                halt(format_args!("queued page {} has no object", page.phys_addr()));
            };

            let Some(guard) = ObjectGuard::try_new(&self.env, object) else {
                st.enqueue(&self.pages, idx, queue);
                continue;
            };
            if !self.can_move(page, object) {
                st.enqueue(&self.pages, idx, queue);
                continue;
            }

            return Some(Pulled {
                idx,
                from: queue,
                object: guard,
            });
        }
    }

    /// Inactive queue first, then active.
    pub(crate) fn pull_cache_page(
        &self,
        st: &mut SegmentState,
        external_only: bool,
    ) -> Option<Pulled<'_, E>> {
        if let Some(pulled) = self.pull_page(st, QueueKind::Inactive, external_only) {
            return Some(pulled);
        }
        self.pull_page(st, QueueKind::Active, external_only)
    }

    /// Revokes all mappings of a pulled page and folds the hardware modify
    /// bit into `dirty`.
    pub(crate) fn unmap(&self, page: &Page) {
        let pa = page.phys_addr();
        page.update_bits(|b| b.with_busy(true));
        self.env.remove_all_mappings(pa);
        if !page.bits().dirty() && self.env.is_modified(pa) {
            page.update_bits(|b| b.with_dirty(true));
        }
    }

    /// One eviction attempt on `seg`.
    fn seg_evict(&self, seg: &Segment, external_only: bool, alloc_paused: bool) -> bool {
        let pulled = loop {
            let _queues = self.queue_lock.lock();
            let mut st = seg.lock();
            let Some(pulled) = self.pull_cache_page(&mut st, external_only) else {
                return false;
            };

            let page = &self.pages[pulled.idx as usize];
            if pulled.from == QueueKind::Inactive
                && (page.bits().reference() || self.env.is_referenced(page.phys_addr()))
            {
                st.add_active(&self.pages, pulled.idx);
                log::trace!("vm_page: reactivated {}", page.phys_addr());
                continue;
            }
            break pulled;
        };

        let page = &self.pages[pulled.idx as usize];
        let object = pulled.object_id();
        self.unmap(page);

        let bits = page.bits();
        if !bits.dirty() && !bits.precious() {
            self.env.remove_page(object, page.offset());
            self.free(page, 0);
            drop(pulled);
            self.env.collect(object);
            return true;
        }

        let double_paging = !self.env.is_internal(object)
            && alloc_paused
            && !self.env.has_default_pager(object);
        page.update_bits(|b| b.with_laundry(true).with_external_laundry(double_paging));
        self.laundry.fetch_add(1, Ordering::AcqRel);
        if double_paging {
            self.external_laundry.fetch_add(1, Ordering::AcqRel);
        }
        log::trace!(
            "vm_page: paging out {} (double paging: {double_paging})",
            page.phys_addr()
        );
        self.env.page_out(page, double_paging);
        drop(pulled);
        true
    }

    fn evict_once(&self, external_only: bool, alloc_paused: bool) -> bool {
        self.segments
            .iter()
            .any(|seg| self.seg_evict(seg, external_only, alloc_paused))
    }

    /// Reclaims or pages out one cache page.
    ///
    /// With `external_only`, only externally backed pages are considered at
    /// first; if none can be evicted and nothing is in laundry, internal
    /// pages are tried as well. A complete failure is logged once.
    pub fn evict(&self, external_only: bool) -> EvictOutcome {
        let alloc_paused = self.paused.load(Ordering::Acquire);

        let mut evicted = self.evict_once(external_only, alloc_paused);
        if !evicted && external_only && self.laundry_count() == 0 {
            evicted = self.evict_once(false, alloc_paused);
        }

        let laundry = self.laundry_count();
        if !evicted && laundry == 0 && !self.eviction_warned.swap(true, Ordering::AcqRel) {
            log::warn!("vm_page: unable to recycle any page");
        }

        EvictOutcome {
            evicted,
            should_wait: !evicted || laundry != 0,
        }
    }

    /// Ages active pages onto the inactive queue.
    ///
    /// Per segment, active pages are deactivated until at most
    /// `high_active` of the cached pages remain active.
    pub fn refill_inactive(&self) {
        for seg in &self.segments {
            let _queues = self.queue_lock.lock();
            let mut st = seg.lock();
            let high_active = self.config.high_active.of(st.nr_active() + st.nr_inactive());

            while st.nr_active() > high_active {
                let Some(pulled) = self.pull_page(&mut st, QueueKind::Active, false) else {
                    break;
                };
                let page = &self.pages[pulled.idx as usize];
                page.update_bits(|b| b.with_reference(false));
                self.env.clear_reference(page.phys_addr());
                st.add_inactive(&self.pages, pulled.idx);
            }
        }
    }
}
