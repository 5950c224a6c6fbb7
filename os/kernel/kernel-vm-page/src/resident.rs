//! Page-cache transitions driven by the VM-object layer.

use crate::env::{Pmap, VmEnv};
use crate::error::{VmPageError, halt};
use crate::page::{ObjectId, Page};
use crate::vm_pages::VmPages;
use core::sync::atomic::Ordering;

impl<E: VmEnv> VmPages<E> {
    /// Records that `page` now holds `object`'s data at `offset`.
    ///
    /// # Panics
    ///
    /// Halts for free pages and for pages still on a queue.
    pub fn insert(&self, page: &Page, object: ObjectId, offset: u64, external: bool) {
        self.checked_index(page);
        if page.is_free() || page.bits().queued() {
            halt(format_args!("cannot insert page {}", page.phys_addr()));
        }
        page.update_bits(|b| b.with_external(external));
        page.set_owner(Some((object, offset)));
    }

    /// Detaches `page` from its object, taking it off its queue.
    pub fn remove(&self, page: &Page) {
        let idx = self.checked_index(page);
        if page.bits().queued() {
            let _queues = self.queue_lock.lock();
            self.segment_of(page).lock().dequeue(&self.pages, idx);
        }
        page.set_owner(None);
        page.update_bits(|b| b.with_external(false));
    }

    /// Pins `page` against reclamation.
    pub fn wire(&self, page: &Page) {
        let idx = self.checked_index(page);
        let _queues = self.queue_lock.lock();
        let count = page.wire_count();
        if count == 0 {
            let mut st = self.segment_of(page).lock();
            st.dequeue(&self.pages, idx);
            st.nr_wired += 1;
        }
        page.set_wire_count(count + 1);
    }

    /// Drops one wiring; the last one puts an owned page on the active queue.
    ///
    /// # Panics
    ///
    /// Halts if the page is not wired.
    pub fn unwire(&self, page: &Page) {
        let idx = self.checked_index(page);
        let _queues = self.queue_lock.lock();
        let count = page.wire_count();
        if count == 0 {
            halt(format_args!("unwiring unwired page {}", page.phys_addr()));
        }
        page.set_wire_count(count - 1);
        if count == 1 {
            let mut st = self.segment_of(page).lock();
            st.nr_wired -= 1;
            if page.object().is_some() {
                st.add_active(&self.pages, idx);
            }
        }
    }

    /// Moves `page` to the active queue unless it is wired or already there.
    ///
    /// # Errors
    ///
    /// [`VmPageError::NotOwned`] for pages without an object.
    pub fn activate(&self, page: &Page) -> Result<(), VmPageError> {
        let idx = self.checked_index(page);
        if page.object().is_none() {
            return Err(VmPageError::NotOwned(page.phys_addr()));
        }

        let _queues = self.queue_lock.lock();
        let mut st = self.segment_of(page).lock();
        if page.bits().inactive() {
            st.dequeue(&self.pages, idx);
        }
        if !page.bits().active() && page.wire_count() == 0 {
            st.add_active(&self.pages, idx);
        }
        Ok(())
    }

    /// Moves `page` to the inactive queue, clearing its reference bits.
    ///
    /// Wired pages are left alone.
    ///
    /// # Errors
    ///
    /// [`VmPageError::NotOwned`] for pages without an object.
    pub fn deactivate(&self, page: &Page) -> Result<(), VmPageError> {
        let idx = self.checked_index(page);
        if page.object().is_none() {
            return Err(VmPageError::NotOwned(page.phys_addr()));
        }

        let _queues = self.queue_lock.lock();
        if page.wire_count() != 0 || page.bits().inactive() {
            return Ok(());
        }
        let mut st = self.segment_of(page).lock();
        st.dequeue(&self.pages, idx);
        page.update_bits(|b| b.with_reference(false));
        self.env.clear_reference(page.phys_addr());
        st.add_inactive(&self.pages, idx);
        Ok(())
    }

    pub fn set_dirty(&self, page: &Page, dirty: bool) {
        self.checked_index(page);
        page.update_bits(|b| b.with_dirty(dirty));
    }

    pub fn set_precious(&self, page: &Page, precious: bool) {
        self.checked_index(page);
        page.update_bits(|b| b.with_precious(precious));
    }

    pub fn set_reference(&self, page: &Page, reference: bool) {
        self.checked_index(page);
        page.update_bits(|b| b.with_reference(reference));
    }

    /// Pageout finished writing `page` back.
    ///
    /// Clears the laundry state and the busy bit; what happens to the page
    /// next is up to the object layer.
    ///
    /// # Panics
    ///
    /// Halts if the page was not in laundry.
    pub fn laundry_done(&self, page: &Page) {
        self.checked_index(page);
        let bits = page.bits();
        if !bits.laundry() {
            halt(format_args!("page {} not in laundry", page.phys_addr()));
        }
        page.update_bits(|b| b.with_laundry(false).with_external_laundry(false).with_busy(false));
        self.laundry.fetch_sub(1, Ordering::AcqRel);
        if bits.external_laundry() {
            self.external_laundry.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
