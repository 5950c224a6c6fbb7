//! Moving cached pages out of starved segments.

use crate::env::{MemoryObjects, Pmap, VmEnv};
use crate::page::{PageBits, PageType};
use crate::segment::Segment;
use crate::vm_pages::VmPages;

impl<E: VmEnv> VmPages<E> {
    /// Moves at most one page to relieve a starved segment.
    ///
    /// Starved segments are visited in index order; for each, donors of free
    /// frames are tried from the highest index down. Returns whether a page
    /// moved; the pageout daemon calls this until it returns `false`.
    pub fn balance(&self) -> bool {
        for seg in &self.segments {
            for remote in self.segments.iter().rev() {
                if remote.index() != seg.index() && self.balance_page(seg, remote) {
                    return true;
                }
            }
        }
        false
    }

    /// Copies one cache page of `seg` into a free frame of `remote` and
    /// frees the original frame in `seg`.
    fn balance_page(&self, seg: &Segment, remote: &Segment) -> bool {
        let (pulled, dest) = {
            let _pause = self.pause_lock.lock();
            let _queues = self.queue_lock.lock();
            let (mut st, mut remote_st) = Segment::lock_two(seg, remote);

            if seg.usable(&st) || !remote.page_available(&remote_st) {
                return false;
            }
            let Some(pulled) = self.pull_cache_page(&mut st, false) else {
                return false;
            };
            let Some(dest) = remote_st.buddy.alloc(&self.pages, 0) else {
                st.enqueue(&self.pages, pulled.idx, pulled.from);
                return false;
            };
            (pulled, dest)
        };

        let src = &self.pages[pulled.idx as usize];
        let dst = &self.pages[dest as usize];
        let object = pulled.object_id();
        let offset = src.offset();

        self.unmap(src);
        self.env.copy_page(src.phys_addr(), dst.phys_addr());

        let bits = src.bits();
        dst.set_kind(src.kind());
        dst.reset_bits();
        dst.update_bits(|_| {
            PageBits::new()
                .with_dirty(bits.dirty())
                .with_precious(bits.precious())
                .with_external(bits.external())
                .with_reference(bits.reference())
        });
        dst.set_owner(Some((object, offset)));
        self.env.replace_page(object, offset, dst.phys_addr());

        {
            let _queues = self.queue_lock.lock();
            remote.lock().enqueue(&self.pages, dest, pulled.from);
        }

        src.set_owner(None);
        src.reset_bits();
        src.set_kind(PageType::Free);
        {
            let mut st = seg.lock();
            seg.free_to_buddy(&mut st, &self.pages, pulled.idx, 0);
        }

        log::debug!(
            "vm_page: moved page {} -> {} (segment {} -> {})",
            src.phys_addr(),
            dst.phys_addr(),
            seg.index(),
            remote.index()
        );
        drop(pulled);
        true
    }
}
