//! Collaborators the engine calls out to.
//!
//! The engine never touches page tables, memory objects, pagers or threads
//! itself. Everything it needs from the rest of the kernel goes through the
//! traits in this module; [`VmEnv`] bundles them.
//!
//! All methods may be called while engine spin locks are held and must not
//! block on anything that could in turn wait for the engine.

use crate::PhysAddr;
use crate::page::{ObjectId, Page};
use kernel_sync::Preemption;

/// Physical-map queries and updates for a single frame.
pub trait Pmap {
    /// Revokes every virtual mapping of the frame.
    fn remove_all_mappings(&self, pa: PhysAddr);
    /// Hardware modify bit, accumulated over all mappings.
    fn is_modified(&self, pa: PhysAddr) -> bool;
    fn clear_modify(&self, pa: PhysAddr);
    /// Hardware reference bit, accumulated over all mappings.
    fn is_referenced(&self, pa: PhysAddr) -> bool;
    fn clear_reference(&self, pa: PhysAddr);
    /// Copies one page of content from `src` to `dst`.
    fn copy_page(&self, src: PhysAddr, dst: PhysAddr);
}

/// The VM-object layer, seen from the page engine.
pub trait MemoryObjects {
    /// Non-blocking lock attempt.
    fn try_lock(&self, object: ObjectId) -> bool;
    /// Releases a lock taken with [`try_lock`](Self::try_lock).
    fn unlock(&self, object: ObjectId);
    /// Backed by the kernel rather than an external pager.
    fn is_internal(&self, object: ObjectId) -> bool;
    /// Not being terminated.
    fn is_alive(&self, object: ObjectId) -> bool;
    /// The object's pager is the default in-kernel pager.
    fn has_default_pager(&self, object: ObjectId) -> bool;
    /// Drops the resident page at `offset` from the object.
    fn remove_page(&self, object: ObjectId, offset: u64);
    /// Makes the frame at `pa` the resident page at `offset`.
    fn replace_page(&self, object: ObjectId, offset: u64, pa: PhysAddr);
    /// Offered after the engine reclaimed one of the object's pages.
    fn collect(&self, object: ObjectId);
}

/// The pageout daemon.
pub trait Pageout {
    /// Wakes the daemon. Idempotent.
    fn start(&self);
    /// Takes a busy, unmapped page for write-back.
    ///
    /// The page is in laundry until the daemon calls
    /// [`VmPages::laundry_done`](crate::VmPages::laundry_done).
    fn page_out(&self, page: &Page, double_paging: bool);
}

/// Events threads can sleep on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitChannel {
    /// The allocation pause was lifted.
    AllocPaused,
}

/// Thread and processor services.
pub trait Scheduler: Preemption {
    /// The current thread may dip into the reserve and never waits.
    fn is_privileged(&self) -> bool;

    /// Sleeps on `channel` as long as `still_blocked` holds.
    ///
    /// `still_blocked` is evaluated with wakeups on `channel` excluded, so a
    /// wakeup between the check and the sleep is never lost.
    fn sleep_while(&self, channel: WaitChannel, still_blocked: &dyn Fn() -> bool);

    /// Wakes every thread sleeping on `channel`.
    fn wakeup(&self, channel: WaitChannel);
}

/// Everything the engine needs from the kernel.
pub trait VmEnv: Pmap + MemoryObjects + Pageout + Scheduler {}

impl<T: Pmap + MemoryObjects + Pageout + Scheduler> VmEnv for T {}

/// Lock on a memory object, released on drop.
pub(crate) struct ObjectGuard<'a, M: MemoryObjects + ?Sized> {
    objects: &'a M,
    object: ObjectId,
}

impl<'a, M: MemoryObjects + ?Sized> ObjectGuard<'a, M> {
    pub(crate) fn try_new(objects: &'a M, object: ObjectId) -> Option<Self> {
        objects.try_lock(object).then_some(Self { objects, object })
    }

    #[inline]
    pub(crate) const fn object(&self) -> ObjectId {
        self.object
    }
}

impl<M: MemoryObjects + ?Sized> Drop for ObjectGuard<'_, M> {
    fn drop(&mut self) {
        self.objects.unlock(self.object);
    }
}
