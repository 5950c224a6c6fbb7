//! Page descriptors.
//!
//! One [`Page`] exists for every frame of every loaded segment. Descriptors
//! live in a single table built at setup and are never freed. All fields are
//! atomics so descriptors can be shared freely; which lock guards which field
//! is part of the engine's protocol:
//!
//! | Field | Guarded by |
//! |-------|------------|
//! | `order`, list links of free or queued pages | segment lock |
//! | list links of pooled pages | CPU pool lock |
//! | `active`/`inactive` bits, `wire_count` | page-queue lock + segment lock |
//! | object, offset, remaining bits | the owning object's lock |

use crate::PhysAddr;
use bitfield_struct::bitfield;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Sentinel order of a page that does not head a free block.
pub const ORDER_UNLISTED: u8 = u8::MAX;

/// Null link / index.
pub(crate) const NIL: u32 = u32::MAX;

/// Non-owning handle to the memory object a page belongs to.
///
/// Only ever used to try-lock the object through
/// [`MemoryObjects`](crate::MemoryObjects); it carries no lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU32);

impl ObjectId {
    #[must_use]
    pub const fn new(id: NonZeroU32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    const fn from_raw(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Free = 0,
    /// Not managed by the engine: firmware, kernel image, boot allocations.
    Reserved = 1,
    /// Descriptor table.
    Table = 2,
    Pmap = 3,
    Kmem = 4,
    Stack = 5,
    /// General kernel use, including object pages.
    Kernel = 6,
}

impl PageType {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Free,
            1 => Self::Reserved,
            2 => Self::Table,
            3 => Self::Pmap,
            4 => Self::Kmem,
            5 => Self::Stack,
            _ => Self::Kernel,
        }
    }
}

/// Software state bits of a page.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageBits {
    /// On its segment's active queue.
    pub active: bool,
    /// On its segment's inactive queue.
    pub inactive: bool,
    /// Being unmapped, copied or written back.
    pub busy: bool,
    /// Content differs from backing store.
    pub dirty: bool,
    /// Software reference bit.
    pub reference: bool,
    /// Must be returned to the pager even if clean.
    pub precious: bool,
    /// Owner is backed by an external pager.
    pub external: bool,
    /// Handed to pageout, write-back pending.
    pub laundry: bool,
    /// Laundry routed through the default pager.
    pub external_laundry: bool,
    #[bits(23)]
    __: u32,
}

impl PageBits {
    /// Member of either page-cache queue.
    #[inline]
    #[must_use]
    pub const fn queued(self) -> bool {
        self.active() || self.inactive()
    }
}

/// Descriptor of one physical page frame.
pub struct Page {
    phys_addr: PhysAddr,
    index: u32,
    seg_index: u8,
    order: AtomicU8,
    kind: AtomicU8,
    bits: AtomicU32,
    wire_count: AtomicU32,
    object: AtomicU32,
    offset: AtomicU64,
    prev: AtomicU32,
    next: AtomicU32,
}

impl Page {
    pub(crate) const fn new(index: u32, seg_index: u8, phys_addr: PhysAddr) -> Self {
        Self {
            phys_addr,
            index,
            seg_index,
            order: AtomicU8::new(ORDER_UNLISTED),
            kind: AtomicU8::new(PageType::Reserved as u8),
            bits: AtomicU32::new(0),
            wire_count: AtomicU32::new(0),
            object: AtomicU32::new(0),
            offset: AtomicU64::new(0),
            prev: AtomicU32::new(NIL),
            next: AtomicU32::new(NIL),
        }
    }

    #[inline]
    #[must_use]
    pub const fn phys_addr(&self) -> PhysAddr {
        self.phys_addr
    }

    /// Position in the descriptor table.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    #[must_use]
    pub const fn seg_index(&self) -> usize {
        self.seg_index as usize
    }

    /// Order of the free block this page heads, or [`ORDER_UNLISTED`].
    #[inline]
    #[must_use]
    pub fn order(&self) -> u8 {
        self.order.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_order(&self, order: u8) {
        self.order.store(order, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> PageType {
        PageType::from_u8(self.kind.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_kind(&self, kind: PageType) {
        self.kind.store(kind as u8, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn bits(&self) -> PageBits {
        PageBits::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Read-modify-write of the state bits.
    #[inline]
    pub(crate) fn update_bits(&self, f: impl Fn(PageBits) -> PageBits) {
        let _ = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(f(PageBits::from_bits(raw)).into_bits())
            });
    }

    #[inline]
    pub(crate) fn reset_bits(&self) {
        self.bits.store(0, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn wire_count(&self) -> u32 {
        self.wire_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_wire_count(&self, count: u32) {
        self.wire_count.store(count, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn object(&self) -> Option<ObjectId> {
        ObjectId::from_raw(self.object.load(Ordering::Acquire))
    }

    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    pub(crate) fn set_owner(&self, owner: Option<(ObjectId, u64)>) {
        match owner {
            Some((object, offset)) => {
                self.offset.store(offset, Ordering::Relaxed);
                self.object.store(object.get(), Ordering::Release);
            }
            None => {
                self.object.store(0, Ordering::Release);
                self.offset.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Owned by a buddy allocator or a CPU pool.
    #[inline]
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.kind() == PageType::Free
    }

    #[inline]
    pub(crate) fn prev(&self) -> u32 {
        self.prev.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn next(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_links(&self, prev: u32, next: u32) {
        self.prev.store(prev, Ordering::Relaxed);
        self.next.store(next, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: u32) {
        self.prev.store(prev, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_next(&self, next: u32) {
        self.next.store(next, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Page")
            .field("phys_addr", &self.phys_addr)
            .field("seg_index", &self.seg_index)
            .field("order", &self.order())
            .field("kind", &self.kind())
            .field("bits", &self.bits())
            .field("wire_count", &self.wire_count())
            .field("object", &self.object())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_page_is_reserved_and_unlisted() {
        let p = Page::new(7, 1, PhysAddr::new(0x7000));
        assert_eq!(p.kind(), PageType::Reserved);
        assert_eq!(p.order(), ORDER_UNLISTED);
        assert_eq!(p.index(), 7);
        assert_eq!(p.seg_index(), 1);
        assert_eq!(p.object(), None);
        assert_eq!(p.bits(), PageBits::new());
    }

    #[test]
    fn bits_update_in_place() {
        let p = Page::new(0, 0, PhysAddr::new(0));
        p.update_bits(|b| b.with_dirty(true).with_external(true));
        let b = p.bits();
        assert!(b.dirty() && b.external());
        assert!(!b.queued());

        p.update_bits(|b| b.with_inactive(true));
        assert!(p.bits().queued());
        p.reset_bits();
        assert_eq!(p.bits(), PageBits::new());
    }

    #[test]
    fn owner_round_trips_through_the_handle() {
        let p = Page::new(0, 0, PhysAddr::new(0));
        let obj = ObjectId::new(NonZeroU32::new(42).unwrap());
        p.set_owner(Some((obj, 0x3000)));
        assert_eq!(p.object(), Some(obj));
        assert_eq!(p.offset(), 0x3000);
        p.set_owner(None);
        assert_eq!(p.object(), None);
    }
}
