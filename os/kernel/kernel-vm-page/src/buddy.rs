//! Binary buddy allocator over one segment's descriptors.
//!
//! Blocks are identified by the table index of their first page. A block of
//! order `o` starting at `pa` has its buddy at `pa ^ (PAGE_SIZE << o)`; two
//! free buddies of equal order are always merged, so the free lists only
//! ever hold maximal blocks.

use crate::PhysAddr;
use crate::list::PageList;
use crate::page::{ORDER_UNLISTED, Page};

/// Number of free lists, i.e. orders `0..NR_FREE_LISTS`.
pub const NR_FREE_LISTS: usize = 11;

/// Largest block order.
#[allow(clippy::cast_possible_truncation)]
pub const MAX_ORDER: u8 = (NR_FREE_LISTS - 1) as u8;

/// Physical extent of a segment and where its descriptors start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: PhysAddr,
    pub end: PhysAddr,
    pub first_page: u32,
}

impl Span {
    #[inline]
    pub(crate) fn contains(&self, pa: PhysAddr) -> bool {
        pa >= self.start && pa < self.end
    }

    /// Table index of the page at `pa`, which must be inside the span.
    #[inline]
    #[allow(clippy::cast_possible_truncation)] // table size is bounded by u32 at setup
    pub(crate) fn index_of(&self, pa: PhysAddr) -> u32 {
        debug_assert!(self.contains(pa));
        self.first_page + self.start.pages_until(pa) as u32
    }
}

#[derive(Debug)]
pub(crate) struct BuddyAllocator {
    lists: [PageList; NR_FREE_LISTS],
    nr_free: usize,
}

impl BuddyAllocator {
    pub(crate) const fn new() -> Self {
        Self {
            lists: [const { PageList::new() }; NR_FREE_LISTS],
            nr_free: 0,
        }
    }

    /// Free pages, counting every page of every block.
    #[inline]
    pub(crate) const fn nr_free(&self) -> usize {
        self.nr_free
    }

    fn insert(&mut self, pages: &[Page], order: u8, idx: u32) {
        let page = &pages[idx as usize];
        debug_assert_eq!(page.order(), ORDER_UNLISTED);
        page.set_order(order);
        self.lists[order as usize].push_front(pages, idx);
    }

    fn remove(&mut self, pages: &[Page], order: u8, idx: u32) {
        self.lists[order as usize].remove(pages, idx);
        pages[idx as usize].set_order(ORDER_UNLISTED);
    }

    /// Takes a block of exactly `order`, splitting a larger one if needed.
    pub(crate) fn alloc(&mut self, pages: &[Page], order: u8) -> Option<u32> {
        debug_assert!(order <= MAX_ORDER);

        let mut found = order;
        let idx = loop {
            if found > MAX_ORDER {
                return None;
            }
            if let Some(idx) = self.lists[found as usize].first() {
                self.remove(pages, found, idx);
                break idx;
            }
            found += 1;
        };

        // Give back the upper halves until the block has the requested size.
        while found > order {
            found -= 1;
            self.insert(pages, found, idx + (1 << found));
        }

        self.nr_free -= 1 << order;
        Some(idx)
    }

    /// Returns a block, merging it with free buddies as far as possible.
    pub(crate) fn free(&mut self, pages: &[Page], span: Span, idx: u32, order: u8) {
        debug_assert!(order <= MAX_ORDER);
        debug_assert_eq!(pages[idx as usize].order(), ORDER_UNLISTED);

        let mut pa = pages[idx as usize].phys_addr();
        let mut merged = order;
        while merged < MAX_ORDER {
            let buddy_pa = pa.buddy(merged);
            if !span.contains(buddy_pa) {
                break;
            }
            let buddy = span.index_of(buddy_pa);
            if pages[buddy as usize].order() != merged {
                break;
            }
            self.remove(pages, merged, buddy);
            pa = pa.merged(merged);
            merged += 1;
        }

        self.insert(pages, merged, span.index_of(pa));
        self.nr_free += 1 << order;
    }

    /// Number of blocks on each free list.
    pub(crate) fn block_counts(&self) -> [usize; NR_FREE_LISTS] {
        core::array::from_fn(|order| self.lists[order].len())
    }

    /// Every free block as `(order, head index)`.
    pub(crate) fn blocks<'a>(&'a self, pages: &'a [Page]) -> impl Iterator<Item = (u8, u32)> + 'a {
        (0..=MAX_ORDER).flat_map(move |order| {
            self.lists[order as usize]
                .iter(pages)
                .map(move |idx| (order, idx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PAGE_SIZE;
    use crate::list::tests::table;

    fn span(n: u32) -> Span {
        Span {
            start: PhysAddr::new(0),
            end: PhysAddr::new(u64::from(n) * PAGE_SIZE),
            first_page: 0,
        }
    }

    fn populated(n: u32) -> (Vec<Page>, BuddyAllocator) {
        let pages = table(n);
        let mut buddy = BuddyAllocator::new();
        for i in 0..n {
            buddy.free(&pages, span(n), i, 0);
        }
        (pages, buddy)
    }

    #[test]
    fn single_pages_coalesce_into_one_block() {
        let (_pages, buddy) = populated(64);
        assert_eq!(buddy.nr_free(), 64);
        let counts = buddy.block_counts();
        assert_eq!(counts[6], 1);
        assert_eq!(counts.iter().sum::<usize>(), 1);
    }

    #[test]
    fn split_leaves_one_buddy_per_order() {
        let (pages, mut buddy) = populated(64);
        let idx = buddy.alloc(&pages, 2).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(buddy.nr_free(), 60);
        assert_eq!(buddy.block_counts()[..7], [0, 0, 1, 1, 1, 1, 0]);
        assert_eq!(pages[4].order(), 2);
        assert_eq!(pages[8].order(), 3);
        assert_eq!(pages[0].order(), ORDER_UNLISTED);
    }

    #[test]
    fn halves_freed_separately_coalesce() {
        let (pages, mut buddy) = populated(64);
        let before: Vec<_> = buddy.blocks(&pages).collect();

        let idx = buddy.alloc(&pages, 3).unwrap();
        buddy.free(&pages, span(64), idx + 4, 2);
        assert_eq!(buddy.block_counts()[2], 1);
        buddy.free(&pages, span(64), idx, 2);

        let after: Vec<_> = buddy.blocks(&pages).collect();
        assert_eq!(before, after);
        assert_eq!(buddy.nr_free(), 64);
    }

    #[test]
    fn merging_stops_at_span_edge() {
        // 12 pages: an order-3 block and an order-2 block that has no buddy
        let (pages, buddy) = populated(12);
        let mut blocks: Vec<_> = buddy.blocks(&pages).collect();
        blocks.sort_unstable();
        assert_eq!(blocks, [(2, 8), (3, 0)]);
    }

    #[test]
    fn exhaustion_returns_none() {
        let (pages, mut buddy) = populated(8);
        assert!(buddy.alloc(&pages, 4).is_none());
        assert!(buddy.alloc(&pages, 3).is_some());
        assert!(buddy.alloc(&pages, 0).is_none());
        assert_eq!(buddy.nr_free(), 0);
    }
}
