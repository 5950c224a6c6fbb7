//! Intrusive doubly-linked list of page descriptors.
//!
//! Links are table indices stored in the descriptors themselves, so a page
//! can be on at most one list at a time. The list owns no memory; every
//! operation takes the descriptor table it indexes into.

use crate::page::{NIL, Page};

#[derive(Debug)]
pub(crate) struct PageList {
    head: u32,
    tail: u32,
    len: usize,
}

impl PageList {
    pub(crate) const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) const fn first(&self) -> Option<u32> {
        if self.head == NIL { None } else { Some(self.head) }
    }

    pub(crate) fn push_front(&mut self, pages: &[Page], idx: u32) {
        let page = &pages[idx as usize];
        page.set_links(NIL, self.head);
        if self.head == NIL {
            self.tail = idx;
        } else {
            pages[self.head as usize].set_prev(idx);
        }
        self.head = idx;
        self.len += 1;
    }

    pub(crate) fn push_back(&mut self, pages: &[Page], idx: u32) {
        let page = &pages[idx as usize];
        page.set_links(self.tail, NIL);
        if self.tail == NIL {
            self.head = idx;
        } else {
            pages[self.tail as usize].set_next(idx);
        }
        self.tail = idx;
        self.len += 1;
    }

    /// Unlinks `idx`, which must be on this list.
    pub(crate) fn remove(&mut self, pages: &[Page], idx: u32) {
        debug_assert!(self.len > 0);
        let page = &pages[idx as usize];
        let (prev, next) = (page.prev(), page.next());

        if prev == NIL {
            self.head = next;
        } else {
            pages[prev as usize].set_next(next);
        }
        if next == NIL {
            self.tail = prev;
        } else {
            pages[next as usize].set_prev(prev);
        }

        page.set_links(NIL, NIL);
        self.len -= 1;
    }

    pub(crate) fn pop_front(&mut self, pages: &[Page]) -> Option<u32> {
        let idx = self.first()?;
        self.remove(pages, idx);
        Some(idx)
    }

    pub(crate) fn iter<'a>(&self, pages: &'a [Page]) -> impl Iterator<Item = u32> + 'a {
        let mut cur = self.head;
        core::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let idx = cur;
            cur = pages[idx as usize].next();
            Some(idx)
        })
    }
}
