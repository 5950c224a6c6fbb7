//! Active and inactive page-cache queues.

use crate::list::PageList;
use crate::page::Page;

/// One page-cache queue, split by backing so eviction can prefer
/// externally backed pages.
#[derive(Debug)]
pub(crate) struct PageQueue {
    internal: PageList,
    external: PageList,
}

impl PageQueue {
    pub(crate) const fn new() -> Self {
        Self {
            internal: PageList::new(),
            external: PageList::new(),
        }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.internal.len() + self.external.len()
    }

    const fn list_mut(&mut self, external: bool) -> &mut PageList {
        if external { &mut self.external } else { &mut self.internal }
    }

    /// Appends at the tail of the sub-list matching the page's backing.
    pub(crate) fn enqueue(&mut self, pages: &[Page], idx: u32) {
        let external = pages[idx as usize].bits().external();
        self.list_mut(external).push_back(pages, idx);
    }

    pub(crate) fn remove(&mut self, pages: &[Page], idx: u32) {
        let external = pages[idx as usize].bits().external();
        self.list_mut(external).remove(pages, idx);
    }

    /// Head of the external sub-list, else of the internal one unless
    /// `external_only`.
    pub(crate) const fn peek_first(&self, external_only: bool) -> Option<u32> {
        match self.external.first() {
            Some(idx) => Some(idx),
            None if external_only => None,
            None => self.internal.first(),
        }
    }
}
