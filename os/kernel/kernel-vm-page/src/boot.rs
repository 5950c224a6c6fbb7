//! Boot-time segment table and descriptor table construction.

use crate::buddy::Span;
use crate::config::{PoolGeometry, Thresholds, VmPageConfig};
use crate::env::VmEnv;
use crate::error::VmPageError;
use crate::page::{NIL, Page, PageType};
use crate::segment::{MAX_SEGMENTS, Segment, Selector};
use crate::vm_pages::VmPages;
use crate::{PAGE_SIZE, PhysAddr};
use alloc::boxed::Box;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy)]
struct BootSegment {
    start: PhysAddr,
    end: PhysAddr,
    /// Remaining heap, if one was loaded.
    heap: Option<(PhysAddr, PhysAddr)>,
}

/// Physical memory as reported by the platform, before the engine exists.
///
/// Segments are loaded with [`load`](Self::load), their allocatable part
/// with [`load_heap`](Self::load_heap). Early code can carve memory off the
/// heaps with [`bootalloc`](Self::bootalloc). [`setup`](Self::setup) then
/// builds the engine; everything outside the remaining heaps stays
/// [`PageType::Reserved`] until [`VmPages::manage`] hands it over.
#[derive(Debug, Default)]
pub struct Bootstrap {
    segs: [Option<BootSegment>; MAX_SEGMENTS],
}

fn check_range(start: PhysAddr, end: PhysAddr) -> Result<(), VmPageError> {
    if start.is_page_aligned() && end.is_page_aligned() && start < end {
        Ok(())
    } else {
        Err(VmPageError::InvalidRange { start, end })
    }
}

impl Bootstrap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segs: [None; MAX_SEGMENTS],
        }
    }

    /// Records segment `seg` as `start..end`.
    ///
    /// # Errors
    ///
    /// Bad index, unaligned or empty range, or segment already loaded.
    pub fn load(&mut self, seg: usize, start: PhysAddr, end: PhysAddr) -> Result<(), VmPageError> {
        let slot = self
            .segs
            .get_mut(seg)
            .ok_or(VmPageError::InvalidSegmentIndex(seg))?;
        check_range(start, end)?;
        if slot.is_some() {
            return Err(VmPageError::AlreadyLoaded(seg));
        }
        *slot = Some(BootSegment { start, end, heap: None });
        Ok(())
    }

    /// Records the allocatable part of a loaded segment.
    ///
    /// # Errors
    ///
    /// Bad index, segment not loaded, unaligned range, or a heap reaching
    /// outside its segment.
    pub fn load_heap(
        &mut self,
        seg: usize,
        avail_start: PhysAddr,
        avail_end: PhysAddr,
    ) -> Result<(), VmPageError> {
        let slot = self
            .segs
            .get_mut(seg)
            .ok_or(VmPageError::InvalidSegmentIndex(seg))?;
        let boot = slot.as_mut().ok_or(VmPageError::NotLoaded(seg))?;
        check_range(avail_start, avail_end)?;
        if avail_start < boot.start || avail_end > boot.end {
            return Err(VmPageError::HeapOutOfRange {
                seg,
                start: avail_start,
                end: avail_end,
            });
        }
        boot.heap = Some((avail_start, avail_end));
        Ok(())
    }

    /// Number of loaded segments.
    ///
    /// # Errors
    ///
    /// Nothing loaded, a gap in the table, or segments out of address order.
    fn check_boot_segs(&self) -> Result<usize, VmPageError> {
        let count = self.segs.iter().take_while(|s| s.is_some()).count();
        if count == 0 {
            return Err(if self.segs.iter().any(Option::is_some) {
                VmPageError::InvalidBootTable
            } else {
                VmPageError::NoMemoryLoaded
            });
        }
        if self.segs[count..].iter().any(Option::is_some) {
            return Err(VmPageError::InvalidBootTable);
        }
        let ordered = self.segs[..count]
            .windows(2)
            .all(|w| matches!(w, [Some(a), Some(b)] if a.end <= b.start));
        if !ordered {
            return Err(VmPageError::InvalidBootTable);
        }
        Ok(count)
    }

    /// Takes `size` bytes, page aligned, from the highest directly mapped
    /// heap that can hold them.
    ///
    /// # Errors
    ///
    /// [`VmPageError::BootAllocExhausted`] when no heap is large enough.
    pub fn bootalloc(&mut self, size: usize) -> Result<PhysAddr, VmPageError> {
        let bytes = (size as u64)
            .checked_add(PAGE_SIZE - 1)
            .ok_or(VmPageError::BootAllocExhausted(size))?
            & !(PAGE_SIZE - 1);
        let loaded = self.segs.iter().take_while(|s| s.is_some()).count();
        let top = Selector::DirectMap.index().min(loaded.saturating_sub(1));

        for slot in self.segs[..loaded.min(top + 1)].iter_mut().rev() {
            let Some(BootSegment {
                heap: Some((avail_start, avail_end)),
                ..
            }) = slot
            else {
                continue;
            };
            if bytes != 0 && avail_end.as_u64() - avail_start.as_u64() >= bytes {
                let pa = *avail_start;
                *avail_start = PhysAddr::new(pa.as_u64() + bytes);
                return Ok(pa);
            }
        }
        Err(VmPageError::BootAllocExhausted(size))
    }

    /// Builds the descriptor table and the engine.
    ///
    /// # Errors
    ///
    /// Invalid configuration, an invalid boot table, a segment below the
    /// minimum size, or more frames than the table can index.
    pub fn setup<E: VmEnv>(self, config: VmPageConfig, env: E) -> Result<VmPages<E>, VmPageError> {
        config.validate()?;
        let count = self.check_boot_segs()?;
        let boot: Vec<BootSegment> = self.segs[..count].iter().flatten().copied().collect();

        let mut total: usize = 0;
        let mut sizes = Vec::with_capacity(count);
        for (i, b) in boot.iter().enumerate() {
            let pages = usize::try_from(b.start.pages_until(b.end))
                .map_err(|_| VmPageError::TableTooLarge)?;
            let thresholds = Thresholds::compute(&config, i, pages)?;
            sizes.push((pages, thresholds));
            total = total.checked_add(pages).ok_or(VmPageError::TableTooLarge)?;
        }
        if !u32::try_from(total).is_ok_and(|t| t < NIL) {
            return Err(VmPageError::TableTooLarge);
        }

        let mut pages = Vec::with_capacity(total);
        let mut first_page: u32 = 0;
        let mut spans = Vec::with_capacity(count);
        for (seg_index, b) in (0u8..).zip(&boot) {
            spans.push(Span {
                start: b.start,
                end: b.end,
                first_page,
            });
            let mut pa = b.start;
            while pa < b.end {
                pages.push(Page::new(first_page, seg_index, pa));
                first_page += 1;
                pa = pa.add_pages(1);
            }
        }
        let pages = pages.into_boxed_slice();

        let mut segments = Vec::with_capacity(count);
        let layout = boot.iter().zip(&spans).zip(&sizes).enumerate();
        for (i, ((b, span), (nr_pages, thresholds))) in layout {
            let (avail_start, avail_end) = b.heap.unwrap_or((b.start, b.start));
            let heap_pages = usize::try_from(avail_start.pages_until(avail_end))
                .map_err(|_| VmPageError::TableTooLarge)?;
            let geometry = PoolGeometry::compute(&config, *nr_pages);
            let seg = Segment::new(
                i,
                *span,
                *nr_pages,
                nr_pages - heap_pages,
                *thresholds,
                geometry,
                config.max_cpus,
            );

            {
                let mut st = seg.lock();
                let mut pa = avail_start;
                while pa < avail_end {
                    let idx = span.index_of(pa);
                    pages[idx as usize].set_kind(PageType::Free);
                    seg.free_to_buddy(&mut st, &pages, idx, 0);
                    pa = pa.add_pages(1);
                }
            }

            log::info!(
                "vm_page: segment {i}: {}..{} pages={} heap={} min={} low={} high={} pool={}/{}",
                b.start,
                b.end,
                nr_pages,
                heap_pages,
                thresholds.min,
                thresholds.low,
                thresholds.high,
                geometry.size,
                geometry.transfer
            );
            segments.push(seg);
        }

        log::info!(
            "vm_page: page table holds {total} descriptors ({} KiB)",
            total * core::mem::size_of::<Page>() / 1024
        );

        Ok(VmPages::from_parts(config, pages, segments.into_boxed_slice(), env))
    }
}
