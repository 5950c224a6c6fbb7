//! Error handling.
//!
//! Recoverable failures (bad boot tables, lookups of unmanaged addresses,
//! misconfiguration) are [`VmPageError`]s. A broken engine invariant is
//! not recoverable and goes through `halt`.

use crate::PhysAddr;
use core::fmt;

/// Failures reported by bootstrap, configuration and lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmPageError {
    /// `setup` was called before any segment was loaded.
    #[error("no physical memory loaded")]
    NoMemoryLoaded,
    /// Loaded segments do not form a prefix of the table, or overlap.
    #[error("invalid boot segment table")]
    InvalidBootTable,
    /// Index at or above [`MAX_SEGMENTS`](crate::MAX_SEGMENTS).
    #[error("segment index {0} out of range")]
    InvalidSegmentIndex(usize),
    #[error("segment {0} already loaded")]
    AlreadyLoaded(usize),
    /// A heap was given for a segment that was never loaded.
    #[error("segment {0} not loaded")]
    NotLoaded(usize),
    #[error("range {start}..{end} is empty or not page aligned")]
    InvalidRange { start: PhysAddr, end: PhysAddr },
    #[error("heap {start}..{end} outside segment {seg}")]
    HeapOutOfRange {
        seg: usize,
        start: PhysAddr,
        end: PhysAddr,
    },
    /// Fewer pages than the configured `segment_min_pages`.
    #[error("segment {seg} too small ({pages} pages, need {min})")]
    SegmentTooSmall { seg: usize, pages: usize, min: usize },
    /// More frames than a `u32` table index can address.
    #[error("descriptor table too large")]
    TableTooLarge,
    /// No heap can hold a `bootalloc` request of this many bytes.
    #[error("no physical memory available for {0} bytes of boot allocation")]
    BootAllocExhausted(usize),
    /// [`VmPageConfig::validate`](crate::VmPageConfig::validate) failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// No segment covers the address.
    #[error("address {0} not managed")]
    AddressNotManaged(PhysAddr),
    #[error("page {0} is not reserved")]
    NotReserved(PhysAddr),
    /// Queue operations need a page inserted into an object.
    #[error("page {0} has no owning object")]
    NotOwned(PhysAddr),
}

/// Reports a broken engine invariant and stops.
#[cold]
#[track_caller]
pub(crate) fn halt(args: fmt::Arguments<'_>) -> ! {
    log::error!("vm_page: {args}");
    panic!("vm_page: {args}");
}
