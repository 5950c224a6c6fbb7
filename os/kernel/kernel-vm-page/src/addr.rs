//! Physical addresses.

use crate::{PAGE_SHIFT, PAGE_SIZE};
use core::fmt;

/// A physical byte address.
///
/// Thin wrapper so physical addresses are never confused with table
/// indices or page counts.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(u64);

impl PhysAddr {
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Rounds up to the next page boundary.
    #[inline]
    #[must_use]
    pub const fn page_round_up(self) -> Self {
        Self((self.0 + PAGE_SIZE - 1) & !(PAGE_SIZE - 1))
    }

    /// Page frame number.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// Address of the buddy of the block of `order` starting here.
    #[inline]
    #[must_use]
    pub const fn buddy(self, order: u8) -> Self {
        Self(self.0 ^ (PAGE_SIZE << order))
    }

    /// Start of the block of `order + 1` containing this block of `order`.
    #[inline]
    #[must_use]
    pub const fn merged(self, order: u8) -> Self {
        Self(self.0 & !(PAGE_SIZE << order))
    }

    /// Number of whole pages between `self` and a higher address.
    #[inline]
    #[must_use]
    pub const fn pages_until(self, end: Self) -> u64 {
        (end.0 - self.0) >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn add_pages(self, pages: u64) -> Self {
        Self(self.0 + (pages << PAGE_SHIFT))
    }
}

impl From<u64> for PhysAddr {
    #[inline]
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<PhysAddr> for u64 {
    #[inline]
    fn from(value: PhysAddr) -> Self {
        value.as_u64()
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012X}", self.0)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr(0x{:012X})", self.0)
    }
}
