//! Engine tunables and the per-segment values derived from them.
//!
//! Everything here is `const`: a kernel can build its configuration in a
//! `static` and have it checked at compile time.

use crate::VmPageError;

/// `num / denom` applied to a page count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    pub num: usize,
    pub denom: usize,
}

impl Ratio {
    #[must_use]
    pub const fn new(num: usize, denom: usize) -> Self {
        Self { num, denom }
    }

    /// `pages * num / denom`, rounded down.
    #[inline]
    #[must_use]
    pub const fn of(self, pages: usize) -> usize {
        pages * self.num / self.denom
    }
}

/// Tunables of the page engine.
///
/// [`VmPageConfig::DEFAULT`] carries the values the engine was designed
/// around; tests and small machines override individual fields with the
/// `with_*` builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmPageConfig {
    /// Fraction of a segment below which only privileged threads allocate.
    pub min_ratio: Ratio,
    /// Fraction of a segment below which pageout is started.
    pub low_ratio: Ratio,
    /// Fraction of a segment at which it is usable again.
    pub high_ratio: Ratio,
    /// Lower bounds in pages for the three thresholds, so small segments
    /// still keep a usable reserve.
    pub min_floor: usize,
    pub low_floor: usize,
    pub high_floor: usize,
    /// Segments smaller than this are rejected at setup.
    pub segment_min_pages: usize,
    /// One pool slot per this many segment pages.
    pub cpu_pool_ratio: usize,
    /// Upper bound on the pool size, whatever the segment size.
    pub cpu_pool_max_size: usize,
    /// Pool transfer size is `ceil(size / cpu_pool_transfer_ratio)`.
    pub cpu_pool_transfer_ratio: usize,
    /// Share of cached pages allowed on the active queue before
    /// `refill_inactive` starts deactivating.
    pub high_active: Ratio,
    /// Number of per-CPU pools created per segment.
    pub max_cpus: usize,
}

impl VmPageConfig {
    /// Stock tuning: 5/6/10 percent thresholds with 500/600/1000 page
    /// floors, pools of one page per 1024 capped at 128.
    pub const DEFAULT: Self = Self {
        min_ratio: Ratio::new(5, 100),
        low_ratio: Ratio::new(6, 100),
        high_ratio: Ratio::new(10, 100),
        min_floor: 500,
        low_floor: 600,
        high_floor: 1000,
        segment_min_pages: 2000,
        cpu_pool_ratio: 1024,
        cpu_pool_max_size: 128,
        cpu_pool_transfer_ratio: 2,
        high_active: Ratio::new(1, 3),
        max_cpus: 32,
    };

    /// Replaces the page floors of `min`, `low` and `high`.
    #[must_use]
    pub const fn with_floors(mut self, min: usize, low: usize, high: usize) -> Self {
        self.min_floor = min;
        self.low_floor = low;
        self.high_floor = high;
        self
    }

    /// Replaces the fractions of a segment used for the thresholds.
    #[must_use]
    pub const fn with_ratios(mut self, min: Ratio, low: Ratio, high: Ratio) -> Self {
        self.min_ratio = min;
        self.low_ratio = low;
        self.high_ratio = high;
        self
    }

    #[must_use]
    pub const fn with_segment_min_pages(mut self, pages: usize) -> Self {
        self.segment_min_pages = pages;
        self
    }

    /// Pool sizing: one slot per `ratio` pages, at most `max_size` slots,
    /// batches of `ceil(size / transfer_ratio)`.
    #[must_use]
    pub const fn with_cpu_pool(
        mut self,
        ratio: usize,
        max_size: usize,
        transfer_ratio: usize,
    ) -> Self {
        self.cpu_pool_ratio = ratio;
        self.cpu_pool_max_size = max_size;
        self.cpu_pool_transfer_ratio = transfer_ratio;
        self
    }

    #[must_use]
    pub const fn with_high_active(mut self, ratio: Ratio) -> Self {
        self.high_active = ratio;
        self
    }

    #[must_use]
    pub const fn with_max_cpus(mut self, cpus: usize) -> Self {
        self.max_cpus = cpus;
        self
    }

    /// Rejects values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// [`VmPageError::InvalidConfig`] naming the offending field.
    pub const fn validate(&self) -> Result<(), VmPageError> {
        if self.min_ratio.denom == 0
            || self.low_ratio.denom == 0
            || self.high_ratio.denom == 0
            || self.high_active.denom == 0
        {
            return Err(VmPageError::InvalidConfig("ratio with zero denominator"));
        }
        if self.high_active.num > self.high_active.denom {
            return Err(VmPageError::InvalidConfig("high_active above one"));
        }
        if self.min_floor == 0 {
            return Err(VmPageError::InvalidConfig("min_floor must be non-zero"));
        }
        if self.cpu_pool_ratio == 0
            || self.cpu_pool_max_size == 0
            || self.cpu_pool_transfer_ratio == 0
        {
            return Err(VmPageError::InvalidConfig("cpu pool geometry"));
        }
        if self.max_cpus == 0 {
            return Err(VmPageError::InvalidConfig("max_cpus must be non-zero"));
        }
        if self.segment_min_pages <= self.high_floor {
            return Err(VmPageError::InvalidConfig("segment_min_pages must exceed high_floor"));
        }
        Ok(())
    }
}

impl Default for VmPageConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const _: () = assert!(VmPageConfig::DEFAULT.validate().is_ok());
const _: () = assert!(VmPageConfig::DEFAULT.min_floor < VmPageConfig::DEFAULT.low_floor);
const _: () = assert!(VmPageConfig::DEFAULT.low_floor < VmPageConfig::DEFAULT.high_floor);

/// Free-page thresholds of one segment, in pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Below this only privileged threads may allocate.
    pub min: usize,
    /// At or below this pageout is requested.
    pub low: usize,
    /// At or above this the segment is usable.
    pub high: usize,
}

impl Thresholds {
    /// Derives the thresholds of segment `seg` holding `pages` pages.
    ///
    /// The result is always strictly increasing, whatever the ratios.
    ///
    /// # Errors
    ///
    /// [`VmPageError::SegmentTooSmall`] below `segment_min_pages`.
    pub const fn compute(
        config: &VmPageConfig,
        seg: usize,
        pages: usize,
    ) -> Result<Self, VmPageError> {
        if pages < config.segment_min_pages {
            return Err(VmPageError::SegmentTooSmall {
                seg,
                pages,
                min: config.segment_min_pages,
            });
        }

        let mut min = config.min_ratio.of(pages);
        if min < config.min_floor {
            min = config.min_floor;
        }
        let mut low = config.low_ratio.of(pages);
        if low < config.low_floor {
            low = config.low_floor;
        }
        if low <= min {
            low = min + 1;
        }
        let mut high = config.high_ratio.of(pages);
        if high < config.high_floor {
            high = config.high_floor;
        }
        if high <= low {
            high = low + 1;
        }

        Ok(Self { min, low, high })
    }
}

/// Size and batch transfer count of each CPU pool of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry {
    /// Pages a pool holds at most.
    pub size: usize,
    /// Pages moved per refill or drain.
    pub transfer: usize,
}

impl PoolGeometry {
    /// Geometry for a segment of `pages` pages, never smaller than one.
    #[must_use]
    pub const fn compute(config: &VmPageConfig, pages: usize) -> Self {
        let mut size = pages / config.cpu_pool_ratio;
        if size == 0 {
            size = 1;
        } else if size > config.cpu_pool_max_size {
            size = config.cpu_pool_max_size;
        }
        let transfer = size.div_ceil(config.cpu_pool_transfer_ratio);
        Self { size, transfer }
    }
}
