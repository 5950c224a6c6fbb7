//! # Physical Page Engine
//!
//! This crate supplies physical page frames to the rest of the kernel and
//! takes them back under memory pressure. It owns one descriptor per frame
//! and knows nothing about virtual memory; page tables, memory objects,
//! pagers and threads are reached through the collaborator traits in
//! [`env`].
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Reclamation (evict / balance)              │
//! │    • Inactive-then-active candidate pulls           │
//! │    • Reactivation, reclaim or pageout               │
//! │    • Cross-segment page migration                   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │            Page-cache queues                        │
//! │    • Active / inactive per segment                  │
//! │    • Internal and external sub-lists                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │         Per-CPU pools → buddy allocator             │
//! │    • Order-0 fast path per processor                │
//! │    • Split on alloc, coalesce on free               │
//! │    • min / low / high backpressure                  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Segments
//!
//! Physical memory is split into up to four [`Segment`]s, indexed by
//! [`Selector`]: DMA, DMA32, direct-mapped and high memory. Only a prefix of
//! the table needs to exist. An allocation names the highest segment it can
//! use and falls back towards segment 0.
//!
//! Each segment derives three thresholds from its size (see
//! [`Thresholds`]):
//!
//! - at or below `low` free pages, pageout is started;
//! - at or below `min`, unprivileged allocation fails and the process-wide
//!   allocation pause is set;
//! - at or above `high`, the segment is *usable* again.
//!
//! The pause is only lifted by [`VmPages::check_usable`], once every segment
//! is usable. Unprivileged threads block in [`VmPages::wait`] meanwhile;
//! privileged threads never block, and failing them is fatal.
//!
//! ## Life Cycle
//!
//! ```ignore
//! use kernel_vm_page::*;
//!
//! let mut boot = Bootstrap::new();
//! boot.load(0, PhysAddr::new(0), PhysAddr::new(0x100_0000))?;
//! boot.load_heap(0, PhysAddr::new(0x10_0000), PhysAddr::new(0x100_0000))?;
//!
//! // `kernel_env` implements the collaborator traits
//! let vm = boot.setup(VmPageConfig::DEFAULT, kernel_env)?;
//! let page = vm.alloc(0, Selector::HighMem, PageType::Kernel).unwrap();
//! assert!(!page.is_free());
//! vm.free(page, 0);
//! ```
//!
//! ## Locking
//!
//! Spin locks from `kernel_sync` guard everything. The order is: pause
//! lock, page-queue lock, segment locks (lowest index first, via
//! [`kernel_sync::lock_pair`]). A CPU pool lock is taken before its
//! segment's lock. Memory-object locks are taken with a non-blocking
//! try-lock only.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod addr;
mod balance;
mod boot;
mod buddy;
mod config;
mod cpu_pool;
pub mod env;
mod error;
mod evict;
mod list;
mod page;
mod queue;
mod resident;
mod segment;
mod vm_pages;

pub use addr::PhysAddr;
pub use boot::Bootstrap;
pub use buddy::{MAX_ORDER, NR_FREE_LISTS};
pub use config::{PoolGeometry, Ratio, Thresholds, VmPageConfig};
pub use cpu_pool::CpuPoolStats;
pub use env::{MemoryObjects, Pageout, Pmap, Scheduler, VmEnv, WaitChannel};
pub use error::VmPageError;
pub use evict::EvictOutcome;
pub use kernel_sync::Preemption;
pub use page::{ORDER_UNLISTED, ObjectId, Page, PageBits, PageType};
pub use segment::{MAX_SEGMENTS, Segment, SegmentStats, Selector};
pub use vm_pages::VmPages;

/// Size of a page frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);
