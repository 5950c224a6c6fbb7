#![allow(dead_code)]

use kernel_vm_page::{
    Bootstrap, MemoryObjects, ObjectId, PAGE_SIZE, Page, Pageout, PhysAddr, Pmap, Preemption,
    Scheduler, VmPageConfig, VmPages, WaitChannel,
};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

thread_local! {
    static CPU: Cell<usize> = const { Cell::new(0) };
    static PRIVILEGED: Cell<bool> = const { Cell::new(false) };
    static PIN_DEPTH: Cell<u32> = const { Cell::new(0) };
}

pub fn set_cpu(cpu: usize) {
    CPU.with(|c| c.set(cpu));
}

pub fn set_privileged(privileged: bool) {
    PRIVILEGED.with(|p| p.set(privileged));
}

pub fn pin_depth() -> u32 {
    PIN_DEPTH.with(Cell::get)
}

#[derive(Debug, Default, Clone, Copy)]
struct PmapBits {
    referenced: bool,
    modified: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectInfo {
    pub internal: bool,
    pub alive: bool,
    pub default_pager: bool,
    /// `try_lock` always fails.
    pub contended: bool,
}

impl Default for ObjectInfo {
    fn default() -> Self {
        Self {
            internal: true,
            alive: true,
            default_pager: true,
            contended: false,
        }
    }
}

/// In-memory stand-in for pmap, objects, pageout and scheduler.
#[derive(Default)]
pub struct MockEnv {
    pmap: Mutex<HashMap<PhysAddr, PmapBits>>,
    objects: Mutex<HashMap<ObjectId, ObjectInfo>>,
    locked: Mutex<HashSet<ObjectId>>,
    pub unmapped: Mutex<Vec<PhysAddr>>,
    pub copies: Mutex<Vec<(PhysAddr, PhysAddr)>>,
    pub removed: Mutex<Vec<(ObjectId, u64)>>,
    pub replaced: Mutex<Vec<(ObjectId, u64, PhysAddr)>>,
    pub collected: Mutex<Vec<ObjectId>>,
    pub paged_out: Mutex<Vec<(PhysAddr, bool)>>,
    pub pageout_starts: AtomicUsize,
    pub wakeups: AtomicUsize,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
}

impl MockEnv {
    pub fn add_object(&self, object: ObjectId, info: ObjectInfo) {
        self.objects.lock().unwrap().insert(object, info);
    }

    fn info(&self, object: ObjectId) -> ObjectInfo {
        self.objects
            .lock()
            .unwrap()
            .get(&object)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_referenced(&self, pa: PhysAddr, referenced: bool) {
        self.pmap.lock().unwrap().entry(pa).or_default().referenced = referenced;
    }

    pub fn set_modified(&self, pa: PhysAddr, modified: bool) {
        self.pmap.lock().unwrap().entry(pa).or_default().modified = modified;
    }

    pub fn referenced(&self, pa: PhysAddr) -> bool {
        self.bits(pa).referenced
    }

    pub fn locked_objects(&self) -> usize {
        self.locked.lock().unwrap().len()
    }

    fn bits(&self, pa: PhysAddr) -> PmapBits {
        self.pmap.lock().unwrap().get(&pa).copied().unwrap_or_default()
    }
}

impl Pmap for MockEnv {
    fn remove_all_mappings(&self, pa: PhysAddr) {
        self.unmapped.lock().unwrap().push(pa);
    }

    fn is_modified(&self, pa: PhysAddr) -> bool {
        self.bits(pa).modified
    }

    fn clear_modify(&self, pa: PhysAddr) {
        self.set_modified(pa, false);
    }

    fn is_referenced(&self, pa: PhysAddr) -> bool {
        self.bits(pa).referenced
    }

    fn clear_reference(&self, pa: PhysAddr) {
        self.set_referenced(pa, false);
    }

    fn copy_page(&self, src: PhysAddr, dst: PhysAddr) {
        self.copies.lock().unwrap().push((src, dst));
    }
}

impl MemoryObjects for MockEnv {
    fn try_lock(&self, object: ObjectId) -> bool {
        if self.info(object).contended {
            return false;
        }
        self.locked.lock().unwrap().insert(object)
    }

    fn unlock(&self, object: ObjectId) {
        assert!(self.locked.lock().unwrap().remove(&object), "unlocking unlocked object");
    }

    fn is_internal(&self, object: ObjectId) -> bool {
        self.info(object).internal
    }

    fn is_alive(&self, object: ObjectId) -> bool {
        self.info(object).alive
    }

    fn has_default_pager(&self, object: ObjectId) -> bool {
        self.info(object).default_pager
    }

    fn remove_page(&self, object: ObjectId, offset: u64) {
        self.removed.lock().unwrap().push((object, offset));
    }

    fn replace_page(&self, object: ObjectId, offset: u64, pa: PhysAddr) {
        self.replaced.lock().unwrap().push((object, offset, pa));
    }

    fn collect(&self, object: ObjectId) {
        self.collected.lock().unwrap().push(object);
    }
}

impl Pageout for MockEnv {
    fn start(&self) {
        self.pageout_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn page_out(&self, page: &Page, double_paging: bool) {
        assert!(page.bits().busy());
        self.paged_out
            .lock()
            .unwrap()
            .push((page.phys_addr(), double_paging));
    }
}

impl Preemption for MockEnv {
    fn disable(&self) {
        PIN_DEPTH.with(|d| d.set(d.get() + 1));
    }

    fn enable(&self) {
        PIN_DEPTH.with(|d| {
            assert!(d.get() > 0, "unbalanced preemption enable");
            d.set(d.get() - 1);
        });
    }

    fn current_cpu(&self) -> usize {
        CPU.with(Cell::get)
    }
}

impl Scheduler for MockEnv {
    fn is_privileged(&self) -> bool {
        PRIVILEGED.with(Cell::get)
    }

    fn sleep_while(&self, _channel: WaitChannel, still_blocked: &dyn Fn() -> bool) {
        let mut guard = self.wait_lock.lock().unwrap();
        while still_blocked() {
            guard = self.wait_cv.wait(guard).unwrap();
        }
    }

    fn wakeup(&self, _channel: WaitChannel) {
        let _guard = self.wait_lock.lock().unwrap();
        self.wakeups.fetch_add(1, Ordering::SeqCst);
        self.wait_cv.notify_all();
    }
}

pub fn object(id: u32) -> ObjectId {
    ObjectId::new(NonZeroU32::new(id).unwrap())
}

pub const fn pages(n: u64) -> u64 {
    n * PAGE_SIZE
}

pub fn pa(n: u64) -> PhysAddr {
    PhysAddr::new(pages(n))
}

/// Thresholds 8/12/16 on segments of at least 32 pages; pools of one page
/// below 1024 pages.
pub fn small_config() -> VmPageConfig {
    VmPageConfig::DEFAULT
        .with_floors(8, 12, 16)
        .with_segment_min_pages(32)
}

/// Engine over `segments` given as page ranges, each fully usable.
pub fn build(segments: &[(u64, u64)], config: VmPageConfig) -> VmPages<MockEnv> {
    let mut boot = Bootstrap::new();
    for (i, &(start, end)) in segments.iter().enumerate() {
        boot.load(i, pa(start), pa(end)).unwrap();
        boot.load_heap(i, pa(start), pa(end)).unwrap();
    }
    boot.setup(config, MockEnv::default()).unwrap()
}

/// Asserts that every page is on at most one of free / active / inactive
/// and that the per-segment counters add up.
pub fn assert_consistent(vm: &VmPages<MockEnv>) {
    for seg in 0..vm.segment_count() {
        let s = vm.segment_stats(seg).unwrap();
        assert_eq!(
            s.free + s.pooled + s.active + s.inactive + s.wired + s.reserved,
            s.pages,
            "conservation broken in segment {seg}: {s:?}"
        );
    }

    let mut index = 0;
    while let Some(page) = vm.page(index) {
        let bits = page.bits();
        let memberships = [page.is_free(), bits.active(), bits.inactive()]
            .into_iter()
            .filter(|&m| m)
            .count();
        assert!(memberships <= 1, "page in several sets: {page:?}");
        if bits.active() || bits.inactive() {
            assert!(page.object().is_some(), "queued page without object: {page:?}");
        }
        if page.is_free() {
            assert!(page.object().is_none(), "free page with object: {page:?}");
        }
        index += 1;
    }
}
