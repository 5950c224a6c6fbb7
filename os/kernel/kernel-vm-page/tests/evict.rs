mod common;

use common::*;
use kernel_vm_page::{EvictOutcome, ObjectId, Page, PageType, Selector, VmPages};

fn cached<'a>(vm: &'a VmPages<MockEnv>, obj: ObjectId, offset: u64, external: bool) -> &'a Page {
    let page = vm.alloc(0, Selector::Dma, PageType::Kernel).unwrap();
    vm.insert(page, obj, offset, external);
    vm.deactivate(page).unwrap();
    page
}

/// Allocates until the allocation pause kicks in.
fn pause(vm: &VmPages<MockEnv>) {
    while vm.alloc(0, Selector::Dma, PageType::Kernel).is_some() {}
    assert!(vm.pause_active());
}

#[test]
fn referenced_inactive_page_is_reactivated_not_reclaimed() {
    let vm = build(&[(0, 64)], small_config());
    let obj = object(1);
    let referenced = cached(&vm, obj, 0, false);
    let clean = cached(&vm, obj, 0x1000, false);
    vm.env().set_referenced(referenced.phys_addr(), true);

    let outcome = vm.evict(false);
    assert_eq!(outcome, EvictOutcome { evicted: true, should_wait: false });

    assert!(referenced.bits().active());
    assert!(referenced.bits().reference());
    assert_eq!(referenced.object(), Some(obj));

    assert!(clean.is_free());
    assert_eq!(*vm.env().removed.lock().unwrap(), [(obj, 0x1000)]);
    assert_eq!(*vm.env().collected.lock().unwrap(), [obj]);
    assert!(vm.env().paged_out.lock().unwrap().is_empty());
    assert_eq!(vm.env().locked_objects(), 0);

    let s = vm.segment_stats(0).unwrap();
    assert_eq!((s.active, s.inactive), (1, 0));
}

#[test]
fn dirty_internal_page_is_paged_out_without_double_paging() {
    let vm = build(&[(0, 64)], small_config());
    let dirty = cached(&vm, object(2), 0, false);
    vm.set_dirty(dirty, true);
    pause(&vm);

    // external-only finds nothing and widens to internal pages
    let outcome = vm.evict(true);
    assert_eq!(outcome, EvictOutcome { evicted: true, should_wait: true });

    assert_eq!(*vm.env().paged_out.lock().unwrap(), [(dirty.phys_addr(), false)]);
    let bits = dirty.bits();
    assert!(bits.laundry() && bits.busy() && !bits.external_laundry());
    assert!(!bits.queued());
    assert_eq!(vm.laundry_count(), 1);
    assert_eq!(vm.external_laundry_count(), 0);
    assert_eq!(vm.env().locked_objects(), 0);

    vm.laundry_done(dirty);
    assert!(!dirty.bits().busy());
    assert_eq!(vm.laundry_count(), 0);
}

#[test]
fn external_pager_page_is_double_paged_while_paused() {
    let vm = build(&[(0, 64)], small_config());
    let obj = object(3);
    vm.env().add_object(
        obj,
        ObjectInfo {
            internal: false,
            default_pager: false,
            ..ObjectInfo::default()
        },
    );
    let page = cached(&vm, obj, 0, true);
    vm.env().set_modified(page.phys_addr(), true);
    pause(&vm);

    let outcome = vm.evict(true);
    assert!(outcome.evicted);
    assert!(page.bits().dirty());
    assert!(page.bits().external_laundry());
    assert_eq!(*vm.env().paged_out.lock().unwrap(), [(page.phys_addr(), true)]);
    assert_eq!(vm.external_laundry_count(), 1);

    vm.laundry_done(page);
    assert_eq!((vm.laundry_count(), vm.external_laundry_count()), (0, 0));
}

#[test]
fn no_double_paging_without_pause() {
    let vm = build(&[(0, 64)], small_config());
    let obj = object(3);
    vm.env().add_object(
        obj,
        ObjectInfo {
            internal: false,
            default_pager: false,
            ..ObjectInfo::default()
        },
    );
    let page = cached(&vm, obj, 0, true);
    vm.set_dirty(page, true);

    assert!(vm.evict(true).evicted);
    assert_eq!(*vm.env().paged_out.lock().unwrap(), [(page.phys_addr(), false)]);
}

#[test]
fn precious_pages_are_paged_out_even_when_clean() {
    let vm = build(&[(0, 64)], small_config());
    let page = cached(&vm, object(4), 0, false);
    vm.set_precious(page, true);

    let outcome = vm.evict(false);
    assert_eq!(outcome, EvictOutcome { evicted: true, should_wait: true });
    assert!(!page.is_free());
    assert_eq!(vm.env().paged_out.lock().unwrap().len(), 1);
}

#[test]
fn external_pages_go_first() {
    let vm = build(&[(0, 64)], small_config());
    let internal = cached(&vm, object(1), 0, false);
    let external = cached(&vm, object(2), 0, true);

    assert!(vm.evict(false).evicted);
    assert!(external.is_free());
    assert!(internal.bits().inactive());
}

#[test]
fn contended_objects_are_skipped() {
    let vm = build(&[(0, 64)], small_config());
    let busy_obj = object(5);
    vm.env().add_object(
        busy_obj,
        ObjectInfo {
            contended: true,
            ..ObjectInfo::default()
        },
    );
    let skipped = cached(&vm, busy_obj, 0, false);
    let taken = cached(&vm, object(6), 0, false);

    assert!(vm.evict(false).evicted);
    assert!(taken.is_free());
    assert!(skipped.bits().inactive());

    // only the contended page is left: the scan must give up
    let outcome = vm.evict(false);
    assert_eq!(outcome, EvictOutcome { evicted: false, should_wait: true });
    assert!(skipped.bits().inactive());
    assert_consistent(&vm);
}

#[test]
fn dying_objects_are_skipped() {
    let vm = build(&[(0, 64)], small_config());
    let obj = object(8);
    vm.env().add_object(
        obj,
        ObjectInfo {
            alive: false,
            ..ObjectInfo::default()
        },
    );
    let page = cached(&vm, obj, 0, true);

    assert!(!vm.evict(false).evicted);
    assert!(page.bits().inactive());
    assert_eq!(vm.env().locked_objects(), 0);
}

#[test]
fn active_pages_are_evicted_once_inactive_is_empty() {
    let vm = build(&[(0, 64)], small_config());
    let page = vm.alloc(0, Selector::Dma, PageType::Kernel).unwrap();
    vm.insert(page, object(9), 0, false);
    vm.activate(page).unwrap();
    vm.env().set_referenced(page.phys_addr(), true);

    // pulled from the active queue, so the reference does not save it
    assert!(vm.evict(false).evicted);
    assert!(page.is_free());
}

#[test]
fn nothing_to_evict_keeps_failing() {
    let vm = build(&[(0, 64)], small_config());
    for _ in 0..3 {
        assert_eq!(vm.evict(true), EvictOutcome { evicted: false, should_wait: true });
    }
}
