mod common;

use common::*;
use kernel_vm_page::{PageType, Selector, VmPageConfig};
use std::sync::Barrier;
use std::thread;

const THREADS: usize = 4;

fn config() -> VmPageConfig {
    small_config().with_max_cpus(THREADS)
}

#[test]
fn parallel_alloc_free_leaves_the_free_lists_intact() {
    let vm = build(&[(0, 256)], config());
    vm.drain_cpu_pools();
    let before = vm.free_list_snapshot(0).unwrap();
    let start = Barrier::new(THREADS);

    thread::scope(|s| {
        for t in 0..THREADS {
            let vm = &vm;
            let start = &start;
            s.spawn(move || {
                set_cpu(t);
                start.wait();
                let mut seed = 0x9E37_79B9_u32 ^ (t as u32 + 1);
                let mut held = Vec::new();
                for _ in 0..2_000 {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    if held.len() < 8 && (held.is_empty() || seed % 3 != 0) {
                        let order = (seed % 3) as u8;
                        let page = vm.alloc(order, Selector::Dma, PageType::Kernel).unwrap();
                        held.push((page, order));
                    } else if let Some((page, order)) = held.pop() {
                        vm.free(page, order);
                    }
                }
                for (page, order) in held {
                    vm.free(page, order);
                }
                assert_eq!(pin_depth(), 0);
            });
        }
    });

    assert!(!vm.pause_active());
    vm.drain_cpu_pools();
    assert_eq!(vm.free_list_snapshot(0).unwrap(), before);
    assert_consistent(&vm);
}

#[test]
fn queue_transitions_race_with_refill() {
    let vm = build(&[(0, 256)], config());
    let mut per_thread = Vec::new();
    for t in 0..THREADS {
        let obj = object(t as u32 + 1);
        let pages: Vec<_> = (0..16)
            .map(|i| {
                let page = vm.alloc(0, Selector::Dma, PageType::Kernel).unwrap();
                vm.insert(page, obj, i * 0x1000, t % 2 == 0);
                vm.activate(page).unwrap();
                page
            })
            .collect();
        per_thread.push(pages);
    }

    thread::scope(|s| {
        for (t, pages) in per_thread.iter().enumerate() {
            let vm = &vm;
            s.spawn(move || {
                set_cpu(t);
                for round in 0..200 {
                    for (i, page) in pages.iter().enumerate() {
                        match (round + i) % 4 {
                            0 => vm.deactivate(page).unwrap(),
                            1 => vm.activate(page).unwrap(),
                            2 => {
                                vm.wire(page);
                                vm.unwire(page);
                            }
                            _ => vm.set_reference(page, true),
                        }
                    }
                }
            });
        }
        s.spawn(|| {
            for _ in 0..500 {
                vm.refill_inactive();
            }
        });
    });

    let stats = vm.segment_stats(0).unwrap();
    assert_eq!(stats.active + stats.inactive, THREADS * 16);
    assert_eq!(stats.wired, 0);
    assert_eq!(vm.env().locked_objects(), 0);
    assert_consistent(&vm);

    vm.refill_inactive();
    let stats = vm.segment_stats(0).unwrap();
    assert!(stats.active <= (stats.active + stats.inactive) / 3);
}
