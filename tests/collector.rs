//! Collector lifecycle, configuration, and statistics tests.
//!
//! Drives the process-wide collector (`GC`) through the public `Gc<T>`
//! surface and observes its effects via `Collector::statistics`. These
//! tests never call `GC.shutdown()`: the singleton is shared by every test
//! in this binary, and shutting it down would break whichever other test
//! happens to be running concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use threefd_gc::{Configuration, GC, Gc, GcRootGuard, Result};

fn wait_for<F: Fn() -> bool>(predicate: F) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(predicate(), "condition did not become true within two seconds");
}

#[test_log::test]
fn default_configuration_matches_spec_defaults() {
    let config = Configuration::default();
    assert_eq!(config.msg_loop_sleep_ms, 100);
    assert_eq!(config.mem_blocks_pool_initial_size, 128);
    assert!((config.mem_blocks_pool_growing_factor - 1.0).abs() < f64::EPSILON);
    assert_eq!(config.sptr_objects_hash_table_initial_size_log2, 8);
    assert!((config.sptr_objects_hash_table_load_factor_threshold - 0.7).abs() < f64::EPSILON);
}

#[test_log::test]
fn global_collector_reports_its_configuration() {
    let config = GC.configuration();
    assert_eq!(config.msg_loop_sleep_ms, Configuration::default().msg_loop_sleep_ms);
}

#[test_log::test]
fn statistics_advance_after_an_allocation_and_a_drop() -> Result<()> {
    let before = GC.statistics()?.vertices_freed;

    {
        let _gc = Gc::try_new(12345_u64)?;
    }

    wait_for(|| GC.statistics().map(|s| s.vertices_freed > before).unwrap_or(false));
    Ok(())
}

/// Scenario S1: a single managed object, registered and then released,
/// runs its destructor exactly once.
#[test_log::test]
fn single_object_round_trip_scenario_s1() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);
    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let before = DROPS.load(Ordering::SeqCst);
    {
        let gc = Gc::new(Counted);
        assert_eq!(DROPS.load(Ordering::SeqCst), before);
        drop(gc);
    }
    wait_for(|| DROPS.load(Ordering::SeqCst) == before + 1);
}

/// Scenario S4: an object whose only root is never released must survive
/// at least `2 * msg_loop_sleep_ms`.
#[test_log::test]
fn root_kept_alive_observes_no_callback_scenario_s4() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);
    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let before = DROPS.load(Ordering::SeqCst);
    let gc = Gc::new(Counted);
    thread::sleep(Duration::from_millis(2 * GC.configuration().msg_loop_sleep_ms));
    assert_eq!(DROPS.load(Ordering::SeqCst), before, "root never released, object must survive");
    drop(gc);
    wait_for(|| DROPS.load(Ordering::SeqCst) == before + 1);
}

#[test_log::test]
fn clone_keeps_the_value_alive_until_every_clone_is_dropped() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);
    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let before = DROPS.load(Ordering::SeqCst);
    let a = Gc::new(Counted);
    let b = a.clone();
    drop(a);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(DROPS.load(Ordering::SeqCst), before, "second root clone keeps it alive");
    drop(b);
    wait_for(|| DROPS.load(Ordering::SeqCst) == before + 1);
}

#[test_log::test]
fn root_guard_shares_one_slot_across_clones() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);
    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let before = DROPS.load(Ordering::SeqCst);
    let guard = GcRootGuard::new(Gc::new(Counted));
    let guard2 = guard.clone();
    drop(guard);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(DROPS.load(Ordering::SeqCst), before, "shared guard keeps the slot registered");
    drop(guard2);
    wait_for(|| DROPS.load(Ordering::SeqCst) == before + 1);
}

#[test_log::test]
fn concurrent_reads_of_a_shared_root_are_safe() {
    let gc = Arc::new(Gc::new(0_u64));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let gc = Arc::clone(&gc);
            thread::spawn(move || {
                for _ in 0..1000 {
                    assert_eq!(**gc, 0);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
