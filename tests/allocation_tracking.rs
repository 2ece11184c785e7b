// Allocation tracking for the queue hot paths.
//
// Note: Tests using dhat are marked with #[serial_test::serial] because
// dhat only allows one profiler to run at a time. They will run sequentially.
//
// # Run all allocation tracking tests
// cargo test --test allocation_tracking -- --nocapture

use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;

use ringq::{BlockAllocator, InvokeOnceDNI, ObjectQueueSCSP, QueueBuilder, SystemAlloc};

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// Forwarding allocator that counts every block handed out and back.
#[derive(Default)]
struct CountingAlloc {
    inner: SystemAlloc,
    allocs: AtomicUsize,
    deallocs: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl BlockAllocator for CountingAlloc {
    fn allocate_bytes(&self, size: usize, align: usize) -> *mut u8 {
        let ptr = self.inner.allocate_bytes(size, align);
        if !ptr.is_null() {
            self.allocs.fetch_add(1, SeqCst);
            self.live_bytes.fetch_add(size, SeqCst);
        }
        ptr
    }

    fn deallocate_bytes(&self, ptr: *mut u8, size: usize, align: usize) {
        self.deallocs.fetch_add(1, SeqCst);
        self.live_bytes.fetch_sub(size, SeqCst);
        self.inner.deallocate_bytes(ptr, size, align);
    }
}

#[test]
#[serial_test::serial]
fn object_queue_construction_is_the_only_allocation() {
    let tracker = Arc::new(CountingAlloc::default());
    {
        let (mut tx, mut rx) = QueueBuilder::new()
            .with_capacity(1024)
            .with_allocator(tracker.clone())
            .build_object_scsp::<u64>()
            .unwrap()
            .split();

        let after_build = tracker.allocs.load(SeqCst);
        assert!(after_build >= 1);

        for i in 0..10_000u64 {
            while tx.push(i).is_err() {
                rx.pop();
            }
            rx.pop();
        }
        // The hot path never touched the allocator.
        assert_eq!(tracker.allocs.load(SeqCst), after_build);
    }
    assert_eq!(tracker.allocs.load(SeqCst), tracker.deallocs.load(SeqCst));
    assert_eq!(tracker.live_bytes.load(SeqCst), 0, "no leak after queue drop");
}

#[test]
#[serial_test::serial]
fn function_queue_returns_all_blocks() {
    let tracker = Arc::new(CountingAlloc::default());
    {
        let (mut tx, mut rx) = QueueBuilder::new()
            .with_capacity(64)
            .with_buffer_bytes(4096)
            .with_allocator(tracker.clone())
            .build_function_scsp::<(), (), InvokeOnceDNI>()
            .unwrap()
            .split();

        let after_build = tracker.allocs.load(SeqCst);
        for _ in 0..1_000 {
            let payload = [7u8; 32];
            tx.push(move || {
                let _ = payload;
            })
            .map_err(|_| ())
            .unwrap();
            assert!(rx.consume(|func| func.call(())));
        }
        assert_eq!(tracker.allocs.load(SeqCst), after_build);
    }
    assert_eq!(tracker.allocs.load(SeqCst), tracker.deallocs.load(SeqCst));
    assert_eq!(tracker.live_bytes.load(SeqCst), 0);
}

#[test]
#[serial_test::serial]
fn scsp_hot_path_is_heap_silent_under_dhat() {
    let _profiler = dhat::Profiler::builder().testing().build();

    let (mut tx, mut rx) = ObjectQueueSCSP::<u64>::with_capacity(1024).unwrap().split();

    let before = dhat::HeapStats::get();
    for i in 0..10_000u64 {
        while tx.push(i).is_err() {
            rx.pop();
        }
        rx.pop();
    }
    let after = dhat::HeapStats::get();

    println!(
        "heap blocks before: {}, after: {}",
        before.total_blocks, after.total_blocks
    );
    assert_eq!(before.total_blocks, after.total_blocks);
}

#[test]
#[serial_test::serial]
fn buffer_queue_hot_path_is_heap_silent_under_dhat() {
    let _profiler = dhat::Profiler::builder().testing().build();

    let (mut tx, mut rx) = QueueBuilder::new()
        .with_capacity(64)
        .with_buffer_bytes(64 * 1024)
        .build_buffer_scsp()
        .unwrap()
        .split();

    let before = dhat::HeapStats::get();
    for i in 0..10_000usize {
        let len = i % 128 + 1;
        while tx.allocate_and_release(len, 8, |buf| buf.len()).is_none() {
            rx.consume(|_| {});
        }
        rx.consume(|_| {});
    }
    let after = dhat::HeapStats::get();
    assert_eq!(before.total_blocks, after.total_blocks);
}

#[test]
#[serial_test::serial]
fn memory_stays_flat_across_sustained_traffic() {
    use memory_stats::memory_stats;

    let (mut tx, mut rx) = ObjectQueueSCSP::<u64>::with_capacity(4096).unwrap().split();

    let before = memory_stats();
    for i in 0..100_000u64 {
        while tx.push(i).is_err() {
            rx.pop();
        }
        rx.pop();
    }
    let after = memory_stats();

    if let (Some(before), Some(after)) = (before, after) {
        let delta = after.physical_mem as i64 - before.physical_mem as i64;
        println!("physical memory delta: {delta} bytes");
        // Allow noise from the OS; the ring itself must not grow.
        assert!(delta.abs() < 4 * 1024 * 1024);
    }
}
