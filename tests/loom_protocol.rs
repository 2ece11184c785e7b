// Loom-based exhaustive interleaving tests for the two cursor protocols.
//
// Loom swaps in its own atomics, so these tests drive simplified models of
// the production algorithms (the SCSP mirror-free core and the tagged MCSP
// reservation protocol) rebuilt over loom primitives, the same orderings in
// the same places.
//
// Keep ring sizes and message counts tiny: loom explores exponentially many
// interleavings.

use std::mem::MaybeUninit;

use loom::cell::UnsafeCell;
use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;

const TAG_BITS: u32 = 16;
const TAG_MASK: u64 = (1 << TAG_BITS) - 1;

fn tag(pos: u64) -> u64 {
    pos & TAG_MASK
}

fn value(pos: u64) -> usize {
    (pos >> TAG_BITS) as usize
}

fn tagged(value: usize, tag: u64) -> u64 {
    ((value as u64) << TAG_BITS) | (tag & TAG_MASK)
}

fn is_empty(op: u64, ip: u64) -> bool {
    tag(ip) < tag(op) || value(op) == value(ip)
}

fn alloc_slots<T>(ring_size: usize) -> Vec<UnsafeCell<MaybeUninit<T>>> {
    (0..ring_size).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect()
}

// ============================================================================
// SCSP model: untagged cursors, release publish / acquire observe
// ============================================================================

struct ScspModel {
    input_pos: AtomicU64,
    output_pos: AtomicU64,
    ring_size: usize,
    slots: Vec<UnsafeCell<MaybeUninit<u64>>>,
}

unsafe impl Send for ScspModel {}
unsafe impl Sync for ScspModel {}

impl ScspModel {
    fn new(ring_size: usize) -> Self {
        Self {
            input_pos: AtomicU64::new(0),
            output_pos: AtomicU64::new(0),
            ring_size,
            slots: alloc_slots(ring_size),
        }
    }

    fn push(&self, v: u64) -> bool {
        let input = self.input_pos.load(Ordering::Relaxed) as usize;
        let next = (input + 1) % self.ring_size;
        if next == self.output_pos.load(Ordering::Acquire) as usize {
            return false;
        }
        self.slots[input].with_mut(|ptr| unsafe { (*ptr).write(v) });
        self.input_pos.store(next as u64, Ordering::Release);
        true
    }

    fn pop(&self) -> Option<u64> {
        let output = self.output_pos.load(Ordering::Relaxed) as usize;
        if output == self.input_pos.load(Ordering::Acquire) as usize {
            return None;
        }
        let v = self.slots[output].with(|ptr| unsafe { (*ptr).assume_init_read() });
        self.output_pos
            .store(((output + 1) % self.ring_size) as u64, Ordering::Release);
        Some(v)
    }
}

#[test]
fn loom_scsp_fifo_and_no_torn_reads() {
    loom::model(|| {
        let ring = Arc::new(ScspModel::new(3));

        let producer = {
            let ring = ring.clone();
            loom::thread::spawn(move || {
                for v in 1..=2u64 {
                    while !ring.push(v) {
                        loom::thread::yield_now();
                    }
                }
            })
        };

        let mut got = Vec::new();
        while got.len() < 2 {
            match ring.pop() {
                Some(v) => got.push(v),
                None => loom::thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert_eq!(got, vec![1, 2]);
    });
}

// ============================================================================
// MCSP model: tagged publish, CAS reservation with tag re-sync
// ============================================================================

struct McspModel {
    input_pos: AtomicU64,
    output_pos: AtomicU64,
    ring_size: usize,
    slots: Vec<UnsafeCell<MaybeUninit<u64>>>,
}

unsafe impl Send for McspModel {}
unsafe impl Sync for McspModel {}

impl McspModel {
    fn new(ring_size: usize) -> Self {
        Self {
            input_pos: AtomicU64::new(0),
            output_pos: AtomicU64::new(0),
            ring_size,
            slots: alloc_slots(ring_size),
        }
    }

    fn publish(&self, v: u64) -> bool {
        let pos = self.input_pos.load(Ordering::Relaxed);
        let input = value(pos);
        let next = (input + 1) % self.ring_size;
        if next == value(self.output_pos.load(Ordering::Acquire)) {
            return false;
        }
        self.slots[input].with_mut(|ptr| unsafe { (*ptr).write(v) });
        let published = tagged(next, tag(pos) + 1);
        self.input_pos.store(published, Ordering::Release);
        if tag(published) == 0 {
            self.output_pos.fetch_and(!TAG_MASK, Ordering::AcqRel);
        }
        true
    }

    fn reserve_pop(&self) -> Option<u64> {
        let mut op = self.output_pos.load(Ordering::Relaxed);
        loop {
            let ip = self.input_pos.load(Ordering::Acquire);
            if is_empty(op, ip) {
                return None;
            }
            let next = (value(op) + 1) % self.ring_size;
            match self.output_pos.compare_exchange_weak(
                op,
                tagged(next, tag(ip)),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let v = self.slots[value(op)].with(|ptr| unsafe { (*ptr).assume_init_read() });
                    return Some(v);
                }
                Err(seen) => op = seen,
            }
        }
    }
}

#[test]
fn loom_mcsp_each_slot_consumed_exactly_once() {
    loom::model(|| {
        let ring = Arc::new(McspModel::new(3));
        assert!(ring.publish(1));
        assert!(ring.publish(2));

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let ring = ring.clone();
                loom::thread::spawn(move || {
                    let mut got = Vec::new();
                    loop {
                        match ring.reserve_pop() {
                            Some(v) => got.push(v),
                            None => break,
                        }
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<u64> = consumers
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        // Between the two consumers, both values observed exactly once even
        // though either may have drained both or bailed out empty.
        assert_eq!(all, vec![1, 2]);
    });
}

#[test]
fn loom_mcsp_publish_races_reservation() {
    loom::model(|| {
        let ring = Arc::new(McspModel::new(3));

        let producer = {
            let ring = ring.clone();
            loom::thread::spawn(move || {
                for v in 1..=2u64 {
                    while !ring.publish(v) {
                        loom::thread::yield_now();
                    }
                }
            })
        };

        let consumer = {
            let ring = ring.clone();
            loom::thread::spawn(move || {
                let mut got = Vec::new();
                while got.len() < 2 {
                    match ring.reserve_pop() {
                        Some(v) => got.push(v),
                        None => loom::thread::yield_now(),
                    }
                }
                got
            })
        };

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), vec![1, 2]);
    });
}
