//! SCSP queue of in-place-constructed typed objects.

use std::mem::MaybeUninit;
use std::sync::atomic::{
    AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::builder::QueueBuilder;
use crate::error::BuildError;
use crate::Core::alloc::{alloc_array, dealloc_array, BlockAllocator};
use crate::Core::cursor::AdvanceOnDrop;
use crate::Core::futex::WaitSignal;
use crate::Core::tagged::{advance_upto, count, free_span, next_slot, ring_indices};

pub(crate) struct Shared<T> {
    input_pos: CachePadded<AtomicUsize>,
    output_pos: CachePadded<AtomicUsize>,
    signal: WaitSignal,
    slots: *mut MaybeUninit<T>,
    ring_size: usize,
    allocator: Arc<dyn BlockAllocator>,
}

// SAFETY: the slot array is written only by the producer handle and read
// only by the consumer handle; visibility is ordered by the release store /
// acquire load pair on input_pos (construction) and output_pos (reuse).
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    unsafe fn slot(&self, index: usize) -> *mut MaybeUninit<T> {
        debug_assert!(index < self.ring_size);
        self.slots.add(index)
    }

    fn empty(&self) -> bool {
        self.input_pos.load(Relaxed) == self.output_pos.load(Relaxed)
    }

    fn count(&self) -> usize {
        count(
            self.output_pos.load(Relaxed),
            self.input_pos.load(Relaxed),
            self.ring_size,
        )
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let input = self.input_pos.load(Relaxed);
        let output = self.output_pos.load(Relaxed);
        for i in ring_indices(output, input, self.ring_size) {
            unsafe { (*self.slot(i)).assume_init_drop() };
        }
        dealloc_array(&self.allocator, self.slots, self.ring_size);
    }
}

/// SCSP object queue. [`split`](Self::split) it into its producer and
/// consumer halves before use.
pub struct ObjectQueueSCSP<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> ObjectQueueSCSP<T> {
    /// Queue with the given index-ring capacity and default options.
    pub fn with_capacity(capacity: usize) -> Result<Self, BuildError> {
        QueueBuilder::new().with_capacity(capacity).build_object_scsp()
    }

    pub(crate) fn build(b: &QueueBuilder) -> Result<Self, BuildError> {
        if b.capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        let ring_size = b.capacity + 1;
        let slots = alloc_array::<MaybeUninit<T>>(&b.allocator, ring_size)?;
        Ok(Self {
            shared: Arc::new(Shared {
                input_pos: CachePadded::new(AtomicUsize::new(0)),
                output_pos: CachePadded::new(AtomicUsize::new(0)),
                signal: WaitSignal::new(b.wait),
                slots,
                ring_size,
                allocator: b.allocator.clone(),
            }),
        })
    }

    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        (
            Producer {
                shared: self.shared.clone(),
                cached_output: 0,
            },
            Consumer {
                shared: self.shared,
                cached_input: 0,
            },
        )
    }
}

/// Producing half of an [`ObjectQueueSCSP`].
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    // Mirror of the consumer cursor, refreshed only when the ring looks full.
    cached_output: usize,
}

impl<T: Send> Producer<T> {
    /// Append one object. On a full ring the value is handed back.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        let input = shared.input_pos.load(Relaxed);
        let next = next_slot(input, shared.ring_size);
        if next == self.cached_output {
            self.cached_output = shared.output_pos.load(Acquire);
            if next == self.cached_output {
                return Err(value);
            }
        }
        unsafe { (*shared.slot(input)).write(value) };
        shared.input_pos.store(next, Release);
        shared.signal.notify_one();
        Ok(())
    }

    /// Expose the contiguous free prefix of the ring to `fill`, which
    /// returns how many slots it initialized. The span never crosses the
    /// wrap, so the caller always sees one linear run.
    ///
    /// # Safety
    /// `fill` must initialize the first `k` slots of the span it is given
    /// and return exactly that `k`.
    pub unsafe fn emplace_n(&mut self, fill: impl FnOnce(&mut [MaybeUninit<T>]) -> usize) -> usize {
        let shared = &*self.shared;
        let input = shared.input_pos.load(Relaxed);
        let mut avl = free_span(self.cached_output, input, shared.ring_size);
        if avl == 0 {
            self.cached_output = shared.output_pos.load(Acquire);
            avl = free_span(self.cached_output, input, shared.ring_size);
            if avl == 0 {
                return 0;
            }
        }
        let span = std::slice::from_raw_parts_mut(shared.slot(input), avl);
        let emplaced = fill(span);
        debug_assert!(emplaced <= avl);
        let next = input + emplaced;
        let next = if next == shared.ring_size { 0 } else { next };
        shared.input_pos.store(next, Release);
        match emplaced {
            0 => {}
            1 => shared.signal.notify_one(),
            _ => shared.signal.notify_all(),
        }
        emplaced
    }

    /// Append objects from `iter` until the ring's linear free span runs
    /// out. Returns how many were taken.
    pub fn push_iter(&mut self, iter: impl IntoIterator<Item = T>) -> usize {
        let mut iter = iter.into_iter();
        unsafe {
            self.emplace_n(|span| {
                let mut n = 0;
                for slot in span.iter_mut() {
                    match iter.next() {
                        Some(value) => {
                            slot.write(value);
                            n += 1;
                        }
                        None => break,
                    }
                }
                n
            })
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring_size - 1
    }

    pub fn empty(&self) -> bool {
        self.shared.empty()
    }

    pub fn count(&self) -> usize {
        self.shared.count()
    }
}

/// Consuming half of an [`ObjectQueueSCSP`].
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    // Mirror of the producer cursor, refreshed only when the ring looks empty.
    cached_input: usize,
}

impl<T: Send> Consumer<T> {
    /// Take the oldest object, or `None` when the queue is empty.
    pub fn pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let output = shared.output_pos.load(Relaxed);
        if output == self.cached_input {
            self.cached_input = shared.input_pos.load(Acquire);
            if output == self.cached_input {
                return None;
            }
        }
        let value = unsafe { (*shared.slot(output)).assume_init_read() };
        shared.output_pos.store(next_slot(output, shared.ring_size), Release);
        Some(value)
    }

    /// Consume one object through `f`. Returns false when empty.
    pub fn consume(&mut self, f: impl FnOnce(T)) -> bool {
        match self.pop() {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Drain everything currently published. The cursor advance is published
    /// once at the end, and is published even if `f` unwinds.
    pub fn consume_all(&mut self, mut f: impl FnMut(T)) -> usize {
        let shared = &*self.shared;
        let input = shared.input_pos.load(Acquire);
        let output = shared.output_pos.load(Relaxed);
        self.cached_input = input;
        let _advance = AdvanceOnDrop {
            cursor: &shared.output_pos,
            to: input,
        };
        let mut consumed = 0;
        for i in ring_indices(output, input, shared.ring_size) {
            let value = unsafe { (*shared.slot(i)).assume_init_read() };
            consumed += 1;
            f(value);
        }
        consumed
    }

    /// Drain at most `n` objects.
    pub fn consume_n(&mut self, mut f: impl FnMut(T), n: usize) -> usize {
        let shared = &*self.shared;
        let output = shared.output_pos.load(Relaxed);
        let input = shared.input_pos.load(Acquire);
        self.cached_input = input;
        let next = advance_upto(output, input, shared.ring_size, n);
        let _advance = AdvanceOnDrop {
            cursor: &shared.output_pos,
            to: next,
        };
        let mut consumed = 0;
        for i in ring_indices(output, next, shared.ring_size) {
            let value = unsafe { (*shared.slot(i)).assume_init_read() };
            consumed += 1;
            f(value);
        }
        consumed
    }

    /// Block until the queue is non-empty. Advisory: only meaningful on
    /// queues built with the wait capability, otherwise degrades to a yield
    /// loop.
    pub fn wait(&self) {
        let shared = &*self.shared;
        let output = shared.output_pos.load(Relaxed);
        shared.signal.wait_until(|| shared.input_pos.load(Relaxed) != output);
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring_size - 1
    }

    pub fn empty(&self) -> bool {
        self.shared.empty()
    }

    pub fn count(&self) -> usize {
        self.shared.count()
    }
}
