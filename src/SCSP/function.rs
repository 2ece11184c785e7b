//! SCSP queue of type-erased callables with a fixed call signature.
//!
//! Generic over the argument tuple `A`, the return type `R`, and the call
//! mode `M` (see [`crate::Core::function`]). Closure state lives in the byte
//! arena; each slot stores the object pointer plus monomorphized invoke and
//! destroy shims.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{
    AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::builder::QueueBuilder;
use crate::error::BuildError;
use crate::Core::alloc::{alloc_bytes, alloc_array, dealloc_array, BlockAllocator};
use crate::Core::arena::{Arena, ArenaCursors};
use crate::Core::cursor::AdvanceOnDrop;
use crate::Core::function::{callable_storage, write_callable, CallMode, FnSlot, Function, ModeShim};
use crate::Core::futex::WaitSignal;
use crate::Core::tagged::{advance_upto, count, next_slot, ring_indices};

pub(crate) struct Shared<A, R, M: CallMode> {
    input_pos: CachePadded<AtomicUsize>,
    output_pos: CachePadded<AtomicUsize>,
    signal: WaitSignal,
    slots: *mut MaybeUninit<FnSlot<A, R>>,
    ring_size: usize,
    arena: Arena,
    arena_align: usize,
    allocator: Arc<dyn BlockAllocator>,
    _mode: PhantomData<M>,
}

// SAFETY: slots and arena bytes are written only by the producer handle and
// consumed by the single consumer handle, ordered by the cursor
// release/acquire pairs. Callables are required to be Send at push.
unsafe impl<A, R, M: CallMode> Send for Shared<A, R, M> {}
unsafe impl<A, R, M: CallMode> Sync for Shared<A, R, M> {}

impl<A, R, M: CallMode> Shared<A, R, M> {
    #[inline]
    unsafe fn slot(&self, index: usize) -> *mut MaybeUninit<FnSlot<A, R>> {
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

impl<A, R, M: CallMode> Drop for Shared<A, R, M> {
    fn drop(&mut self) {
        if M::STORE_DROP {
            let input = self.input_pos.load(Relaxed);
            let output = self.output_pos.load(Relaxed);
            for i in ring_indices(output, input, self.ring_size) {
                unsafe { (*self.slot(i)).assume_init() }.destroy_residual();
            }
        }
        dealloc_array(&self.allocator, self.slots, self.ring_size);
        self.allocator
            .deallocate_bytes(self.arena.base(), self.arena.len(), self.arena_align);
    }
}

/// SCSP function queue. [`split`](Self::split) it into its producer and
/// consumer halves before use.
pub struct FunctionQueueSCSP<A, R, M: CallMode> {
    shared: Arc<Shared<A, R, M>>,
}

impl<A, R, M: CallMode> FunctionQueueSCSP<A, R, M> {
    /// Queue with the given slot capacity and arena size, default options.
    pub fn new(capacity: usize, buffer_bytes: usize) -> Result<Self, BuildError> {
        QueueBuilder::new()
            .with_capacity(capacity)
            .with_buffer_bytes(buffer_bytes)
            .build_function_scsp()
    }

    pub(crate) fn build(b: &QueueBuilder) -> Result<Self, BuildError> {
        b.validate_arena()?;
        let ring_size = b.capacity + 1;
        let slots = alloc_array::<MaybeUninit<FnSlot<A, R>>>(&b.allocator, ring_size)?;
        let base = match alloc_bytes(&b.allocator, b.buffer_bytes, b.buffer_align) {
            Ok(base) => base,
            Err(e) => {
                dealloc_array(&b.allocator, slots, ring_size);
                return Err(e);
            }
        };
        Ok(Self {
            shared: Arc::new(Shared {
                input_pos: CachePadded::new(AtomicUsize::new(0)),
                output_pos: CachePadded::new(AtomicUsize::new(0)),
                signal: WaitSignal::new(b.wait),
                slots,
                ring_size,
                arena: Arena::new(base, b.buffer_bytes),
                arena_align: b.buffer_align,
                allocator: b.allocator.clone(),
                _mode: PhantomData,
            }),
        })
    }

    pub fn split(self) -> (Producer<A, R, M>, Consumer<A, R, M>) {
        (
            Producer {
                shared: self.shared.clone(),
                cached_output: 0,
                cursors: ArenaCursors::default(),
            },
            Consumer {
                shared: self.shared,
                cached_input: 0,
            },
        )
    }
}

/// Producing half of a [`FunctionQueueSCSP`].
pub struct Producer<A, R, M: CallMode> {
    shared: Arc<Shared<A, R, M>>,
    cached_output: usize,
    cursors: ArenaCursors,
}

impl<A, R, M: CallMode> Producer<A, R, M> {
    /// Enqueue a callable. On a full slot ring or exhausted arena the
    /// callable is handed back.
    pub fn push<F>(&mut self, f: F) -> Result<(), F>
    where
        M: ModeShim<F, A, R>,
        F: Send,
    {
        let input = self.shared.input_pos.load(Relaxed);
        let next = next_slot(input, self.shared.ring_size);
        let mut storage = callable_storage::<F>(&self.shared.arena, &self.cursors);
        if next == self.cached_output || storage.is_none() {
            self.sync();
            storage = callable_storage::<F>(&self.shared.arena, &self.cursors);
            if next == self.cached_output || storage.is_none() {
                return Err(f);
            }
        }
        let (obj, new_head) = storage.unwrap();
        unsafe {
            write_callable(obj, f);
            (*self.shared.slot(input)).write(FnSlot::erase::<M, F>(obj));
        }
        self.shared.input_pos.store(next, Release);
        self.shared.signal.notify_one();
        self.cursors.head = new_head;
        Ok(())
    }

    fn sync(&mut self) {
        let shared = &*self.shared;
        self.cached_output = shared.output_pos.load(Acquire);
        self.cursors.tail = if self.cached_output != shared.input_pos.load(Relaxed) {
            let slot = unsafe { (*shared.slot(self.cached_output)).assume_init() };
            shared.arena.offset_of(slot.obj_ptr())
        } else {
            self.cursors.head
        };
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring_size - 1
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.arena.len()
    }

    pub fn empty(&self) -> bool {
        self.shared.empty()
    }

    pub fn count(&self) -> usize {
        self.shared.count()
    }
}

/// Consuming half of a [`FunctionQueueSCSP`].
pub struct Consumer<A, R, M: CallMode> {
    shared: Arc<Shared<A, R, M>>,
    cached_input: usize,
}

impl<A, R, M: CallMode> Consumer<A, R, M> {
    /// Hand the oldest queued callable to `f` as a [`Function`] wrapper.
    /// Returns false when empty.
    pub fn consume(&mut self, f: impl for<'x> FnOnce(Function<'x, A, R, M>)) -> bool {
        let shared = &*self.shared;
        let output = shared.output_pos.load(Relaxed);
        if output == self.cached_input {
            self.cached_input = shared.input_pos.load(Acquire);
            if output == self.cached_input {
                return false;
            }
        }
        let slot = unsafe { (*shared.slot(output)).assume_init() };
        f(Function::new(slot));
        shared.output_pos.store(next_slot(output, shared.ring_size), Release);
        true
    }

    /// Drain every published callable. The cursor advance is published once
    /// at the end, even if `f` unwinds.
    pub fn consume_all(&mut self, mut f: impl for<'x> FnMut(Function<'x, A, R, M>)) -> usize {
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
            let slot = unsafe { (*shared.slot(i)).assume_init() };
            f(Function::new(slot));
            consumed += 1;
        }
        consumed
    }

    /// Drain at most `n` callables.
    pub fn consume_n(&mut self, mut f: impl for<'x> FnMut(Function<'x, A, R, M>), n: usize) -> usize {
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
            let slot = unsafe { (*shared.slot(i)).assume_init() };
            f(Function::new(slot));
            consumed += 1;
        }
        consumed
    }

    /// Block until the queue is non-empty. Advisory; only meaningful when
    /// the wait capability was enabled at construction.
    pub fn wait(&self) {
        let shared = &*self.shared;
        let output = shared.output_pos.load(Relaxed);
        shared.signal.wait_until(|| shared.input_pos.load(Relaxed) != output);
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring_size - 1
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.arena.len()
    }

    pub fn empty(&self) -> bool {
        self.shared.empty()
    }

    pub fn count(&self) -> usize {
        self.shared.count()
    }
}
