//! Single-threaded function queue: a bounded task list over the same
//! descriptor and arena machinery as the synchronized variants, with plain
//! cursors and `&mut self` methods instead of atomics.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;

use crate::builder::QueueBuilder;
use crate::error::BuildError;
use crate::Core::alloc::{alloc_bytes, alloc_array, dealloc_array, BlockAllocator};
use crate::Core::arena::{Arena, ArenaCursors};
use crate::Core::function::{callable_storage, write_callable, CallMode, FnSlot, Function, ModeShim};
use crate::Core::tagged::{count, next_slot, ring_indices};

/// Bounded single-threaded queue of erased callables.
pub struct FunctionQueue<A, R, M: CallMode> {
    slots: *mut MaybeUninit<FnSlot<A, R>>,
    ring_size: usize,
    input_pos: usize,
    output_pos: usize,
    arena: Arena,
    arena_align: usize,
    cursors: ArenaCursors,
    allocator: Arc<dyn BlockAllocator>,
    _mode: PhantomData<M>,
}

impl<A, R, M: CallMode> FunctionQueue<A, R, M> {
    /// Queue with the given slot capacity and arena size, default options.
    pub fn new(capacity: usize, buffer_bytes: usize) -> Result<Self, BuildError> {
        QueueBuilder::new()
            .with_capacity(capacity)
            .with_buffer_bytes(buffer_bytes)
            .build_function_unsync()
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
            slots,
            ring_size,
            input_pos: 0,
            output_pos: 0,
            arena: Arena::new(base, b.buffer_bytes),
            arena_align: b.buffer_align,
            cursors: ArenaCursors::default(),
            allocator: b.allocator.clone(),
            _mode: PhantomData,
        })
    }

    #[inline]
    unsafe fn slot(&self, index: usize) -> *mut MaybeUninit<FnSlot<A, R>> {
        debug_assert!(index < self.ring_size);
        self.slots.add(index)
    }

    /// Enqueue a callable; hands it back when the slot ring or arena is
    /// full.
    pub fn push<F>(&mut self, f: F) -> Result<(), F>
    where
        M: ModeShim<F, A, R>,
    {
        let next = next_slot(self.input_pos, self.ring_size);
        let Some((obj, new_head)) = callable_storage::<F>(&self.arena, &self.cursors) else {
            return Err(f);
        };
        if next == self.output_pos {
            return Err(f);
        }
        unsafe {
            write_callable(obj, f);
            (*self.slot(self.input_pos)).write(FnSlot::erase::<M, F>(obj));
        }
        self.input_pos = next;
        self.cursors.head = new_head;
        Ok(())
    }

    /// Hand the oldest queued callable to `f`. Returns false when empty.
    pub fn consume(&mut self, f: impl for<'x> FnOnce(Function<'x, A, R, M>)) -> bool {
        if self.empty() {
            return false;
        }
        let output = self.output_pos;
        let slot = unsafe { (*self.slot(output)).assume_init() };
        f(Function::new(slot));
        self.set_output_pos(next_slot(output, self.ring_size));
        true
    }

    /// Drain every queued callable.
    pub fn consume_all(&mut self, mut f: impl for<'x> FnMut(Function<'x, A, R, M>)) -> usize {
        let mut consumed = 0;
        while self.consume(&mut f) {
            consumed += 1;
        }
        consumed
    }

    /// Drain at most `n` callables.
    pub fn consume_n(&mut self, mut f: impl for<'x> FnMut(Function<'x, A, R, M>), n: usize) -> usize {
        let mut consumed = 0;
        while consumed < n && self.consume(&mut f) {
            consumed += 1;
        }
        consumed
    }

    fn set_output_pos(&mut self, next: usize) {
        self.output_pos = next;
        self.cursors.tail = if self.output_pos != self.input_pos {
            let slot = unsafe { (*self.slot(self.output_pos)).assume_init() };
            self.arena.offset_of(slot.obj_ptr())
        } else {
            self.cursors.head
        };
    }

    pub fn capacity(&self) -> usize {
        self.ring_size - 1
    }

    pub fn buffer_size(&self) -> usize {
        self.arena.len()
    }

    pub fn empty(&self) -> bool {
        self.input_pos == self.output_pos
    }

    pub fn count(&self) -> usize {
        count(self.output_pos, self.input_pos, self.ring_size)
    }
}

impl<A, R, M: CallMode> Drop for FunctionQueue<A, R, M> {
    fn drop(&mut self) {
        if M::STORE_DROP {
            for i in ring_indices(self.output_pos, self.input_pos, self.ring_size) {
                unsafe { (*self.slot(i)).assume_init() }.destroy_residual();
            }
        }
        dealloc_array(&self.allocator, self.slots, self.ring_size);
        self.allocator
            .deallocate_bytes(self.arena.base(), self.arena.len(), self.arena_align);
    }
}
