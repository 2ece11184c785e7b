//! MCSP queue of type-erased callables with a fixed call signature.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{
    AtomicBool, AtomicU64, AtomicUsize,
    Ordering::{AcqRel, Relaxed},
};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::builder::QueueBuilder;
use crate::error::BuildError;
use crate::Core::alloc::{alloc_bytes, alloc_array, dealloc_array, BlockAllocator};
use crate::Core::arena::{Arena, ArenaCursors};
use crate::Core::cursor::{self, AnnounceOnDrop};
use crate::Core::function::{callable_storage, write_callable, CallMode, FnSlot, Function, ModeShim};
use crate::Core::futex::WaitSignal;
use crate::Core::tagged::{self, is_empty, next_slot, ring_indices, tagged_count};

use super::object::alloc_positions;

pub(crate) struct Shared<A, R, M: CallMode> {
    input_pos: CachePadded<AtomicU64>,
    output_pos: CachePadded<AtomicU64>,
    signal: WaitSignal,
    slots: *mut MaybeUninit<FnSlot<A, R>>,
    ring_size: usize,
    arena: Arena,
    arena_align: usize,
    positions: *mut CachePadded<AtomicUsize>,
    max_readers: usize,
    producer_taken: AtomicBool,
    allocator: Arc<dyn BlockAllocator>,
    _mode: PhantomData<M>,
}

// SAFETY: slots and arena bytes are written by the single producer; a
// reservation CAS grants a reader exclusive access to its slots. Callables
// are required to be Send at push.
unsafe impl<A, R, M: CallMode> Send for Shared<A, R, M> {}
unsafe impl<A, R, M: CallMode> Sync for Shared<A, R, M> {}

impl<A, R, M: CallMode> Shared<A, R, M> {
    #[inline]
    unsafe fn slot(&self, index: usize) -> *mut MaybeUninit<FnSlot<A, R>> {
        debug_assert!(index < self.ring_size);
        self.slots.add(index)
    }

    fn positions(&self) -> &[CachePadded<AtomicUsize>] {
        unsafe { std::slice::from_raw_parts(self.positions, self.max_readers) }
    }

    fn empty(&self) -> bool {
        is_empty(self.output_pos.load(Relaxed), self.input_pos.load(Relaxed))
    }

    fn count(&self) -> usize {
        tagged_count(
            self.output_pos.load(Relaxed),
            self.input_pos.load(Relaxed),
            self.ring_size,
        )
    }

    fn wait(&self) {
        let output = self.output_pos.load(Relaxed);
        self.signal.wait_until(|| self.input_pos.load(Relaxed) != output);
    }
}

impl<A, R, M: CallMode> Drop for Shared<A, R, M> {
    fn drop(&mut self) {
        if M::STORE_DROP {
            let input = tagged::value(self.input_pos.load(Relaxed));
            let output = tagged::value(self.output_pos.load(Relaxed));
            for i in ring_indices(output, input, self.ring_size) {
                unsafe { (*self.slot(i)).assume_init() }.destroy_residual();
            }
        }
        dealloc_array(&self.allocator, self.slots, self.ring_size);
        self.allocator
            .deallocate_bytes(self.arena.base(), self.arena.len(), self.arena_align);
        dealloc_array(&self.allocator, self.positions, self.max_readers);
    }
}

/// MCSP function queue handle. Cheap to clone; hand clones to consumer
/// threads and take the single [`Producer`] with [`producer`](Self::producer).
pub struct FunctionQueueMCSP<A, R, M: CallMode> {
    shared: Arc<Shared<A, R, M>>,
}

impl<A, R, M: CallMode> Clone for FunctionQueueMCSP<A, R, M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<A, R, M: CallMode> FunctionQueueMCSP<A, R, M> {
    /// Queue with the given slot capacity, arena size and reader limit,
    /// default options.
    pub fn new(capacity: usize, buffer_bytes: usize, max_readers: usize) -> Result<Self, BuildError> {
        QueueBuilder::new()
            .with_capacity(capacity)
            .with_buffer_bytes(buffer_bytes)
            .with_max_readers(max_readers)
            .build_function_mcsp()
    }

    pub(crate) fn build(b: &QueueBuilder) -> Result<Self, BuildError> {
        b.validate_arena()?;
        if b.max_readers == 0 {
            return Err(BuildError::ZeroReaders);
        }
        let ring_size = b.capacity + 1;
        let slots = alloc_array::<MaybeUninit<FnSlot<A, R>>>(&b.allocator, ring_size)?;
        let base = match alloc_bytes(&b.allocator, b.buffer_bytes, b.buffer_align) {
            Ok(base) => base,
            Err(e) => {
                dealloc_array(&b.allocator, slots, ring_size);
                return Err(e);
            }
        };
        let positions = match alloc_positions(&b.allocator, b.max_readers) {
            Ok(positions) => positions,
            Err(e) => {
                dealloc_array(&b.allocator, slots, ring_size);
                b.allocator.deallocate_bytes(base, b.buffer_bytes, b.buffer_align);
                return Err(e);
            }
        };
        Ok(Self {
            shared: Arc::new(Shared {
                input_pos: CachePadded::new(AtomicU64::new(0)),
                output_pos: CachePadded::new(AtomicU64::new(0)),
                signal: WaitSignal::new(b.wait),
                slots,
                ring_size,
                arena: Arena::new(base, b.buffer_bytes),
                arena_align: b.buffer_align,
                positions,
                max_readers: b.max_readers,
                producer_taken: AtomicBool::new(false),
                allocator: b.allocator.clone(),
                _mode: PhantomData,
            }),
        })
    }

    /// Take the producing side. There is exactly one; later calls return
    /// `None`.
    pub fn producer(&self) -> Option<Producer<A, R, M>> {
        if self.shared.producer_taken.swap(true, AcqRel) {
            return None;
        }
        Some(Producer {
            shared: self.shared.clone(),
            cached_output: 0,
            cursors: ArenaCursors::default(),
        })
    }

    /// Register a reader at `index`; see
    /// [`ObjectQueueMCSP::get_reader`](crate::ObjectQueueMCSP::get_reader).
    pub fn get_reader(&self, index: usize) -> Reader<A, R, M> {
        assert!(index < self.shared.max_readers);
        cursor::set_reader(&self.shared.positions()[index], &self.shared.output_pos);
        let last_pos = tagged::value(self.shared.output_pos.load(Relaxed));
        Reader {
            shared: self.shared.clone(),
            index,
            last_pos,
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring_size - 1
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.arena.len()
    }

    pub fn max_readers(&self) -> usize {
        self.shared.max_readers
    }

    pub fn empty(&self) -> bool {
        self.shared.empty()
    }

    pub fn count(&self) -> usize {
        self.shared.count()
    }

    /// Block until the queue is non-empty. Advisory; only meaningful when
    /// the wait capability was enabled at construction.
    pub fn wait(&self) {
        self.shared.wait();
    }
}

/// Producing side of a [`FunctionQueueMCSP`].
pub struct Producer<A, R, M: CallMode> {
    shared: Arc<Shared<A, R, M>>,
    cached_output: usize,
    cursors: ArenaCursors,
}

impl<A, R, M: CallMode> Producer<A, R, M> {
    /// Enqueue a callable. On a full slot ring or exhausted arena the
    /// callable is handed back; the reader table is folded once before
    /// giving up.
    pub fn push<F>(&mut self, f: F) -> Result<(), F>
    where
        M: ModeShim<F, A, R>,
        F: Send,
    {
        let pos = self.shared.input_pos.load(Relaxed);
        let input = tagged::value(pos);
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
        cursor::publish(&self.shared.input_pos, pos, next, &self.shared.output_pos);
        self.shared.signal.notify_one();
        self.cursors.head = new_head;
        Ok(())
    }

    fn sync(&mut self) {
        let shared = &*self.shared;
        self.cached_output = cursor::sync(self.cached_output, shared.positions(), &shared.output_pos);
        self.cursors.tail = if self.cached_output != tagged::value(shared.input_pos.load(Relaxed)) {
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

/// One registered consumer of a [`FunctionQueueMCSP`]; see
/// [`crate::MCSP::object::Reader`] for the retry/try and announce protocol.
pub struct Reader<A, R, M: CallMode> {
    shared: Arc<Shared<A, R, M>>,
    index: usize,
    last_pos: usize,
}

impl<A, R, M: CallMode> Reader<A, R, M> {
    /// Hand the oldest queued callable to `f`, retrying reservation races.
    pub fn consume(&mut self, f: impl for<'x> FnOnce(Function<'x, A, R, M>)) -> bool {
        self.consume_impl(f, false, true)
    }

    /// Single reservation attempt; a lost race reports false.
    pub fn try_consume(&mut self, f: impl for<'x> FnOnce(Function<'x, A, R, M>)) -> bool {
        self.consume_impl(f, true, true)
    }

    /// Like [`consume`](Self::consume) but without announcing; call
    /// [`announce`](Self::announce) to flush after a batch.
    pub fn consume_deferred(&mut self, f: impl for<'x> FnOnce(Function<'x, A, R, M>)) -> bool {
        self.consume_impl(f, false, false)
    }

    /// Drain everything published at reservation time.
    pub fn consume_all(&mut self, f: impl for<'x> FnMut(Function<'x, A, R, M>)) -> usize {
        self.consume_all_impl(f, false)
    }

    pub fn try_consume_all(&mut self, f: impl for<'x> FnMut(Function<'x, A, R, M>)) -> usize {
        self.consume_all_impl(f, true)
    }

    /// Drain at most `n` callables.
    pub fn consume_n(&mut self, f: impl for<'x> FnMut(Function<'x, A, R, M>), n: usize) -> usize {
        self.consume_n_impl(f, n, false)
    }

    pub fn try_consume_n(&mut self, f: impl for<'x> FnMut(Function<'x, A, R, M>), n: usize) -> usize {
        self.consume_n_impl(f, n, true)
    }

    /// Flush the last reserved position into the per-reader table.
    pub fn announce(&self) {
        cursor::announce(&self.shared.positions()[self.index], self.last_pos);
    }

    fn consume_impl(
        &mut self,
        f: impl for<'x> FnOnce(Function<'x, A, R, M>),
        check_once: bool,
        announce_now: bool,
    ) -> bool {
        let shared = &*self.shared;
        let Some(r) = cursor::reserve_one(&shared.output_pos, &shared.input_pos, shared.ring_size, check_once)
        else {
            return false;
        };
        let slot = unsafe { (*shared.slot(r.begin)).assume_init() };
        f(Function::new(slot));
        self.last_pos = r.end;
        if announce_now {
            cursor::announce(&shared.positions()[self.index], r.end);
        }
        true
    }

    fn consume_all_impl(&mut self, mut f: impl for<'x> FnMut(Function<'x, A, R, M>), check_once: bool) -> usize {
        let shared = &*self.shared;
        let Some(r) = cursor::reserve_all(&shared.output_pos, &shared.input_pos, check_once) else {
            return 0;
        };
        self.last_pos = r.end;
        let _announce = AnnounceOnDrop {
            slot: &shared.positions()[self.index],
            to: r.end,
        };
        let mut consumed = 0;
        for i in ring_indices(r.begin, r.end, shared.ring_size) {
            let slot = unsafe { (*shared.slot(i)).assume_init() };
            f(Function::new(slot));
            consumed += 1;
        }
        consumed
    }

    fn consume_n_impl(
        &mut self,
        mut f: impl for<'x> FnMut(Function<'x, A, R, M>),
        n: usize,
        check_once: bool,
    ) -> usize {
        let shared = &*self.shared;
        let Some(r) = cursor::reserve_n(&shared.output_pos, &shared.input_pos, shared.ring_size, n, check_once)
        else {
            return 0;
        };
        self.last_pos = r.end;
        let _announce = AnnounceOnDrop {
            slot: &shared.positions()[self.index],
            to: r.end,
        };
        let mut consumed = 0;
        for i in ring_indices(r.begin, r.end, shared.ring_size) {
            let slot = unsafe { (*shared.slot(i)).assume_init() };
            f(Function::new(slot));
            consumed += 1;
        }
        consumed
    }

    pub fn empty(&self) -> bool {
        self.shared.empty()
    }

    pub fn count(&self) -> usize {
        self.shared.count()
    }

    /// Block until the queue is non-empty. Advisory; see the queue docs.
    pub fn wait(&self) {
        self.shared.wait();
    }
}

impl<A, R, M: CallMode> Drop for Reader<A, R, M> {
    fn drop(&mut self) {
        cursor::park_reader(&self.shared.positions()[self.index]);
    }
}
