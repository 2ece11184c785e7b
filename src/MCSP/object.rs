//! MCSP queue of in-place-constructed typed objects.

use std::mem::MaybeUninit;
use std::sync::atomic::{
    AtomicBool, AtomicU64, AtomicUsize,
    Ordering::{AcqRel, Relaxed},
};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::builder::QueueBuilder;
use crate::error::BuildError;
use crate::Core::alloc::{alloc_array, dealloc_array, BlockAllocator};
use crate::Core::cursor::{self, AnnounceOnDrop};
use crate::Core::futex::WaitSignal;
use crate::Core::tagged::{self, free_span, is_empty, next_slot, ring_indices, tagged_count, VACANT};

pub(crate) struct Shared<T> {
    input_pos: CachePadded<AtomicU64>,
    output_pos: CachePadded<AtomicU64>,
    signal: WaitSignal,
    slots: *mut MaybeUninit<T>,
    ring_size: usize,
    positions: *mut CachePadded<AtomicUsize>,
    max_readers: usize,
    producer_taken: AtomicBool,
    allocator: Arc<dyn BlockAllocator>,
}

// SAFETY: slots are written by the single producer and read by whichever
// reader won the reservation CAS; the tagged cursor protocol makes the
// reservation exclusive and the release/acquire pairs order the payload
// accesses.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    unsafe fn slot(&self, index: usize) -> *mut MaybeUninit<T> {
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

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let input = tagged::value(self.input_pos.load(Relaxed));
        let output = tagged::value(self.output_pos.load(Relaxed));
        for i in ring_indices(output, input, self.ring_size) {
            unsafe { (*self.slot(i)).assume_init_drop() };
        }
        dealloc_array(&self.allocator, self.slots, self.ring_size);
        dealloc_array(&self.allocator, self.positions, self.max_readers);
    }
}

pub(crate) fn alloc_positions(
    allocator: &Arc<dyn BlockAllocator>,
    max_readers: usize,
) -> Result<*mut CachePadded<AtomicUsize>, BuildError> {
    let positions = alloc_array::<CachePadded<AtomicUsize>>(allocator, max_readers)?;
    for i in 0..max_readers {
        unsafe { positions.add(i).write(CachePadded::new(AtomicUsize::new(VACANT))) };
    }
    Ok(positions)
}

/// MCSP object queue handle. Cheap to clone; hand clones to consumer
/// threads and take the single [`Producer`] with [`producer`](Self::producer).
pub struct ObjectQueueMCSP<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ObjectQueueMCSP<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send> ObjectQueueMCSP<T> {
    /// Queue with the given index-ring capacity and reader limit, default
    /// options.
    pub fn new(capacity: usize, max_readers: usize) -> Result<Self, BuildError> {
        QueueBuilder::new()
            .with_capacity(capacity)
            .with_max_readers(max_readers)
            .build_object_mcsp()
    }

    pub(crate) fn build(b: &QueueBuilder) -> Result<Self, BuildError> {
        if b.capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        if b.max_readers == 0 {
            return Err(BuildError::ZeroReaders);
        }
        let ring_size = b.capacity + 1;
        let slots = alloc_array::<MaybeUninit<T>>(&b.allocator, ring_size)?;
        let positions = match alloc_positions(&b.allocator, b.max_readers) {
            Ok(positions) => positions,
            Err(e) => {
                dealloc_array(&b.allocator, slots, ring_size);
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
                positions,
                max_readers: b.max_readers,
                producer_taken: AtomicBool::new(false),
                allocator: b.allocator.clone(),
            }),
        })
    }

    /// Take the producing side. There is exactly one; later calls return
    /// `None`.
    pub fn producer(&self) -> Option<Producer<T>> {
        if self.shared.producer_taken.swap(true, AcqRel) {
            return None;
        }
        Some(Producer {
            shared: self.shared.clone(),
            cached_output: 0,
        })
    }

    /// Register a reader at `index`. The index must be below
    /// [`max_readers`](Self::max_readers) and not in concurrent use; the
    /// queue does not police duplicates.
    pub fn get_reader(&self, index: usize) -> Reader<T> {
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

/// Producing side of an [`ObjectQueueMCSP`].
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    // Minimum reclaimable reader position from the last sync.
    cached_output: usize,
}

impl<T: Send> Producer<T> {
    /// Append one object. On a full ring the value is handed back; a sync
    /// over the reader table is attempted once before giving up.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        let pos = shared.input_pos.load(Relaxed);
        let input = tagged::value(pos);
        let next = next_slot(input, shared.ring_size);
        if next == self.cached_output {
            self.cached_output = cursor::sync(self.cached_output, shared.positions(), &shared.output_pos);
            if next == self.cached_output {
                return Err(value);
            }
        }
        unsafe { (*shared.slot(input)).write(value) };
        cursor::publish(&shared.input_pos, pos, next, &shared.output_pos);
        shared.signal.notify_one();
        Ok(())
    }

    /// Expose the contiguous free prefix of the ring to `fill`; see
    /// [`crate::SCSP::object::Producer::emplace_n`].
    ///
    /// # Safety
    /// `fill` must initialize the first `k` slots of the span it is given
    /// and return exactly that `k`.
    pub unsafe fn emplace_n(&mut self, fill: impl FnOnce(&mut [MaybeUninit<T>]) -> usize) -> usize {
        let shared = &*self.shared;
        let pos = shared.input_pos.load(Relaxed);
        let input = tagged::value(pos);
        let mut avl = free_span(self.cached_output, input, shared.ring_size);
        if avl == 0 {
            self.cached_output = cursor::sync(self.cached_output, shared.positions(), &shared.output_pos);
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
        cursor::publish(&shared.input_pos, pos, next, &shared.output_pos);
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

/// One registered consumer of an [`ObjectQueueMCSP`].
///
/// The `consume*` methods retry a lost reservation CAS against the freshly
/// observed cursor; the `try_*` forms attempt it once and report a lost race
/// as empty. Dropping the reader vacates its announcement slot.
pub struct Reader<T> {
    shared: Arc<Shared<T>>,
    index: usize,
    // Last reserved end position; flushed to the per-reader table on
    // announce.
    last_pos: usize,
}

impl<T: Send> Reader<T> {
    /// Take the oldest object, retrying reservation races.
    pub fn pop(&mut self) -> Option<T> {
        self.pop_impl(false, true)
    }

    /// Single reservation attempt; a lost race reports `None`.
    pub fn try_pop(&mut self) -> Option<T> {
        self.pop_impl(true, true)
    }

    /// Like [`pop`](Self::pop) but without announcing the advance; call
    /// [`announce`](Self::announce) to flush after a batch.
    pub fn pop_deferred(&mut self) -> Option<T> {
        self.pop_impl(false, false)
    }

    pub fn consume(&mut self, f: impl FnOnce(T)) -> bool {
        self.pop().map(f).is_some()
    }

    pub fn try_consume(&mut self, f: impl FnOnce(T)) -> bool {
        self.try_pop().map(f).is_some()
    }

    /// Drain everything published at reservation time.
    pub fn consume_all(&mut self, f: impl FnMut(T)) -> usize {
        self.consume_all_impl(f, false)
    }

    pub fn try_consume_all(&mut self, f: impl FnMut(T)) -> usize {
        self.consume_all_impl(f, true)
    }

    /// Drain at most `n` objects.
    pub fn consume_n(&mut self, f: impl FnMut(T), n: usize) -> usize {
        self.consume_n_impl(f, n, false)
    }

    pub fn try_consume_n(&mut self, f: impl FnMut(T), n: usize) -> usize {
        self.consume_n_impl(f, n, true)
    }

    /// Flush the last reserved position into the per-reader table.
    pub fn announce(&self) {
        cursor::announce(&self.shared.positions()[self.index], self.last_pos);
    }

    fn pop_impl(&mut self, check_once: bool, announce_now: bool) -> Option<T> {
        let shared = &*self.shared;
        let r = cursor::reserve_one(&shared.output_pos, &shared.input_pos, shared.ring_size, check_once)?;
        let value = unsafe { (*shared.slot(r.begin)).assume_init_read() };
        self.last_pos = r.end;
        if announce_now {
            cursor::announce(&shared.positions()[self.index], r.end);
        }
        Some(value)
    }

    fn consume_all_impl(&mut self, mut f: impl FnMut(T), check_once: bool) -> usize {
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
            let value = unsafe { (*shared.slot(i)).assume_init_read() };
            consumed += 1;
            f(value);
        }
        consumed
    }

    fn consume_n_impl(&mut self, mut f: impl FnMut(T), n: usize, check_once: bool) -> usize {
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
            let value = unsafe { (*shared.slot(i)).assume_init_read() };
            consumed += 1;
            f(value);
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

impl<T> Drop for Reader<T> {
    fn drop(&mut self) {
        cursor::park_reader(&self.shared.positions()[self.index]);
    }
}
