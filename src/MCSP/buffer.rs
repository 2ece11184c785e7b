//! MCSP queue of variable-length byte buffers carved from a byte arena.

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
use crate::Core::futex::WaitSignal;
use crate::Core::tagged::{self, is_empty, next_slot, ring_indices, tagged_count};

use super::object::alloc_positions;

#[derive(Clone, Copy)]
pub(crate) struct BufSlot {
    pub ptr: *mut u8,
    pub len: usize,
}

pub(crate) struct Shared {
    input_pos: CachePadded<AtomicU64>,
    output_pos: CachePadded<AtomicU64>,
    signal: WaitSignal,
    splices: *mut MaybeUninit<BufSlot>,
    ring_size: usize,
    arena: Arena,
    arena_align: usize,
    positions: *mut CachePadded<AtomicUsize>,
    max_readers: usize,
    producer_taken: AtomicBool,
    allocator: Arc<dyn BlockAllocator>,
}

// SAFETY: splice descriptors and arena bytes are written by the single
// producer; a reservation CAS grants a reader exclusive read access to its
// slots, ordered by the cursor release/acquire pairs.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    #[inline]
    unsafe fn splice(&self, index: usize) -> *mut MaybeUninit<BufSlot> {
        debug_assert!(index < self.ring_size);
        self.splices.add(index)
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

impl Drop for Shared {
    fn drop(&mut self) {
        dealloc_array(&self.allocator, self.splices, self.ring_size);
        self.allocator
            .deallocate_bytes(self.arena.base(), self.arena.len(), self.arena_align);
        dealloc_array(&self.allocator, self.positions, self.max_readers);
    }
}

/// MCSP buffer queue handle. Cheap to clone; hand clones to consumer
/// threads and take the single [`Producer`] with [`producer`](Self::producer).
#[derive(Clone)]
pub struct BufferQueueMCSP {
    shared: Arc<Shared>,
}

impl BufferQueueMCSP {
    /// Queue with the given slot capacity, arena size and reader limit,
    /// default options.
    pub fn new(capacity: usize, buffer_bytes: usize, max_readers: usize) -> Result<Self, BuildError> {
        QueueBuilder::new()
            .with_capacity(capacity)
            .with_buffer_bytes(buffer_bytes)
            .with_max_readers(max_readers)
            .build_buffer_mcsp()
    }

    pub(crate) fn build(b: &QueueBuilder) -> Result<Self, BuildError> {
        b.validate_arena()?;
        if b.max_readers == 0 {
            return Err(BuildError::ZeroReaders);
        }
        let ring_size = b.capacity + 1;
        let splices = alloc_array::<MaybeUninit<BufSlot>>(&b.allocator, ring_size)?;
        let base = match alloc_bytes(&b.allocator, b.buffer_bytes, b.buffer_align) {
            Ok(base) => base,
            Err(e) => {
                dealloc_array(&b.allocator, splices, ring_size);
                return Err(e);
            }
        };
        let positions = match alloc_positions(&b.allocator, b.max_readers) {
            Ok(positions) => positions,
            Err(e) => {
                dealloc_array(&b.allocator, splices, ring_size);
                b.allocator.deallocate_bytes(base, b.buffer_bytes, b.buffer_align);
                return Err(e);
            }
        };
        Ok(Self {
            shared: Arc::new(Shared {
                input_pos: CachePadded::new(AtomicU64::new(0)),
                output_pos: CachePadded::new(AtomicU64::new(0)),
                signal: WaitSignal::new(b.wait),
                splices,
                ring_size,
                arena: Arena::new(base, b.buffer_bytes),
                arena_align: b.buffer_align,
                positions,
                max_readers: b.max_readers,
                producer_taken: AtomicBool::new(false),
                allocator: b.allocator.clone(),
            }),
        })
    }

    /// Take the producing side. There is exactly one; later calls return
    /// `None`.
    pub fn producer(&self) -> Option<Producer> {
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
    pub fn get_reader(&self, index: usize) -> Reader {
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

/// Producing side of a [`BufferQueueMCSP`].
pub struct Producer {
    shared: Arc<Shared>,
    cached_output: usize,
    cursors: ArenaCursors,
}

impl Producer {
    /// Carve an aligned range of `size` bytes without committing it.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<WriteGrant<'_>> {
        let input = tagged::value(self.shared.input_pos.load(Relaxed));
        let next = next_slot(input, self.shared.ring_size);
        let mut span = self.shared.arena.carve(&self.cursors, size, align);
        if next == self.cached_output || span.is_none() {
            self.sync();
            span = self.shared.arena.carve(&self.cursors, size, align);
            if next == self.cached_output || span.is_none() {
                return None;
            }
        }
        let span = span.unwrap();
        Some(WriteGrant {
            ptr: span.ptr,
            len: span.len,
            producer: self,
        })
    }

    /// Carve, fill, and publish the used prefix; unused tail bytes return
    /// to the arena. Returns the committed length.
    pub fn allocate_and_release(
        &mut self,
        size: usize,
        align: usize,
        fill: impl FnOnce(&mut [u8]) -> usize,
    ) -> Option<usize> {
        let mut grant = self.allocate(size, align)?;
        let used = fill(grant.as_mut_slice()).min(grant.len());
        grant.truncate(used);
        Some(grant.release())
    }

    fn commit(&mut self, ptr: *mut u8, len: usize) {
        let shared = &*self.shared;
        let pos = shared.input_pos.load(Relaxed);
        let input = tagged::value(pos);
        let next = next_slot(input, shared.ring_size);
        unsafe { (*shared.splice(input)).write(BufSlot { ptr, len }) };
        cursor::publish(&shared.input_pos, pos, next, &shared.output_pos);
        shared.signal.notify_one();
        self.cursors.head = shared.arena.offset_of(ptr) + len;
    }

    /// Fold the reader table for a new minimum position, then re-derive the
    /// arena tail from the descriptor at that slot.
    fn sync(&mut self) {
        let shared = &*self.shared;
        self.cached_output = cursor::sync(self.cached_output, shared.positions(), &shared.output_pos);
        self.cursors.tail = if self.cached_output != tagged::value(shared.input_pos.load(Relaxed)) {
            let slot = unsafe { (*shared.splice(self.cached_output)).assume_init() };
            shared.arena.offset_of(slot.ptr)
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

/// An uncommitted byte range carved by [`Producer::allocate`].
pub struct WriteGrant<'a> {
    ptr: *mut u8,
    len: usize,
    producer: &'a mut Producer,
}

impl WriteGrant<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Narrow the grant to its first `len` bytes before release.
    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.len);
        self.len = len;
    }

    /// Publish the range to the readers. Returns the committed length.
    pub fn release(self) -> usize {
        let (ptr, len) = (self.ptr, self.len);
        self.producer.commit(ptr, len);
        len
    }
}

/// One registered consumer of a [`BufferQueueMCSP`]; see
/// [`crate::MCSP::object::Reader`] for the retry/try and announce protocol.
pub struct Reader {
    shared: Arc<Shared>,
    index: usize,
    last_pos: usize,
}

impl Reader {
    /// Consume the oldest buffer through `f`, retrying reservation races.
    pub fn consume(&mut self, f: impl FnOnce(&[u8])) -> bool {
        self.consume_impl(f, false, true)
    }

    /// Single reservation attempt; a lost race reports false.
    pub fn try_consume(&mut self, f: impl FnOnce(&[u8])) -> bool {
        self.consume_impl(f, true, true)
    }

    /// Like [`consume`](Self::consume) but without announcing; call
    /// [`announce`](Self::announce) to flush after a batch.
    pub fn consume_deferred(&mut self, f: impl FnOnce(&[u8])) -> bool {
        self.consume_impl(f, false, false)
    }

    /// Drain everything published at reservation time.
    pub fn consume_all(&mut self, f: impl FnMut(&[u8])) -> usize {
        self.consume_all_impl(f, false)
    }

    pub fn try_consume_all(&mut self, f: impl FnMut(&[u8])) -> usize {
        self.consume_all_impl(f, true)
    }

    /// Drain at most `n` buffers.
    pub fn consume_n(&mut self, f: impl FnMut(&[u8]), n: usize) -> usize {
        self.consume_n_impl(f, n, false)
    }

    pub fn try_consume_n(&mut self, f: impl FnMut(&[u8]), n: usize) -> usize {
        self.consume_n_impl(f, n, true)
    }

    /// Flush the last reserved position into the per-reader table.
    pub fn announce(&self) {
        cursor::announce(&self.shared.positions()[self.index], self.last_pos);
    }

    fn consume_impl(&mut self, f: impl FnOnce(&[u8]), check_once: bool, announce_now: bool) -> bool {
        let shared = &*self.shared;
        let Some(r) = cursor::reserve_one(&shared.output_pos, &shared.input_pos, shared.ring_size, check_once)
        else {
            return false;
        };
        let slot = unsafe { (*shared.splice(r.begin)).assume_init() };
        f(unsafe { std::slice::from_raw_parts(slot.ptr, slot.len) });
        self.last_pos = r.end;
        if announce_now {
            cursor::announce(&shared.positions()[self.index], r.end);
        }
        true
    }

    fn consume_all_impl(&mut self, mut f: impl FnMut(&[u8]), check_once: bool) -> usize {
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
            let slot = unsafe { (*shared.splice(i)).assume_init() };
            f(unsafe { std::slice::from_raw_parts(slot.ptr, slot.len) });
            consumed += 1;
        }
        consumed
    }

    fn consume_n_impl(&mut self, mut f: impl FnMut(&[u8]), n: usize, check_once: bool) -> usize {
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
            let slot = unsafe { (*shared.splice(i)).assume_init() };
            f(unsafe { std::slice::from_raw_parts(slot.ptr, slot.len) });
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

impl Drop for Reader {
    fn drop(&mut self) {
        cursor::park_reader(&self.shared.positions()[self.index]);
    }
}
