//! SCSP queue of variable-length byte buffers carved from a byte arena.
//!
//! Slots are splice descriptors pointing into the arena. The producer owns
//! both the slot cursor and the arena cursors; consuming only advances the
//! slot cursor, and the producer re-derives the arena tail from the
//! descriptor at the consumer's position when it syncs.

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
use crate::Core::futex::WaitSignal;
use crate::Core::tagged::{advance_upto, count, next_slot, ring_indices};

/// Splice descriptor: one committed byte range in the arena.
#[derive(Clone, Copy)]
pub(crate) struct BufSlot {
    pub ptr: *mut u8,
    pub len: usize,
}

pub(crate) struct Shared {
    input_pos: CachePadded<AtomicUsize>,
    output_pos: CachePadded<AtomicUsize>,
    signal: WaitSignal,
    splices: *mut MaybeUninit<BufSlot>,
    ring_size: usize,
    arena: Arena,
    arena_align: usize,
    allocator: Arc<dyn BlockAllocator>,
}

// SAFETY: splice descriptors and arena bytes are written only by the
// producer handle and read only by the consumer handle, ordered by the
// input_pos/output_pos release/acquire pairs.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    #[inline]
    unsafe fn splice(&self, index: usize) -> *mut MaybeUninit<BufSlot> {
        debug_assert!(index < self.ring_size);
        self.splices.add(index)
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

impl Drop for Shared {
    fn drop(&mut self) {
        dealloc_array(&self.allocator, self.splices, self.ring_size);
        self.allocator
            .deallocate_bytes(self.arena.base(), self.arena.len(), self.arena_align);
    }
}

/// SCSP buffer queue. [`split`](Self::split) it into its producer and
/// consumer halves before use.
pub struct BufferQueueSCSP {
    shared: Arc<Shared>,
}

impl BufferQueueSCSP {
    /// Queue with the given slot capacity and arena size, default options.
    pub fn new(capacity: usize, buffer_bytes: usize) -> Result<Self, BuildError> {
        QueueBuilder::new()
            .with_capacity(capacity)
            .with_buffer_bytes(buffer_bytes)
            .build_buffer_scsp()
    }

    pub(crate) fn build(b: &QueueBuilder) -> Result<Self, BuildError> {
        b.validate_arena()?;
        let ring_size = b.capacity + 1;
        let splices = alloc_array::<MaybeUninit<BufSlot>>(&b.allocator, ring_size)?;
        let base = match alloc_bytes(&b.allocator, b.buffer_bytes, b.buffer_align) {
            Ok(base) => base,
            Err(e) => {
                dealloc_array(&b.allocator, splices, ring_size);
                return Err(e);
            }
        };
        Ok(Self {
            shared: Arc::new(Shared {
                input_pos: CachePadded::new(AtomicUsize::new(0)),
                output_pos: CachePadded::new(AtomicUsize::new(0)),
                signal: WaitSignal::new(b.wait),
                splices,
                ring_size,
                arena: Arena::new(base, b.buffer_bytes),
                arena_align: b.buffer_align,
                allocator: b.allocator.clone(),
            }),
        })
    }

    pub fn split(self) -> (Producer, Consumer) {
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

/// Producing half of a [`BufferQueueSCSP`].
pub struct Producer {
    shared: Arc<Shared>,
    cached_output: usize,
    cursors: ArenaCursors,
}

impl Producer {
    /// Carve an aligned range of `size` bytes without committing it.
    /// `None` means the slot ring or the arena is full; a consumer must make
    /// progress before a retry can succeed.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<WriteGrant<'_>> {
        let input = self.shared.input_pos.load(Relaxed);
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

    /// Carve, let `fill` write into the range and report how many bytes it
    /// used, then publish that prefix. Unused tail bytes return to the
    /// arena. Returns the committed length.
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
        let input = shared.input_pos.load(Relaxed);
        let next = next_slot(input, shared.ring_size);
        unsafe { (*shared.splice(input)).write(BufSlot { ptr, len }) };
        shared.input_pos.store(next, Release);
        shared.signal.notify_one();
        self.cursors.head = shared.arena.offset_of(ptr) + len;
    }

    /// Refresh the cached consumer position and re-derive the arena tail:
    /// the descriptor at the consumer slot when the ring is non-empty,
    /// otherwise the arena head (ring empty means the whole arena is free).
    fn sync(&mut self) {
        let shared = &*self.shared;
        self.cached_output = shared.output_pos.load(Acquire);
        self.cursors.tail = if self.cached_output != shared.input_pos.load(Relaxed) {
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

/// An uncommitted byte range carved by [`Producer::allocate`]. Dropping the
/// grant without [`release`](Self::release) abandons the range; nothing is
/// published and the arena head stays put.
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

    /// Publish the range to the consumer. Returns the committed length.
    pub fn release(self) -> usize {
        let (ptr, len) = (self.ptr, self.len);
        self.producer.commit(ptr, len);
        len
    }
}

/// Consuming half of a [`BufferQueueSCSP`].
pub struct Consumer {
    shared: Arc<Shared>,
    cached_input: usize,
}

impl Consumer {
    /// Consume the oldest buffer through `f`. Returns false when empty.
    pub fn consume(&mut self, f: impl FnOnce(&[u8])) -> bool {
        let shared = &*self.shared;
        let output = shared.output_pos.load(Relaxed);
        if output == self.cached_input {
            self.cached_input = shared.input_pos.load(Acquire);
            if output == self.cached_input {
                return false;
            }
        }
        let slot = unsafe { (*shared.splice(output)).assume_init() };
        f(unsafe { std::slice::from_raw_parts(slot.ptr, slot.len) });
        shared.output_pos.store(next_slot(output, shared.ring_size), Release);
        true
    }

    /// Drain every published buffer. The cursor advance is published once at
    /// the end, even if `f` unwinds.
    pub fn consume_all(&mut self, mut f: impl FnMut(&[u8])) -> usize {
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
            let slot = unsafe { (*shared.splice(i)).assume_init() };
            f(unsafe { std::slice::from_raw_parts(slot.ptr, slot.len) });
            consumed += 1;
        }
        consumed
    }

    /// Drain at most `n` buffers.
    pub fn consume_n(&mut self, mut f: impl FnMut(&[u8]), n: usize) -> usize {
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
            let slot = unsafe { (*shared.splice(i)).assume_init() };
            f(unsafe { std::slice::from_raw_parts(slot.ptr, slot.len) });
            consumed += 1;
        }
        consumed
    }

    /// Block until the queue is non-empty. Advisory; see the module docs.
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
