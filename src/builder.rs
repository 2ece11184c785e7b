use std::sync::Arc;

use log::debug;

use crate::error::BuildError;
use crate::Core::alloc::{BlockAllocator, SystemAlloc};
use crate::Core::function::CallMode;
use crate::{
    BufferQueueMCSP, BufferQueueSCSP, FunctionQueue, FunctionQueueMCSP, FunctionQueueSCSP, ObjectQueueMCSP,
    ObjectQueueSCSP,
};

/// Construction parameters shared by every queue variant.
///
/// `capacity` is the user-visible slot count; the ring internally holds one
/// extra sentinel slot. `buffer_bytes`/`buffer_align` size the byte arena of
/// buffer and function queues. `max_readers` bounds concurrent MCSP readers.
/// The wait flag enables the `wait()`/notify machinery; without it, publish
/// never issues a wake.
#[derive(Clone)]
pub struct QueueBuilder {
    pub(crate) capacity: usize,
    pub(crate) buffer_bytes: usize,
    pub(crate) buffer_align: usize,
    pub(crate) max_readers: usize,
    pub(crate) wait: bool,
    pub(crate) allocator: Arc<dyn BlockAllocator>,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self {
            capacity: 1024,
            buffer_bytes: 1024 * 1024, // 1MiB default arena
            buffer_align: 16,
            max_readers: 1,
            wait: false,
            allocator: Arc::new(SystemAlloc),
        }
    }
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = bytes;
        self
    }

    pub fn with_buffer_align(mut self, align: usize) -> Self {
        self.buffer_align = align;
        self
    }

    pub fn with_max_readers(mut self, max_readers: usize) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn BlockAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub(crate) fn validate_arena(&self) -> Result<(), BuildError> {
        if self.capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        if self.buffer_bytes == 0 {
            return Err(BuildError::ZeroArena);
        }
        if !self.buffer_align.is_power_of_two() {
            return Err(BuildError::BadAlignment(self.buffer_align));
        }
        Ok(())
    }

    pub fn build_object_scsp<T: Send>(self) -> Result<ObjectQueueSCSP<T>, BuildError> {
        let queue = ObjectQueueSCSP::build(&self)?;
        debug!("built object queue (scsp): capacity={} wait={}", self.capacity, self.wait);
        Ok(queue)
    }

    pub fn build_object_mcsp<T: Send>(self) -> Result<ObjectQueueMCSP<T>, BuildError> {
        let queue = ObjectQueueMCSP::build(&self)?;
        debug!(
            "built object queue (mcsp): capacity={} readers={} wait={}",
            self.capacity, self.max_readers, self.wait
        );
        Ok(queue)
    }

    pub fn build_buffer_scsp(self) -> Result<BufferQueueSCSP, BuildError> {
        let queue = BufferQueueSCSP::build(&self)?;
        debug!(
            "built buffer queue (scsp): capacity={} arena={}B align={} wait={}",
            self.capacity, self.buffer_bytes, self.buffer_align, self.wait
        );
        Ok(queue)
    }

    pub fn build_buffer_mcsp(self) -> Result<BufferQueueMCSP, BuildError> {
        let queue = BufferQueueMCSP::build(&self)?;
        debug!(
            "built buffer queue (mcsp): capacity={} arena={}B readers={} wait={}",
            self.capacity, self.buffer_bytes, self.max_readers, self.wait
        );
        Ok(queue)
    }

    pub fn build_function_scsp<A, R, M: CallMode>(self) -> Result<FunctionQueueSCSP<A, R, M>, BuildError> {
        let queue = FunctionQueueSCSP::build(&self)?;
        debug!(
            "built function queue (scsp): capacity={} arena={}B wait={}",
            self.capacity, self.buffer_bytes, self.wait
        );
        Ok(queue)
    }

    pub fn build_function_mcsp<A, R, M: CallMode>(self) -> Result<FunctionQueueMCSP<A, R, M>, BuildError> {
        let queue = FunctionQueueMCSP::build(&self)?;
        debug!(
            "built function queue (mcsp): capacity={} arena={}B readers={} wait={}",
            self.capacity, self.buffer_bytes, self.max_readers, self.wait
        );
        Ok(queue)
    }

    pub fn build_function_unsync<A, R, M: CallMode>(self) -> Result<FunctionQueue<A, R, M>, BuildError> {
        let queue = FunctionQueue::build(&self)?;
        debug!(
            "built function queue (unsync): capacity={} arena={}B",
            self.capacity, self.buffer_bytes
        );
        Ok(queue)
    }
}
