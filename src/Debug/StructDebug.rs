//! Manual Debug implementations for the queue handles.
//!
//! The handles carry raw pointers into externally allocated blocks, so the
//! derived representation would be useless or unsafe to print; these impls
//! show the observable queue state instead.

use std::fmt;

use crate::{BufferQueueMCSP, FunctionQueueMCSP, ObjectQueueMCSP};
use crate::Core::function::CallMode;
use crate::{MCSP, SCSP};

impl<T: Send> fmt::Debug for ObjectQueueMCSP<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectQueueMCSP")
            .field("capacity", &self.capacity())
            .field("max_readers", &self.max_readers())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for BufferQueueMCSP {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferQueueMCSP")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("max_readers", &self.max_readers())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<A, R, M: CallMode> fmt::Debug for FunctionQueueMCSP<A, R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionQueueMCSP")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("max_readers", &self.max_readers())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<T: Send> fmt::Debug for SCSP::object::Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectProducer")
            .field("capacity", &self.capacity())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<T: Send> fmt::Debug for SCSP::object::Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectConsumer")
            .field("capacity", &self.capacity())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for SCSP::buffer::Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferProducer")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for SCSP::buffer::Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferConsumer")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<T: Send> fmt::Debug for MCSP::object::Reader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<A, R, M: CallMode> fmt::Debug for SCSP::function::Producer<A, R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionProducer")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<A, R, M: CallMode> fmt::Debug for SCSP::function::Consumer<A, R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionConsumer")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<T: Send> fmt::Debug for MCSP::object::Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectProducer")
            .field("capacity", &self.capacity())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for MCSP::buffer::Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferProducer")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for MCSP::buffer::Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferReader")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<A, R, M: CallMode> fmt::Debug for MCSP::function::Producer<A, R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionProducer")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<A, R, M: CallMode> fmt::Debug for MCSP::function::Reader<A, R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionReader")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
