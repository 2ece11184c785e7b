//! Fixed-capacity, wait-free/lock-free ring-buffer queues for passing typed
//! objects, variable-length byte buffers and type-erased callables between a
//! single producer and one or many consumer threads, with no dynamic
//! allocation on the hot path.
//!
//! Two concurrency variants are provided, each over three payload shapes:
//!
//! - `SCSP` — single concurrent producer, single concurrent consumer. Both
//!   sides own a private cursor plus a cached mirror of the opposite cursor,
//!   so the common case touches a single cache line.
//! - `MCSP` — single producer, multiple concurrent consumers. Consumers
//!   reserve slots via CAS on a tagged cursor word; the producer reclaims
//!   space by folding the per-reader announced positions.
//!
//! All backing memory (slot rings, byte arenas, reader tables) is obtained
//! once at construction through a [`BlockAllocator`](Core::alloc::BlockAllocator)
//! handle and returned when the queue drops.

// Module naming follows project convention (SCSP/MCSP = concurrency variants)
#[allow(non_snake_case)]
pub mod SCSP;

#[allow(non_snake_case)]
pub mod MCSP;

// Single-threaded function queue; same slot/arena machinery, no atomics.
#[allow(non_snake_case)]
pub mod Unsync;

#[allow(non_snake_case)]
pub mod Core {
    pub mod alloc;
    pub mod arena;
    pub mod cursor;
    pub mod function;
    pub mod futex;
    pub mod tagged;
}

// Debug implementations for various types
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

mod builder;
mod error;

pub use builder::QueueBuilder;
pub use error::BuildError;

pub use Core::alloc::{BlockAllocator, SystemAlloc};
pub use Core::function::{
    CallMode, CallMutWith, CallOnceWith, Function, InvokeMultiple, InvokeOnce, InvokeOnceDNI, ModeShim,
};

pub use MCSP::buffer::BufferQueueMCSP;
pub use MCSP::function::FunctionQueueMCSP;
pub use MCSP::object::ObjectQueueMCSP;
pub use SCSP::buffer::BufferQueueSCSP;
pub use SCSP::function::FunctionQueueSCSP;
pub use SCSP::object::ObjectQueueSCSP;
pub use Unsync::function::FunctionQueue;
