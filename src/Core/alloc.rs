//! External aligned-allocator handle.
//!
//! Queues never allocate from the system allocator on the hot path: every
//! backing block (slot ring, byte arena, reader table) is requested once at
//! construction through a [`BlockAllocator`] and handed back on drop. The
//! trait object is held behind an `Arc` so producer and consumer handles can
//! share it.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::BuildError;

/// Vendor of aligned raw memory blocks.
///
/// `allocate_bytes` returns null on failure; `deallocate_bytes` is called
/// exactly once per successful allocation, with the original size and
/// alignment.
pub trait BlockAllocator: Send + Sync {
    fn allocate_bytes(&self, size: usize, align: usize) -> *mut u8;
    fn deallocate_bytes(&self, ptr: *mut u8, size: usize, align: usize);
}

/// Default allocator backed by `std::alloc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAlloc;

impl BlockAllocator for SystemAlloc {
    fn allocate_bytes(&self, size: usize, align: usize) -> *mut u8 {
        // Zero-byte requests get a well-aligned sentinel rather than null,
        // so callers cannot mistake them for allocation failure.
        match Layout::from_size_align(size, align) {
            Ok(_) if size == 0 => align as *mut u8,
            Ok(layout) => unsafe { alloc(layout) },
            Err(_) => std::ptr::null_mut(),
        }
    }

    fn deallocate_bytes(&self, ptr: *mut u8, size: usize, align: usize) {
        if size == 0 {
            return;
        }
        if let Ok(layout) = Layout::from_size_align(size, align) {
            unsafe { dealloc(ptr, layout) };
        }
    }
}

/// Allocate an array of `len` elements of `X` through the handle.
///
/// Zero-sized element types never touch the allocator; the array is an
/// aligned dangling pointer, the same convention `payload_ptr` uses for
/// zero-sized callables.
pub(crate) fn alloc_array<X>(allocator: &Arc<dyn BlockAllocator>, len: usize) -> Result<*mut X, BuildError> {
    if std::mem::size_of::<X>() == 0 {
        return Ok(NonNull::<X>::dangling().as_ptr());
    }
    let bytes = len
        .checked_mul(std::mem::size_of::<X>())
        .ok_or(BuildError::AllocationFailed {
            bytes: usize::MAX,
            align: std::mem::align_of::<X>(),
        })?;
    let align = std::mem::align_of::<X>();
    let ptr = allocator.allocate_bytes(bytes, align);
    if ptr.is_null() {
        return Err(BuildError::AllocationFailed { bytes, align });
    }
    Ok(ptr.cast())
}

/// Return an array obtained from [`alloc_array`].
pub(crate) fn dealloc_array<X>(allocator: &Arc<dyn BlockAllocator>, ptr: *mut X, len: usize) {
    if std::mem::size_of::<X>() == 0 {
        return;
    }
    allocator.deallocate_bytes(
        ptr.cast(),
        len * std::mem::size_of::<X>(),
        std::mem::align_of::<X>(),
    );
}

/// Allocate the raw byte arena.
pub(crate) fn alloc_bytes(
    allocator: &Arc<dyn BlockAllocator>,
    bytes: usize,
    align: usize,
) -> Result<*mut u8, BuildError> {
    let ptr = allocator.allocate_bytes(bytes, align);
    if ptr.is_null() {
        return Err(BuildError::AllocationFailed { bytes, align });
    }
    Ok(ptr)
}
