//! Erased-callable machinery shared by the function queues.
//!
//! A queued callable is flattened into a [`FnSlot`]: a pointer into the byte
//! arena where the closure state lives, a monomorphized invoke shim, and an
//! optional destructor shim. Which shims are stored is decided by the call
//! mode marker ([`InvokeOnce`], [`InvokeOnceDNI`], [`InvokeMultiple`]);
//! stateless callables carve zero arena bytes and the shims conjure them
//! from a dangling pointer.

use std::marker::PhantomData;
use std::mem::{needs_drop, size_of};
use std::ptr::NonNull;

use super::arena::{Arena, ArenaCursors};

/// Callable invocable once with an argument tuple. Bridges `FnOnce(a, b)`
/// bounds to the single-type-parameter form the erased slots need.
pub trait CallOnceWith<A> {
    type Output;
    fn call_once_with(self, args: A) -> Self::Output;
}

/// Callable invocable repeatedly with an argument tuple.
pub trait CallMutWith<A>: CallOnceWith<A> {
    fn call_mut_with(&mut self, args: A) -> Self::Output;
}

macro_rules! impl_call_with {
    ($(($T:ident, $v:ident)),*) => {
        impl<Fun, Out, $($T,)*> CallOnceWith<($($T,)*)> for Fun
        where
            Fun: FnOnce($($T),*) -> Out,
        {
            type Output = Out;
            #[inline]
            fn call_once_with(self, args: ($($T,)*)) -> Out {
                let ($($v,)*) = args;
                self($($v),*)
            }
        }

        impl<Fun, Out, $($T,)*> CallMutWith<($($T,)*)> for Fun
        where
            Fun: FnMut($($T),*) -> Out,
        {
            #[inline]
            fn call_mut_with(&mut self, args: ($($T,)*)) -> Out {
                let ($($v,)*) = args;
                self($($v),*)
            }
        }
    };
}

impl_call_with!();
impl_call_with!((A0, a0));
impl_call_with!((A0, a0), (A1, a1));
impl_call_with!((A0, a0), (A1, a1), (A2, a2));
impl_call_with!((A0, a0), (A1, a1), (A2, a2), (A3, a3));
impl_call_with!((A0, a0), (A1, a1), (A2, a2), (A3, a3), (A4, a4));

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::InvokeOnce {}
    impl Sealed for super::InvokeOnceDNI {}
    impl Sealed for super::InvokeMultiple {}
}

/// Call-mode marker deciding when a queued callable is destroyed.
pub trait CallMode: sealed::Sealed + 'static {
    /// Whether slots carry a destructor shim for residual cleanup.
    #[doc(hidden)]
    const STORE_DROP: bool;
}

/// Invoke and destroy in one step; slots store no destructor, residual
/// callables are never destroyed.
pub struct InvokeOnce;

/// Invoke destroys the callable; a wrapper dropped without invoking runs the
/// stored destructor instead, and the queue destructor cleans residual slots.
pub struct InvokeOnceDNI;

/// Invocation leaves the callable live; it is destroyed when the consumer's
/// wrapper drops, or by the queue destructor for residual slots.
pub struct InvokeMultiple;

impl CallMode for InvokeOnce {
    const STORE_DROP: bool = false;
}
impl CallMode for InvokeOnceDNI {
    const STORE_DROP: bool = true;
}
impl CallMode for InvokeMultiple {
    const STORE_DROP: bool = true;
}

/// Mode-specific selection of the invoke shim for a concrete callable type.
/// The once-modes accept `FnOnce` callables; `InvokeMultiple` requires
/// `FnMut` since the state survives the call.
pub trait ModeShim<F, A, R>: CallMode {
    #[doc(hidden)]
    fn invoke_shim() -> fn(*mut u8, A) -> R;
}

impl<F, A, R> ModeShim<F, A, R> for InvokeOnce
where
    F: CallOnceWith<A, Output = R>,
{
    fn invoke_shim() -> fn(*mut u8, A) -> R {
        invoke_and_destroy::<F, A, R>
    }
}

impl<F, A, R> ModeShim<F, A, R> for InvokeOnceDNI
where
    F: CallOnceWith<A, Output = R>,
{
    fn invoke_shim() -> fn(*mut u8, A) -> R {
        invoke_and_destroy::<F, A, R>
    }
}

impl<F, A, R> ModeShim<F, A, R> for InvokeMultiple
where
    F: CallMutWith<A, Output = R>,
{
    fn invoke_shim() -> fn(*mut u8, A) -> R {
        invoke_in_place::<F, A, R>
    }
}

/// Pointer to the callable state: the arena pointer for stateful callables,
/// an aligned dangling pointer for zero-sized ones (whose slot keeps the
/// arena-head pointer purely for tail derivation).
#[inline]
fn payload_ptr<F>(obj: *mut u8) -> *mut F {
    if size_of::<F>() == 0 {
        NonNull::<F>::dangling().as_ptr()
    } else {
        obj.cast()
    }
}

fn invoke_and_destroy<F, A, R>(obj: *mut u8, args: A) -> R
where
    F: CallOnceWith<A, Output = R>,
{
    let f = unsafe { std::ptr::read(payload_ptr::<F>(obj)) };
    f.call_once_with(args)
}

fn invoke_in_place<F, A, R>(obj: *mut u8, args: A) -> R
where
    F: CallMutWith<A, Output = R>,
{
    let f = unsafe { &mut *payload_ptr::<F>(obj) };
    f.call_mut_with(args)
}

fn drop_shim<F>(obj: *mut u8) {
    unsafe { std::ptr::drop_in_place(payload_ptr::<F>(obj)) };
}

/// Erased function descriptor stored in a function-queue slot.
pub(crate) struct FnSlot<A, R> {
    obj: *mut u8,
    invoke: fn(*mut u8, A) -> R,
    drop_fn: Option<fn(*mut u8)>,
}

impl<A, R> Clone for FnSlot<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<A, R> Copy for FnSlot<A, R> {}

impl<A, R> FnSlot<A, R> {
    /// Build the descriptor for a callable already written at `obj`.
    pub(crate) fn erase<M, F>(obj: *mut u8) -> Self
    where
        M: ModeShim<F, A, R>,
    {
        let drop_fn = if M::STORE_DROP && needs_drop::<F>() {
            Some(drop_shim::<F> as fn(*mut u8))
        } else {
            None
        };
        Self {
            obj,
            invoke: M::invoke_shim(),
            drop_fn,
        }
    }

    pub(crate) fn obj_ptr(&self) -> *mut u8 {
        self.obj
    }

    /// Destroy a callable that was published but never consumed.
    pub(crate) fn destroy_residual(&self) {
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(self.obj);
        }
    }
}

/// Find arena storage for a callable of type `F` without committing it.
/// Returns the object pointer and the arena head after the write. Zero-sized
/// callables take no arena bytes and leave the head in place.
pub(crate) fn callable_storage<F>(arena: &Arena, cur: &ArenaCursors) -> Option<(*mut u8, usize)> {
    if size_of::<F>() == 0 {
        return Some((arena.at(cur.head), cur.head));
    }
    let span = arena.carve(cur, size_of::<F>(), std::mem::align_of::<F>())?;
    Some((span.ptr, arena.offset_of(span.ptr) + span.len))
}

/// Write the callable into its reserved storage.
///
/// # Safety
/// `obj` must come from [`callable_storage::<F>`] against live cursors.
pub(crate) unsafe fn write_callable<F>(obj: *mut u8, f: F) {
    std::ptr::write(payload_ptr::<F>(obj), f);
}

/// Consumer-side handle to one queued callable, handed to the consume
/// functor. The call-mode parameter decides the `call` signature and what
/// happens on drop:
///
/// - [`InvokeOnce`]: `call(self, args)` invokes and destroys; dropping an
///   uninvoked wrapper does nothing.
/// - [`InvokeOnceDNI`]: `call(self, args)` invokes and destroys; dropping an
///   uninvoked wrapper destroys without invoking.
/// - [`InvokeMultiple`]: `call(&self, args)` any number of times; the
///   callable is destroyed when the wrapper drops.
pub struct Function<'a, A, R, M: CallMode> {
    slot: FnSlot<A, R>,
    spent: bool,
    _mode: PhantomData<M>,
    _queue: PhantomData<&'a ()>,
}

impl<A, R, M: CallMode> Function<'_, A, R, M> {
    pub(crate) fn new(slot: FnSlot<A, R>) -> Self {
        Self {
            slot,
            spent: false,
            _mode: PhantomData,
            _queue: PhantomData,
        }
    }
}

impl<A, R> Function<'_, A, R, InvokeOnce> {
    pub fn call(mut self, args: A) -> R {
        self.spent = true;
        (self.slot.invoke)(self.slot.obj, args)
    }
}

impl<A, R> Function<'_, A, R, InvokeOnceDNI> {
    pub fn call(mut self, args: A) -> R {
        self.spent = true;
        (self.slot.invoke)(self.slot.obj, args)
    }
}

impl<A, R> Function<'_, A, R, InvokeMultiple> {
    pub fn call(&self, args: A) -> R {
        (self.slot.invoke)(self.slot.obj, args)
    }
}

impl<A, R, M: CallMode> Drop for Function<'_, A, R, M> {
    fn drop(&mut self) {
        if !self.spent {
            self.slot.destroy_residual();
        }
    }
}
