//! Inline change functors.
//!
//! A [`Change`] is a type-erased `FnMut(&mut S)` whose captured
//! environment lives inline in the change itself instead of behind a heap
//! pointer. That keeps the whole submit path allocation-free: a change is
//! built on the stack, moved into a recycled message node, and invoked by
//! the worker straight out of that node.
//!
//! Dispatch goes through two function pointers (call and drop), monomorphized
//! per closure type at construction. The capacity is a const generic with a
//! compile-time check, so an oversized capture is a build error, not a
//! runtime fallback.

use std::mem::{align_of, size_of, MaybeUninit};
use std::ptr;

/// Default closure storage, in bytes. Matches a couple of captured words
/// plus slack; raise the const parameter for bigger captures.
pub const DEFAULT_CHANGE_CAPACITY: usize = 32;

/// Alignment of the inline storage; captures with stricter alignment are
/// rejected at compile time.
const STORAGE_ALIGN: usize = 16;

#[repr(align(16))]
struct Storage<const CAP: usize>([MaybeUninit<u8>; CAP]);

/// A deferred mutation of a settings value, stored inline.
///
/// Built from any `FnMut(&mut S) + Send + 'static` whose size fits `CAP`
/// bytes. A default-constructed `Change` is a no-op, which is what
/// free-lists are preallocated with.
pub struct Change<S, const CAP: usize = DEFAULT_CHANGE_CAPACITY> {
    storage: Storage<CAP>,
    call: unsafe fn(*mut u8, &mut S),
    drop_fn: unsafe fn(*mut u8),
}

// Note on thread safety: `Change` is structurally Send (bytes plus
// function pointers), and that is sound because the only constructor
// taking a closure requires `F: Send`.

impl<S, const CAP: usize> Change<S, CAP> {
    /// Wrap a closure, storing its captures inline.
    ///
    /// The size and alignment checks are evaluated at compile time; a
    /// closure that does not fit fails the build at the `Change::new`
    /// call site.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(&mut S) + Send + 'static,
    {
        const {
            assert!(
                size_of::<F>() <= CAP,
                "change closure captures exceed the inline capacity"
            );
            assert!(
                align_of::<F>() <= STORAGE_ALIGN,
                "change closure requires stricter alignment than the inline storage"
            );
        }

        let mut change = Self {
            storage: Storage([MaybeUninit::uninit(); CAP]),
            call: call_erased::<S, F>,
            drop_fn: drop_erased::<F>,
        };
        // SAFETY: the const checks above guarantee the closure fits the
        // storage, size- and alignment-wise; the storage is uninitialized
        // and exclusively ours.
        unsafe {
            ptr::write(change.storage.0.as_mut_ptr().cast::<F>(), f);
        }
        change
    }

    /// Apply the change to `settings`.
    pub fn invoke(&mut self, settings: &mut S) {
        // SAFETY: `call` was monomorphized for exactly the closure type
        // sitting in `storage`.
        unsafe { (self.call)(self.storage.0.as_mut_ptr().cast::<u8>(), settings) }
    }
}

impl<S, const CAP: usize> Default for Change<S, CAP> {
    /// The no-op change.
    fn default() -> Self {
        Self {
            storage: Storage([MaybeUninit::uninit(); CAP]),
            call: call_noop::<S>,
            drop_fn: drop_noop,
        }
    }
}

impl<S, const CAP: usize> Drop for Change<S, CAP> {
    fn drop(&mut self) {
        // SAFETY: `drop_fn` matches the closure type in `storage`; after
        // this the bytes are dead and never touched again.
        unsafe { (self.drop_fn)(self.storage.0.as_mut_ptr().cast::<u8>()) }
    }
}

unsafe fn call_erased<S, F: FnMut(&mut S)>(storage: *mut u8, settings: &mut S) {
    let f = &mut *storage.cast::<F>();
    f(settings);
}

unsafe fn drop_erased<F>(storage: *mut u8) {
    ptr::drop_in_place(storage.cast::<F>());
}

unsafe fn call_noop<S>(_storage: *mut u8, _settings: &mut S) {}

unsafe fn drop_noop(_storage: *mut u8) {}
