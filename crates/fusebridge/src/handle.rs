//! Single-release ownership of opaque native pointers.

use std::fmt;
use std::ptr::{self, NonNull};

use parking_lot::RwLock;

/// Function releasing one native pointer.
pub type Release<T> = unsafe fn(*mut T);

/// Owns one opaque native pointer and releases it exactly once.
///
/// Release happens on whichever comes first of an explicit [`release`]
/// and `Drop`. Native calls run inside [`with_handle`], which holds a shared
/// lock on the pointer; release takes the exclusive lock, so it waits for
/// every call already in flight and the pointer is never freed under one.
/// Racing releases from different threads still invoke the release function
/// once. After release the handle is empty: [`with_handle`] passes null,
/// which the native side rejects with an invalid-argument status.
///
/// [`release`]: NativeHandle::release
/// [`with_handle`]: NativeHandle::with_handle
pub struct NativeHandle<T> {
    ptr: RwLock<*mut T>,
    release: Release<T>,
}

// SAFETY: the pointee is only reached through native entry points that
// accept calls from any thread; the lock orders those calls before release
unsafe impl<T> Send for NativeHandle<T> {}
// SAFETY: as above
unsafe impl<T> Sync for NativeHandle<T> {}

impl<T> NativeHandle<T> {
    /// Take ownership of `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer that nothing else releases, and
    /// `release` must be safe to call once with it from any thread.
    pub unsafe fn wrap(ptr: *mut T, release: Release<T>) -> Self {
        Self {
            ptr: RwLock::new(ptr),
            release,
        }
    }

    /// Take the pointer out without releasing it.
    ///
    /// Waits for native calls running in [`with_handle`](Self::with_handle)
    /// to return. The caller becomes responsible for releasing the returned
    /// pointer. Returns `None` if the handle was already released or taken.
    pub fn take(&self) -> Option<NonNull<T>> {
        NonNull::new(std::mem::replace(&mut *self.ptr.write(), ptr::null_mut()))
    }

    /// Release the pointer if it has not been released yet.
    ///
    /// Returns `true` if this call performed the release.
    pub fn release(&self) -> bool {
        match self.take() {
            Some(ptr) => {
                // SAFETY: take() handed this call exclusive ownership of ptr
                unsafe { (self.release)(ptr.as_ptr()) };
                true
            }
            None => false,
        }
    }

    /// Whether the pointer has been released or taken.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.ptr.read().is_null()
    }

    /// Run a native call with the current pointer, or null once released.
    ///
    /// The pointer stays valid until `f` returns. `f` must not release or
    /// take this same handle.
    pub fn with_handle<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        let guard = self.ptr.read();
        f(*guard)
    }
}

impl<T> Drop for NativeHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> fmt::Debug for NativeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr = self.ptr.try_read().map(|guard| *guard);
        f.debug_struct("NativeHandle").field("ptr", &ptr).finish()
    }
}
