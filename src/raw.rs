use crate::{Error, Result};

use core::marker::PhantomData;
use core::mem;
use core::ptr::NonNull;

use alloc::alloc::{alloc, dealloc, handle_alloc_error, Layout};

use log::debug;

/// Uninitialized heap storage for one `T`.
///
/// The storage is returned to the allocator when an `Uninit` is dropped, so a
/// factory that bails out (by error or by panic) between allocating and
/// publishing leaves nothing behind. Call [`into_raw`] once the storage has
/// been fully initialized.
///
/// [`into_raw`]: Uninit::into_raw
pub(crate) struct Uninit<T> {
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

impl<T> Uninit<T> {
    pub(crate) fn try_new() -> Result<Uninit<T>> {
        let layout = Layout::new::<T>();
        if layout.size() == 0 {
            return Ok(Uninit {
                ptr: NonNull::dangling(),
                _marker: PhantomData,
            });
        }

        let raw = unsafe { alloc(layout) } as *mut T;
        match NonNull::new(raw) {
            Some(ptr) => Ok(Uninit {
                ptr,
                _marker: PhantomData,
            }),
            None => {
                debug!(
                    "allocator refused {} bytes (align {})",
                    layout.size(),
                    layout.align()
                );
                Err(Error::AllocFailed {
                    size: layout.size(),
                    align: layout.align(),
                })
            }
        }
    }

    /// Like [`try_new`](Uninit::try_new), but diverges through
    /// `handle_alloc_error` on exhaustion.
    pub(crate) fn new() -> Uninit<T> {
        match Self::try_new() {
            Ok(slot) => slot,
            Err(_) => handle_alloc_error(Layout::new::<T>()),
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Gives up the rollback. The caller must have initialized the storage.
    pub(crate) fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl<T> Drop for Uninit<T> {
    fn drop(&mut self) {
        let layout = Layout::new::<T>();
        if layout.size() != 0 {
            unsafe {
                dealloc(self.ptr.as_ptr() as *mut u8, layout);
            }
        }
    }
}
