use crate::control::{ControlBlock, Link};
use crate::SharedPointer;

use core::fmt;

use log::trace;

/// A non-owning observer of an object managed by [`SharedPointer`]s.
///
/// A `WeakPointer` keeps the control block alive but never the payload. It
/// can be promoted back into a `SharedPointer` with [`lock`], which succeeds
/// only while at least one strong reference remains. Promotion is a single
/// atomic compare-and-increment, so it can never resurrect an object that
/// another thread is in the middle of destroying.
///
/// # Examples
/// ```
/// use ctrlptr::{SharedPointer, WeakPointer};
///
/// let shared = SharedPointer::make_shared(5);
/// let weak = WeakPointer::from(&shared);
/// assert_eq!(*weak.lock(), 5);
///
/// drop(shared);
/// assert!(weak.expired());
/// assert!(weak.lock().is_null());
/// ```
///
/// [`lock`]: WeakPointer::lock
pub struct WeakPointer<T> {
    link: Option<Link<T>>,
}

unsafe impl<T: Send + Sync> Send for WeakPointer<T> {}
unsafe impl<T: Send + Sync> Sync for WeakPointer<T> {}

impl<T> WeakPointer<T> {
    /// Constructs an empty `WeakPointer`, which is always expired.
    pub const fn new() -> WeakPointer<T> {
        WeakPointer { link: None }
    }

    /// Starts observing the object owned by `shared` instead, releasing the
    /// previously observed control block.
    pub fn assign(&mut self, shared: &SharedPointer<T>) {
        *self = WeakPointer::from(shared);
    }

    /// Whether the object is gone (or was never there).
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Promotes to a strong reference, or returns an empty `SharedPointer` if
    /// the object has already been destroyed.
    pub fn lock(&self) -> SharedPointer<T> {
        self.upgrade().unwrap_or_default()
    }

    /// Like [`lock`](WeakPointer::lock), with failure reported as `None`.
    pub fn upgrade(&self) -> Option<SharedPointer<T>> {
        let link = self.link?;
        if unsafe { ControlBlock::try_retain_strong(link.block) } {
            Some(unsafe { SharedPointer::from_link(link) })
        } else {
            trace!("promotion failed, object already destroyed");
            None
        }
    }

    /// Number of strong references to the object, or 0 if empty.
    pub fn use_count(&self) -> usize {
        self.link
            .map_or(0, |link| unsafe { ControlBlock::strong_count(link.block) })
    }

    /// Number of `WeakPointer`s observing the object, including this one, or
    /// 0 if empty. May read one high while another thread is destroying the
    /// payload.
    pub fn weak_count(&self) -> usize {
        self.link
            .map_or(0, |link| unsafe { ControlBlock::weak_count(link.block) })
    }

    pub fn reset(&mut self) {
        *self = WeakPointer::new();
    }

    /// Whether both pointers observe the same control block. Two empty
    /// pointers are equal.
    pub fn ptr_eq(&self, other: &WeakPointer<T>) -> bool {
        Link::same_block(self.link.as_ref(), other.link.as_ref())
    }
}

impl<T> From<&SharedPointer<T>> for WeakPointer<T> {
    fn from(shared: &SharedPointer<T>) -> WeakPointer<T> {
        if let Some(link) = shared.link {
            unsafe {
                ControlBlock::retain_weak(link.block);
            }
        }

        WeakPointer { link: shared.link }
    }
}

impl<T> Clone for WeakPointer<T> {
    fn clone(&self) -> Self {
        if let Some(link) = self.link {
            unsafe {
                ControlBlock::retain_weak(link.block);
            }
        }

        WeakPointer { link: self.link }
    }
}

impl<T> Default for WeakPointer<T> {
    fn default() -> WeakPointer<T> {
        WeakPointer::new()
    }
}

impl<T> fmt::Debug for WeakPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(WeakPointer)")
    }
}

impl<T> Drop for WeakPointer<T> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            unsafe {
                ControlBlock::release_weak(link.block);
            }
        }
    }
}
