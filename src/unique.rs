use crate::error::null_access;
use crate::raw::Uninit;
use crate::{Error, Result};

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use alloc::boxed::Box;

/// An owning pointer to a heap allocation that can never be shared.
///
/// A `UniquePointer` is either empty or the sole owner of one `T`, which is
/// destroyed exactly once when the pointer is dropped or [`reset`]. It cannot
/// be cloned; ownership only moves. [`take`] moves ownership out of a place
/// while leaving an empty pointer behind.
///
/// Dereferencing an empty `UniquePointer` panics. Use [`get`] or [`try_get`]
/// for checked access.
///
/// # Examples
/// ```
/// use ctrlptr::UniquePointer;
///
/// let mut a = UniquePointer::make(5);
/// let b = a.take();
///
/// assert!(a.is_null());
/// assert_eq!(*b, 5);
/// ```
///
/// [`reset`]: UniquePointer::reset
/// [`take`]: UniquePointer::take
/// [`get`]: UniquePointer::get
/// [`try_get`]: UniquePointer::try_get
pub struct UniquePointer<T> {
    ptr: Option<NonNull<T>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for UniquePointer<T> {}
unsafe impl<T: Sync> Sync for UniquePointer<T> {}

impl<T> UniquePointer<T> {
    /// Constructs an empty `UniquePointer`.
    pub const fn new() -> UniquePointer<T> {
        UniquePointer {
            ptr: None,
            _marker: PhantomData,
        }
    }

    /// Allocates `value` on the heap and takes ownership of it.
    pub fn make(value: T) -> UniquePointer<T> {
        UniquePointer::from_box(Box::new(value))
    }

    /// Allocates a default-constructed `T`.
    pub fn make_default() -> UniquePointer<T>
    where
        T: Default,
    {
        UniquePointer::make_with(T::default)
    }

    /// Allocates storage and then constructs the payload into it with `f`.
    /// If `f` panics, the storage is released before the panic propagates.
    pub fn make_with<F>(f: F) -> UniquePointer<T>
    where
        F: FnOnce() -> T,
    {
        let slot = Uninit::new();
        let value = f();
        UniquePointer::fill(slot, value)
    }

    /// Like [`make`], but reports allocation failure instead of aborting.
    ///
    /// [`make`]: UniquePointer::make
    pub fn try_make(value: T) -> Result<UniquePointer<T>> {
        let slot = Uninit::try_new()?;
        Ok(UniquePointer::fill(slot, value))
    }

    /// Allocates storage and constructs the payload with a fallible `f`.
    ///
    /// Allocation failure is converted into the caller's error type. If `f`
    /// fails, the storage is released and its error is returned unchanged.
    ///
    /// # Examples
    /// ```
    /// use ctrlptr::{Error, UniquePointer};
    ///
    /// let ok: Result<_, Error> = UniquePointer::try_make_with(|| Ok(3));
    /// assert_eq!(*ok.unwrap(), 3);
    ///
    /// let failed = UniquePointer::<u8>::try_make_with(|| Err(Error::NullAccess));
    /// assert!(failed.is_err());
    /// ```
    pub fn try_make_with<F, E>(f: F) -> core::result::Result<UniquePointer<T>, E>
    where
        F: FnOnce() -> core::result::Result<T, E>,
        E: From<Error>,
    {
        let slot = Uninit::try_new()?;
        let value = f()?;
        Ok(UniquePointer::fill(slot, value))
    }

    fn fill(slot: Uninit<T>, value: T) -> UniquePointer<T> {
        unsafe {
            slot.as_ptr().write(value);
        }

        UniquePointer {
            ptr: Some(slot.into_raw()),
            _marker: PhantomData,
        }
    }

    /// Takes ownership of a boxed value.
    pub fn from_box(value: Box<T>) -> UniquePointer<T> {
        UniquePointer {
            ptr: Some(unsafe { NonNull::new_unchecked(Box::into_raw(value)) }),
            _marker: PhantomData,
        }
    }

    /// Takes ownership of a raw pointer. A null pointer yields an empty
    /// `UniquePointer`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from [`Box::into_raw`] or
    /// [`UniquePointer::into_raw`], and must not be owned by anything else.
    pub unsafe fn from_raw(ptr: *mut T) -> UniquePointer<T> {
        UniquePointer {
            ptr: NonNull::new(ptr),
            _marker: PhantomData,
        }
    }

    /// Gives up ownership without destroying the payload. Returns null for
    /// an empty pointer.
    pub fn into_raw(self) -> *mut T {
        let ptr = self.as_mut_ptr();
        mem::forget(self);
        ptr
    }

    /// Converts back into a `Box`, or `None` if empty.
    pub fn into_box(self) -> Option<Box<T>> {
        let ptr = self.into_raw();
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(ptr) })
        }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    pub fn get(&self) -> Option<&T> {
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.ptr.map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    pub fn try_get(&self) -> Result<&T> {
        self.get().ok_or(Error::NullAccess)
    }

    pub fn try_get_mut(&mut self) -> Result<&mut T> {
        self.get_mut().ok_or(Error::NullAccess)
    }

    pub fn as_ptr(&self) -> *const T {
        self.as_mut_ptr()
    }

    fn as_mut_ptr(&self) -> *mut T {
        self.ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    pub fn take(&mut self) -> UniquePointer<T> {
        mem::take(self)
    }

    /// Destroys the payload now, leaving this pointer empty.
    pub fn reset(&mut self) {
        *self = UniquePointer::new();
    }

    /// Destroys the current payload, then takes ownership of `other`'s.
    pub fn replace(&mut self, other: UniquePointer<T>) {
        self.reset();
        *self = other;
    }
}

impl<T> Default for UniquePointer<T> {
    fn default() -> UniquePointer<T> {
        UniquePointer::new()
    }
}

impl<T> From<Box<T>> for UniquePointer<T> {
    fn from(value: Box<T>) -> UniquePointer<T> {
        UniquePointer::from_box(value)
    }
}

impl<T> Deref for UniquePointer<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(value) => value,
            None => null_access("UniquePointer"),
        }
    }
}

impl<T> DerefMut for UniquePointer<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.get_mut() {
            Some(value) => value,
            None => null_access("UniquePointer"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for UniquePointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("UniquePointer").field(value).finish(),
            None => f.write_str("UniquePointer(null)"),
        }
    }
}

impl<T> Drop for UniquePointer<T> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe {
                let _ = Box::from_raw(ptr.as_ptr());
            }
        }
    }
}

#[cfg(feature = "stable_deref_trait")]
unsafe impl<T> stable_deref_trait::StableDeref for UniquePointer<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;

    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Test(Arc<AtomicUsize>);

    impl Drop for Test {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn drop_destroys_once() {
        let counter = Arc::new(AtomicUsize::new(0));

        let owned = UniquePointer::make(Test(counter.clone()));
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        core::mem::drop(owned);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn take_moves_ownership() {
        let counter = Arc::new(AtomicUsize::new(0));

        let mut a = UniquePointer::make(Test(counter.clone()));
        let mut b = UniquePointer::make(Test(counter.clone()));
        assert!(!b.is_null());

        b = a.take();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(a.is_null());
        assert!(!b.is_null());
        assert_eq!(a.try_get().err(), Some(Error::NullAccess));

        core::mem::drop(a);
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        core::mem::drop(b);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    #[should_panic(expected = "UniquePointer dereferenced while empty")]
    fn deref_empty_panics() {
        let empty: UniquePointer<u32> = UniquePointer::new();
        let _value: u32 = *empty;
    }

    #[test]
    fn reset_destroys_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));

        let mut owned = UniquePointer::make_with(|| Test(counter.clone()));
        owned.reset();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(owned.is_null());

        owned.reset();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn replace_destroys_previous_first() {
        let counter = Arc::new(AtomicUsize::new(0));
        let replacement = Arc::new(AtomicUsize::new(0));

        let mut owned = UniquePointer::make(Test(counter.clone()));
        owned.replace(UniquePointer::make(Test(replacement.clone())));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(Arc::ptr_eq(&owned.0, &replacement));

        owned.replace(UniquePointer::new());
        assert!(owned.is_null());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(replacement.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn factories() {
        let default: UniquePointer<u64> = UniquePointer::make_default();
        assert_eq!(*default, 0);

        let mut tried = UniquePointer::try_make([7u8; 3]).unwrap();
        tried[1] = 9;
        assert_eq!(*tried, [7, 9, 7]);

        let unit = UniquePointer::make(());
        assert!(!unit.is_null());
    }

    #[test]
    fn failed_construction_propagates() {
        let result = UniquePointer::<Test>::try_make_with(|| Err(Error::NullAccess));
        assert_eq!(result.err(), Some(Error::NullAccess));

        let panicked = std::panic::catch_unwind(|| {
            UniquePointer::<u32>::make_with(|| panic!("constructor failed"))
        });
        assert!(panicked.is_err());
    }

    #[test]
    fn raw_round_trip_keeps_single_owner() {
        let counter = Arc::new(AtomicUsize::new(0));

        let raw = UniquePointer::make(Test(counter.clone())).into_raw();
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        let owned = unsafe { UniquePointer::from_raw(raw) };
        let boxed = owned.into_box().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        core::mem::drop(boxed);
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        let empty = unsafe { UniquePointer::<u8>::from_raw(core::ptr::null_mut()) };
        assert!(empty.is_null());
        assert!(empty.into_box().is_none());
    }

    #[test]
    fn debug_output() {
        use std::format;

        assert_eq!(format!("{:?}", UniquePointer::make(4)), "UniquePointer(4)");
        assert_eq!(format!("{:?}", UniquePointer::<i32>::new()), "UniquePointer(null)");
    }
}
