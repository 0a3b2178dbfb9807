use crate::control::{Combined, ControlBlock, Link, Separate};
use crate::error::null_access;
use crate::raw::Uninit;
use crate::{Error, Result, UniquePointer, WeakPointer};

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::Deref;
use core::ptr;

use alloc::boxed::Box;

/// A reference-counted pointer providing shared ownership of a `T`.
///
/// Every non-empty `SharedPointer` counts as one strong reference in the
/// control block of its object. Cloning increments the count; dropping
/// decrements it, and the drop that brings it to zero destroys the payload.
/// The counts are atomic, so clones may be dropped concurrently from any
/// number of threads. The payload itself is only ever handed out by shared
/// reference; see [`get_mut`] for the exception.
///
/// The preferred constructor is [`make_shared`], which places the control
/// block and the payload in a single allocation. [`from_box`] and the `From`
/// conversions adopt an existing allocation and allocate the control block
/// separately.
///
/// # Examples
/// ```
/// use ctrlptr::SharedPointer;
///
/// let a = SharedPointer::make_shared(5);
/// let b = a.clone();
/// assert_eq!(a.use_count(), 2);
///
/// drop(b);
/// assert_eq!(a.use_count(), 1);
/// assert_eq!(*a, 5);
/// ```
///
/// [`get_mut`]: SharedPointer::get_mut
/// [`make_shared`]: SharedPointer::make_shared
/// [`from_box`]: SharedPointer::from_box
pub struct SharedPointer<T> {
    pub(crate) link: Option<Link<T>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for SharedPointer<T> {}
unsafe impl<T: Send + Sync> Sync for SharedPointer<T> {}

impl<T> SharedPointer<T> {
    /// Constructs an empty `SharedPointer`.
    pub const fn new() -> SharedPointer<T> {
        SharedPointer {
            link: None,
            _marker: PhantomData,
        }
    }

    /// Adopts a strong reference that has already been counted.
    pub(crate) unsafe fn from_link(link: Link<T>) -> SharedPointer<T> {
        SharedPointer {
            link: Some(link),
            _marker: PhantomData,
        }
    }

    /// Allocates the control block and `value` together.
    pub fn make_shared(value: T) -> SharedPointer<T> {
        SharedPointer::make_shared_with(move || value)
    }

    /// Like [`make_shared`](SharedPointer::make_shared) with a
    /// default-constructed payload.
    pub fn make_shared_default() -> SharedPointer<T>
    where
        T: Default,
    {
        SharedPointer::make_shared_with(T::default)
    }

    /// Allocates the combined storage and then constructs the payload with
    /// `f`. If `f` panics, the storage is released before the panic
    /// propagates.
    pub fn make_shared_with<F>(f: F) -> SharedPointer<T>
    where
        F: FnOnce() -> T,
    {
        let slot = Uninit::new();
        let value = f();
        unsafe { SharedPointer::from_link(Combined::init(slot, value)) }
    }

    /// Like [`make_shared`](SharedPointer::make_shared), but reports
    /// allocation failure instead of aborting.
    pub fn try_make_shared(value: T) -> Result<SharedPointer<T>> {
        SharedPointer::try_make_shared_with(move || Ok(value))
    }

    /// Allocates the combined storage and constructs the payload with a
    /// fallible `f`. On any failure nothing stays allocated.
    ///
    /// # Examples
    /// ```
    /// use ctrlptr::{Error, SharedPointer};
    ///
    /// #[derive(Debug)]
    /// enum ParseError {
    ///     Alloc(Error),
    ///     Invalid,
    /// }
    ///
    /// impl From<Error> for ParseError {
    ///     fn from(err: Error) -> ParseError {
    ///         ParseError::Alloc(err)
    ///     }
    /// }
    ///
    /// let parsed = SharedPointer::try_make_shared_with(|| {
    ///     "42".parse::<u32>().map_err(|_| ParseError::Invalid)
    /// });
    /// assert_eq!(*parsed.unwrap(), 42);
    ///
    /// let failed = SharedPointer::try_make_shared_with(|| {
    ///     "x".parse::<u32>().map_err(|_| ParseError::Invalid)
    /// });
    /// assert!(matches!(failed, Err(ParseError::Invalid)));
    /// ```
    pub fn try_make_shared_with<F, E>(f: F) -> core::result::Result<SharedPointer<T>, E>
    where
        F: FnOnce() -> core::result::Result<T, E>,
        E: From<Error>,
    {
        let slot = Uninit::try_new()?;
        let value = f()?;
        Ok(unsafe { SharedPointer::from_link(Combined::init(slot, value)) })
    }

    /// Adopts a boxed value, allocating its control block separately.
    pub fn from_box(value: Box<T>) -> SharedPointer<T> {
        unsafe { SharedPointer::from_link(Separate::init(Uninit::new(), value)) }
    }

    /// Like [`from_box`](SharedPointer::from_box), but reports allocation
    /// failure of the control block. The value is dropped in that case.
    pub fn try_from_box(value: Box<T>) -> Result<SharedPointer<T>> {
        let slot = Uninit::try_new()?;
        Ok(unsafe { SharedPointer::from_link(Separate::init(slot, value)) })
    }

    /// Takes ownership of a raw pointer, allocating its control block
    /// separately. A null pointer yields an empty `SharedPointer`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from [`Box::into_raw`] or
    /// [`UniquePointer::into_raw`], and must not be owned by anything else.
    pub unsafe fn from_raw(ptr: *mut T) -> SharedPointer<T> {
        if ptr.is_null() {
            SharedPointer::new()
        } else {
            SharedPointer::from_box(Box::from_raw(ptr))
        }
    }

    /// Creates a [`WeakPointer`] observing this object.
    pub fn downgrade(&self) -> WeakPointer<T> {
        WeakPointer::from(self)
    }

    /// Number of strong references to the object, or 0 if empty. The value
    /// may be stale by the time it is read if other threads hold clones.
    pub fn use_count(&self) -> usize {
        self.link
            .map_or(0, |link| unsafe { ControlBlock::strong_count(link.block) })
    }

    /// Number of [`WeakPointer`]s observing the object, or 0 if empty.
    pub fn weak_count(&self) -> usize {
        self.link
            .map_or(0, |link| unsafe { ControlBlock::weak_count(link.block) })
    }

    pub fn is_null(&self) -> bool {
        self.link.is_none()
    }

    /// Whether both pointers share a control block. Two empty pointers are
    /// equal.
    pub fn ptr_eq(&self, other: &SharedPointer<T>) -> bool {
        Link::same_block(self.link.as_ref(), other.link.as_ref())
    }

    pub fn get(&self) -> Option<&T> {
        self.link.map(|link| unsafe { &*link.ptr.as_ptr() })
    }

    pub fn try_get(&self) -> Result<&T> {
        self.get().ok_or(Error::NullAccess)
    }

    /// Mutable access, available only while this is the sole reference of
    /// either kind to the object.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self.link {
            Some(link) if unsafe { ControlBlock::is_unique(link.block) } => {
                Some(unsafe { &mut *link.ptr.as_ptr() })
            }
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> *const T {
        self.link
            .map_or(ptr::null(), |link| link.ptr.as_ptr() as *const T)
    }

    pub fn take(&mut self) -> SharedPointer<T> {
        mem::take(self)
    }

    pub fn reset(&mut self) {
        *self = SharedPointer::new();
    }
}

impl<T> Clone for SharedPointer<T> {
    fn clone(&self) -> Self {
        if let Some(link) = self.link {
            unsafe {
                ControlBlock::retain_strong(link.block);
            }
        }

        SharedPointer {
            link: self.link,
            _marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if !self.ptr_eq(source) {
            *self = source.clone();
        }
    }
}

impl<T> Default for SharedPointer<T> {
    fn default() -> SharedPointer<T> {
        SharedPointer::new()
    }
}

impl<T> From<Box<T>> for SharedPointer<T> {
    fn from(value: Box<T>) -> SharedPointer<T> {
        SharedPointer::from_box(value)
    }
}

impl<T> From<UniquePointer<T>> for SharedPointer<T> {
    fn from(value: UniquePointer<T>) -> SharedPointer<T> {
        match value.into_box() {
            Some(value) => SharedPointer::from_box(value),
            None => SharedPointer::new(),
        }
    }
}

impl<T> Deref for SharedPointer<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(value) => value,
            None => null_access("SharedPointer"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("SharedPointer").field(value).finish(),
            None => f.write_str("SharedPointer(null)"),
        }
    }
}

impl<T> Drop for SharedPointer<T> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            unsafe {
                ControlBlock::release_strong(link.block);
            }
        }
    }
}

#[cfg(feature = "stable_deref_trait")]
unsafe impl<T> stable_deref_trait::StableDeref for SharedPointer<T> {}

#[cfg(feature = "stable_deref_trait")]
unsafe impl<T> stable_deref_trait::CloneStableDeref for SharedPointer<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;

    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Test(Arc<AtomicUsize>);

    impl Drop for Test {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test() {
        let counter = Arc::new(AtomicUsize::new(0));

        let shared = SharedPointer::make_shared(Test(counter.clone()));
        let mut copies = Vec::new();
        for _ in 0..10 {
            copies.push(shared.clone());
        }

        assert_eq!(shared.use_count(), 11);
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        core::mem::drop(shared);
        assert_eq!(copies[0].use_count(), 10);
        core::mem::drop(copies);

        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn use_count_tracks_live_clones() {
        let a = SharedPointer::make_shared(5);
        assert_eq!(a.use_count(), 1);

        let b = a.clone();
        assert_eq!(a.use_count(), 2);
        assert!(a.ptr_eq(&b));

        core::mem::drop(b);
        assert_eq!(a.use_count(), 1);

        let empty: SharedPointer<i32> = SharedPointer::new();
        assert_eq!(empty.use_count(), 0);
        assert_eq!(empty.weak_count(), 0);
        assert_eq!(empty.try_get(), Err(Error::NullAccess));
    }

    #[test]
    fn separate_allocation_behaves_alike() {
        let counter = Arc::new(AtomicUsize::new(0));

        let from_box = SharedPointer::from_box(Box::new(Test(counter.clone())));
        let from_unique = SharedPointer::from(UniquePointer::make(Test(counter.clone())));
        let raw = Box::into_raw(Box::new(Test(counter.clone())));
        let from_raw = unsafe { SharedPointer::from_raw(raw) };

        let clones = [from_box.clone(), from_unique.clone(), from_raw.clone()];
        assert_eq!(from_box.use_count(), 2);

        core::mem::drop(from_box);
        core::mem::drop(from_unique);
        core::mem::drop(from_raw);
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        core::mem::drop(clones);
        assert_eq!(counter.load(Ordering::Relaxed), 3);

        let empty = SharedPointer::from(UniquePointer::<Test>::new());
        assert!(empty.is_null());
        assert!(unsafe { SharedPointer::<u8>::from_raw(ptr::null_mut()) }.is_null());
    }

    #[test]
    fn clone_from_releases_previous_target() {
        let counter = Arc::new(AtomicUsize::new(0));

        let a = SharedPointer::make_shared(Test(counter.clone()));
        let mut b = SharedPointer::make_shared(Test(counter.clone()));

        b.clone_from(&a);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(a.use_count(), 2);

        b.clone_from(&a);
        assert_eq!(a.use_count(), 2);

        let mut c = a.clone();
        c.clone_from(&c.clone());
        assert_eq!(a.use_count(), 3);
    }

    #[test]
    fn take_and_reset() {
        let counter = Arc::new(AtomicUsize::new(0));

        let mut a = SharedPointer::make_shared_with(|| Test(counter.clone()));
        let mut b = a.take();
        assert!(a.is_null());
        assert_eq!(b.use_count(), 1);

        b.reset();
        assert!(b.is_null());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn get_mut_requires_sole_reference() {
        let mut a = SharedPointer::make_shared(1);
        *a.get_mut().unwrap() += 1;

        let b = a.clone();
        assert!(a.get_mut().is_none());
        core::mem::drop(b);

        let weak = a.downgrade();
        assert!(a.get_mut().is_none());
        core::mem::drop(weak);

        assert_eq!(a.get_mut(), Some(&mut 2));
    }

    #[test]
    #[should_panic(expected = "SharedPointer dereferenced while empty")]
    fn deref_empty_panics() {
        let empty: SharedPointer<u32> = SharedPointer::default();
        let _value: u32 = *empty;
    }

    #[test]
    fn failed_construction_propagates() {
        let result = SharedPointer::<Test>::try_make_shared_with(|| Err(Error::NullAccess));
        assert_eq!(result.err(), Some(Error::NullAccess));

        let panicked = std::panic::catch_unwind(|| {
            SharedPointer::<u32>::make_shared_with(|| panic!("constructor failed"))
        });
        assert!(panicked.is_err());

        let ok = SharedPointer::try_make_shared(3u8).unwrap();
        assert_eq!(*ok, 3);
        let boxed = SharedPointer::try_from_box(Box::new(4u8)).unwrap();
        assert_eq!(*boxed, 4);
    }

    #[test]
    fn zero_sized_payload() {
        let a: SharedPointer<()> = SharedPointer::make_shared_default();
        let b = a.clone();
        assert_eq!(*b, ());
        assert_eq!(a.use_count(), 2);
    }

    #[test]
    fn threads() {
        let counter = Arc::new(AtomicUsize::new(0));
        let shared = SharedPointer::make_shared(Test(counter.clone()));

        let mut threads = Vec::new();
        for _ in 0..16 {
            let shared = shared.clone();
            threads.push(std::thread::spawn(move || {
                let mut clones = Vec::new();
                for _ in 0..1000 {
                    clones.push(shared.clone());
                }
                assert!(shared.use_count() >= 1001);
            }));
        }

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(shared.use_count(), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        core::mem::drop(shared);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn debug_output() {
        use std::format;

        assert_eq!(format!("{:?}", SharedPointer::make_shared("x")), "SharedPointer(\"x\")");
        assert_eq!(format!("{:?}", SharedPointer::<u8>::new()), "SharedPointer(null)");
    }
}
