use crate::raw::Uninit;

use core::ptr::{self, NonNull};
use core::sync::atomic::{self, AtomicUsize, Ordering};

use alloc::alloc::{dealloc, Layout};
use alloc::boxed::Box;

use log::trace;

/// Counts above this are refused. Forgotten clones cost no memory, so the
/// counters could otherwise be driven around to zero.
const MAX_REFCOUNT: usize = isize::MAX as usize;

#[cold]
fn refcount_overflow() -> ! {
    panic!("reference count overflow")
}

/// Reference counts for one managed object, plus the type-erased teardown
/// entry points matching the way that object was allocated.
///
/// `weak` includes one implicit reference held collectively by the strong
/// side. It is dropped by whoever releases the last strong reference, so the
/// block itself is freed exactly when the payload is gone and no
/// [`WeakPointer`] can still query it.
///
/// All operations take the block by raw pointer, since a release may free the
/// memory the block lives in.
///
/// [`WeakPointer`]: crate::WeakPointer
#[repr(C)]
pub(crate) struct ControlBlock {
    strong: AtomicUsize,
    weak: AtomicUsize,
    destroy: unsafe fn(NonNull<ControlBlock>),
    free: unsafe fn(NonNull<ControlBlock>),
}

impl ControlBlock {
    fn new(
        destroy: unsafe fn(NonNull<ControlBlock>),
        free: unsafe fn(NonNull<ControlBlock>),
    ) -> ControlBlock {
        ControlBlock {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            destroy,
            free,
        }
    }

    pub(crate) unsafe fn retain_strong(this: NonNull<ControlBlock>) {
        let strong = &(*this.as_ptr()).strong;
        if strong.fetch_add(1, Ordering::Relaxed) > MAX_REFCOUNT {
            strong.fetch_sub(1, Ordering::Relaxed);
            refcount_overflow();
        }
    }

    /// Increments the strong count only if it is still nonzero. Returns
    /// whether a strong reference was acquired.
    pub(crate) unsafe fn try_retain_strong(this: NonNull<ControlBlock>) -> bool {
        let strong = &(*this.as_ptr()).strong;
        let mut count = strong.load(Ordering::Relaxed);
        loop {
            if count == 0 {
                return false;
            }
            if count > MAX_REFCOUNT {
                refcount_overflow();
            }

            match strong.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => count = actual,
            }
        }
    }

    /// Drops one strong reference. The caller that takes the count to zero
    /// destroys the payload and then gives up the strong side's implicit weak
    /// reference.
    pub(crate) unsafe fn release_strong(this: NonNull<ControlBlock>) {
        if (*this.as_ptr()).strong.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);

        // Released even if the payload's destructor unwinds.
        let _implicit = ImplicitWeak(this);

        trace!("last strong reference released, destroying payload");
        let destroy = (*this.as_ptr()).destroy;
        destroy(this);
    }

    pub(crate) unsafe fn retain_weak(this: NonNull<ControlBlock>) {
        let weak = &(*this.as_ptr()).weak;
        if weak.fetch_add(1, Ordering::Relaxed) > MAX_REFCOUNT {
            weak.fetch_sub(1, Ordering::Relaxed);
            refcount_overflow();
        }
    }

    pub(crate) unsafe fn release_weak(this: NonNull<ControlBlock>) {
        if (*this.as_ptr()).weak.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);

        trace!("control block released");
        let free = (*this.as_ptr()).free;
        free(this);
    }

    pub(crate) unsafe fn strong_count(this: NonNull<ControlBlock>) -> usize {
        (*this.as_ptr()).strong.load(Ordering::Acquire)
    }

    /// Number of weak references, not counting the strong side's implicit
    /// one. A snapshot only: while the last strong reference is still
    /// destroying the payload, the implicit reference has not been dropped
    /// yet and the result is one too high.
    pub(crate) unsafe fn weak_count(this: NonNull<ControlBlock>) -> usize {
        let weak = (*this.as_ptr()).weak.load(Ordering::Acquire);
        if Self::strong_count(this) == 0 {
            weak
        } else {
            weak.saturating_sub(1)
        }
    }

    /// Whether the calling strong reference is the only reference of either
    /// kind. Only meaningful when the caller holds that strong reference
    /// exclusively, since nothing else could then create new references.
    pub(crate) unsafe fn is_unique(this: NonNull<ControlBlock>) -> bool {
        let block = &*this.as_ptr();
        block.weak.load(Ordering::Acquire) == 1 && block.strong.load(Ordering::Acquire) == 1
    }
}

struct ImplicitWeak(NonNull<ControlBlock>);

impl Drop for ImplicitWeak {
    fn drop(&mut self) {
        unsafe {
            ControlBlock::release_weak(self.0);
        }
    }
}

/// The payload address paired with the control block governing it. Both
/// halves are computed once, when ownership begins.
pub(crate) struct Link<T> {
    pub(crate) ptr: NonNull<T>,
    pub(crate) block: NonNull<ControlBlock>,
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Link<T> {}

impl<T> Link<T> {
    pub(crate) fn same_block(a: Option<&Link<T>>, b: Option<&Link<T>>) -> bool {
        a.map(|link| link.block) == b.map(|link| link.block)
    }
}

/// A control block and its payload in a single allocation.
#[repr(C)]
pub(crate) struct Combined<T> {
    header: ControlBlock,
    value: T,
}

unsafe fn destroy_combined<T>(block: NonNull<ControlBlock>) {
    let combined = block.cast::<Combined<T>>().as_ptr();
    ptr::drop_in_place(ptr::addr_of_mut!((*combined).value));
}

unsafe fn free_combined<T>(block: NonNull<ControlBlock>) {
    dealloc(block.as_ptr() as *mut u8, Layout::new::<Combined<T>>());
}

impl<T> Combined<T> {
    pub(crate) fn init(slot: Uninit<Combined<T>>, value: T) -> Link<T> {
        let raw = slot.into_raw().as_ptr();
        unsafe {
            ptr::addr_of_mut!((*raw).header)
                .write(ControlBlock::new(destroy_combined::<T>, free_combined::<T>));

            let value_ptr = ptr::addr_of_mut!((*raw).value);
            value_ptr.write(value);

            Link {
                ptr: NonNull::new_unchecked(value_ptr),
                block: NonNull::new_unchecked(raw).cast(),
            }
        }
    }
}

/// A control block allocated apart from an already boxed payload.
#[repr(C)]
pub(crate) struct Separate<T> {
    header: ControlBlock,
    value: NonNull<T>,
}

unsafe fn destroy_separate<T>(block: NonNull<ControlBlock>) {
    let separate = block.cast::<Separate<T>>().as_ptr();
    let _ = Box::from_raw((*separate).value.as_ptr());
}

unsafe fn free_separate<T>(block: NonNull<ControlBlock>) {
    let _ = Box::from_raw(block.cast::<Separate<T>>().as_ptr());
}

impl<T> Separate<T> {
    pub(crate) fn init(slot: Uninit<Separate<T>>, value: Box<T>) -> Link<T> {
        let raw = slot.into_raw().as_ptr();
        let value = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };
        unsafe {
            raw.write(Separate {
                header: ControlBlock::new(destroy_separate::<T>, free_separate::<T>),
                value,
            });

            Link {
                ptr: value,
                block: NonNull::new_unchecked(raw).cast(),
            }
        }
    }
}
