//! Error types for checked pointer operations.

use thiserror::Error;

/// Errors reported by the checked (`try_*`) pointer operations.
///
/// # Examples
///
/// ```
/// use ctrlptr::{Error, UniquePointer};
///
/// let empty: UniquePointer<u32> = UniquePointer::new();
/// assert_eq!(empty.try_get(), Err(Error::NullAccess));
/// assert_eq!(Error::NullAccess.to_string(), "access through an empty pointer");
/// ```
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The pointer does not own or observe an object.
    #[error("access through an empty pointer")]
    NullAccess,
    /// The global allocator could not satisfy a request.
    #[error("allocation of {size} bytes (align {align}) failed")]
    AllocFailed { size: usize, align: usize },
}

/// Result type for checked pointer operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cold]
#[track_caller]
pub(crate) fn null_access(kind: &str) -> ! {
    panic!("{} dereferenced while empty: {}", kind, Error::NullAccess)
}
