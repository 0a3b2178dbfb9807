//! Smart pointers over explicitly managed heap allocations.
//!
//! - [`UniquePointer`] is the sole owner of one allocation. It cannot be
//!   cloned, only moved, and carries no reference counts.
//! - [`SharedPointer`] shares ownership through a control block holding
//!   atomic strong and weak counts. The last strong reference to go destroys
//!   the payload.
//! - [`WeakPointer`] observes a `SharedPointer`'s object without keeping it
//!   alive, and can be promoted back with [`WeakPointer::lock`].
//!
//! Only the counts are synchronized. The payload of a `SharedPointer` is
//! shared immutably; nothing here reclaims reference cycles.
//!
//! Every operation that can fail on a precondition has a checked form
//! (`try_*`) reporting an [`Error`]. Dereferencing an empty pointer panics.

#![no_std]

extern crate alloc;

mod control;
mod error;
mod raw;
mod shared;
mod unique;
mod weak;

pub use error::{Error, Result};
pub use shared::SharedPointer;
pub use unique::UniquePointer;
pub use weak::WeakPointer;
