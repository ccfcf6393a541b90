//! Demand-paged virtual memory for a small teaching kernel.
//!
//! This crate decides what backs each page of a process's address space,
//! loads pages lazily on first touch, evicts physical frames under memory
//! pressure, and reconciles sharing when a process is duplicated.
//!
//! The core abstraction is the [`Page`], a descriptor for one virtual page
//! that is polymorphic over its backing variant: uninitialized (content
//! deferred until the first fault), anonymous (swap-device backed), or
//! file-backed (populated from and written back to a regular file). Every
//! page of a process lives in its [`Spt`], the supplemental page table,
//! which also carries the process's eviction-candidate queue and stack
//! boundary.
//!
//! A page fault traps into [`handle_page_fault`], which consults the
//! [`Spt`]: on a miss it either grows the stack or reports an invalid
//! access; on a hit with no resident frame it obtains a frame (evicting one
//! of the process's own pages if the pool is exhausted), asks the page's
//! backing store to populate it, and installs the mapping. Duplicating a
//! process ([`copy_address_space`]) shares frames copy-on-write; the write
//! fault that breaks the sharing is resolved by the same handler.
//!
//! The crate owns policy, not mechanism. The physical frame pool, the raw
//! page-table primitive, the swap block device, and file storage are
//! collaborators expressed as traits in [`hal`] and [`fs`]; the kernel
//! proper implements them and threads them into every call through a
//! [`VmCtx`]. There is no ambient "current process" inside the core logic:
//! the faulting process's [`Spt`] is passed by reference from the trap
//! boundary, and termination is expressed as an `Err` flowing back to it.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod addressing;
pub mod anon;
pub mod fault;
pub mod file;
pub mod fork;
pub mod frame;
pub mod fs;
pub mod hal;
pub mod mmap;
pub mod page;
pub mod segment;
pub mod spt;

pub use addressing::{PAGE_SIZE, Pa, USER_STACK_TOP, Va};
pub use anon::SwapCursor;
pub use fault::{FaultFlags, PageFaultReason, handle_page_fault};
pub use fork::copy_address_space;
pub use frame::FrameTable;
pub use fs::{FileHandle, RegularFile};
pub use hal::{AddressSpace, FramePool, SwapDevice, VmCtx};
pub use mmap::{map_range, unmap_range};
pub use page::{Backing, InitSpec, Page};
pub use segment::{register_segment, setup_stack};
pub use spt::Spt;

/// Errors reported by the virtual memory subsystem.
///
/// An error returned across the trap boundary means the *process* cannot
/// continue and the caller is expected to terminate it. The kernel itself
/// never panics on user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Access to an address with no valid page, or a forbidden write.
    /// (EACCES)
    InvalidAccess,
    /// Out of memory: the frame pool is exhausted and eviction produced no
    /// victim. (ENOMEM)
    NoMemory,
    /// A backing-store read or write failed or came up short. (EIO)
    IOError,
    /// An address that should name a live page or mapping does not. (EFAULT)
    BadAddress,
    /// Malformed argument: unaligned, null, or zero-sized. (EINVAL)
    InvalidArgument,
    /// A page is already registered at this virtual page number. (EEXIST)
    Duplicated,
}

impl KernelError {
    /// Converts the error into the errno-style value returned to user
    /// space.
    pub fn into_errno(self) -> isize {
        match self {
            KernelError::InvalidAccess => -13,
            KernelError::NoMemory => -12,
            KernelError::IOError => -5,
            KernelError::BadAddress => -14,
            KernelError::InvalidArgument => -22,
            KernelError::Duplicated => -17,
        }
    }
}
