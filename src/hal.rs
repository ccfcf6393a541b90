//! Collaborator interfaces.
//!
//! The virtual memory manager is policy. The mechanisms it drives (the
//! physical frame pool, the per-process page-table primitive, the swap
//! block device) belong to the surrounding kernel and are consumed through
//! the traits below. The kernel bundles its implementations into a
//! [`VmCtx`] and threads that context into every subsystem call, so the
//! core logic never reaches for ambient global state.

use crate::addressing::{Pa, Va};
use crate::anon::SwapCursor;
use crate::frame::FrameTable;
use crate::KernelError;

/// The physical page pool.
///
/// Hands out page-sized physical frames from a bounded pool and exposes the
/// kernel-mapped view of each resident frame. The pool is the only
/// collaborator that is internally synchronized and safe to call from an
/// arbitrary context.
pub trait FramePool {
    /// Acquires a physical page, optionally zero-filled.
    ///
    /// Returns `None` when the pool is exhausted; the caller is expected to
    /// evict (see [`frame::acquire_frame`]) and retry.
    ///
    /// [`frame::acquire_frame`]: crate::frame::acquire_frame
    fn acquire(&mut self, zeroed: bool) -> Option<Pa>;

    /// Returns a previously acquired physical page to the pool.
    fn release(&mut self, pa: Pa);

    /// The kernel-mapped contents of the frame at `pa`, [`PAGE_SIZE`] bytes.
    ///
    /// [`PAGE_SIZE`]: crate::addressing::PAGE_SIZE
    fn frame(&self, pa: Pa) -> &[u8];

    /// Mutable kernel-mapped contents of the frame at `pa`.
    fn frame_mut(&mut self, pa: Pa) -> &mut [u8];

    /// Copies the full contents of frame `src` into frame `dst`.
    fn copy_frame(&mut self, src: Pa, dst: Pa);
}

/// The raw page-table primitive of one address space.
///
/// Mirrors the hardware-facing operations the kernel already provides:
/// install and remove translations, query them, and manipulate the dirty
/// bit the MMU maintains per mapping.
pub trait AddressSpace {
    /// Installs a translation from `va` to `pa`, replacing any existing
    /// one. A freshly installed mapping starts with a clear dirty bit.
    fn map(&mut self, va: Va, pa: Pa, writable: bool) -> Result<(), KernelError>;

    /// Removes the translation for `va`, if any.
    fn unmap(&mut self, va: Va);

    /// Returns the physical address `va` currently translates to.
    fn query(&self, va: Va) -> Option<Pa>;

    /// Whether the mapping for `va` has been written through since the
    /// dirty bit was last cleared.
    fn is_dirty(&self, va: Va) -> bool;

    /// Sets or clears the dirty bit for `va`.
    fn set_dirty(&mut self, va: Va, dirty: bool);
}

/// The swap block device.
///
/// A fixed-block-size device; [`SECTORS_PER_PAGE`] consecutive blocks hold
/// one page. Block I/O may put the calling context to sleep.
///
/// [`SECTORS_PER_PAGE`]: crate::addressing::SECTORS_PER_PAGE
pub trait SwapDevice {
    /// Reads one block into `buf`. `buf` must be [`SECTOR_SIZE`] bytes.
    ///
    /// [`SECTOR_SIZE`]: crate::addressing::SECTOR_SIZE
    fn read_block(&mut self, block: usize, buf: &mut [u8]) -> Result<(), KernelError>;

    /// Writes one block from `buf`. `buf` must be [`SECTOR_SIZE`] bytes.
    fn write_block(&mut self, block: usize, buf: &[u8]) -> Result<(), KernelError>;
}

/// Everything a virtual memory operation needs besides the faulting
/// process's [`Spt`] and the fault record itself.
///
/// `pt` is the address space of the process the operation acts on; `pool`,
/// `swap`, `frames`, and `slots` are system-wide. The trap boundary builds
/// one of these per call from the kernel's collaborator objects.
///
/// [`Spt`]: crate::spt::Spt
pub struct VmCtx<'a> {
    /// The physical page pool.
    pub pool: &'a mut dyn FramePool,
    /// The page table of the process being operated on.
    pub pt: &'a mut dyn AddressSpace,
    /// The swap block device.
    pub swap: &'a mut dyn SwapDevice,
    /// The system-wide table of resident frames and their share counts.
    pub frames: &'a mut FrameTable,
    /// The monotonic swap-slot allocator.
    pub slots: &'a mut SwapCursor,
}
