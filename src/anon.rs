//! Anonymous pages, backed by the swap block device.
//!
//! An anonymous page has no file behind it: stack pages, lazily loaded
//! executable segments once their first fault has pulled them in, and
//! anonymous mappings all end up here. Its content lives in a frame while
//! resident and, while evicted, in a swap slot of [`SECTORS_PER_PAGE`]
//! consecutive device blocks.
//!
//! Swap slots are handed out by a monotonic cursor and never reclaimed, so
//! sustained swap pressure leaks device space (see DESIGN.md).

use log::trace;

use crate::KernelError;
use crate::addressing::{Pa, SECTOR_SIZE, SECTORS_PER_PAGE, Va};
use crate::hal::{AddressSpace, FramePool, SwapDevice};

/// Index of a page-sized slot on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSlot(pub usize);

impl SwapSlot {
    /// The first device block of this slot.
    #[inline]
    fn first_block(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }
}

/// Monotonic swap-slot allocator.
///
/// Slots are assigned on a page's first swap-out and never reused.
pub struct SwapCursor {
    next: usize,
}

impl SwapCursor {
    /// Creates a cursor starting at slot zero.
    pub const fn new() -> Self {
        SwapCursor { next: 0 }
    }

    /// Allocates the next slot.
    pub fn alloc(&mut self) -> SwapSlot {
        let slot = SwapSlot(self.next);
        self.next += 1;
        slot
    }
}

impl Default for SwapCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Swap-backed state of one anonymous page.
#[derive(Debug, Clone)]
pub struct AnonPage {
    /// The swap slot assigned on first swap-out, if any.
    pub slot: Option<SwapSlot>,
}

impl AnonPage {
    /// An anonymous page that has never been swapped out.
    pub fn new() -> Self {
        AnonPage { slot: None }
    }
}

impl Default for AnonPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the full page at `slot` into the frame at `pa`.
pub(crate) fn swap_in(
    anon: &AnonPage,
    pa: Pa,
    pool: &mut dyn FramePool,
    dev: &mut dyn SwapDevice,
) -> Result<(), KernelError> {
    // A page can only lose its frame through swap-out, which assigns the
    // slot; an anonymous page faulting without one is a subsystem bug
    // surfaced as an I/O error rather than a kernel panic.
    let Some(slot) = anon.slot else {
        return Err(KernelError::IOError);
    };
    let buf = pool.frame_mut(pa);
    for i in 0..SECTORS_PER_PAGE {
        dev.read_block(slot.first_block() + i, &mut buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE])?;
    }
    Ok(())
}

/// Persists the page's content before its frame is released.
///
/// The first swap-out assigns a slot and always writes; later swap-outs
/// rewrite the slot only when the mapping is dirty.
pub(crate) fn swap_out(
    anon: &mut AnonPage,
    va: Va,
    pa: Pa,
    pool: &dyn FramePool,
    pt: &dyn AddressSpace,
    dev: &mut dyn SwapDevice,
    cursor: &mut SwapCursor,
) -> Result<(), KernelError> {
    match anon.slot {
        None => {
            let slot = cursor.alloc();
            trace!("anon: first swap-out of {va:?} to slot {}", slot.0);
            write_slot(slot, pa, pool, dev)?;
            anon.slot = Some(slot);
        }
        Some(slot) if pt.is_dirty(va) => write_slot(slot, pa, pool, dev)?,
        Some(_) => {}
    }
    Ok(())
}

fn write_slot(
    slot: SwapSlot,
    pa: Pa,
    pool: &dyn FramePool,
    dev: &mut dyn SwapDevice,
) -> Result<(), KernelError> {
    let buf = pool.frame(pa);
    for i in 0..SECTORS_PER_PAGE {
        dev.write_block(slot.first_block() + i, &buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE])?;
    }
    Ok(())
}
