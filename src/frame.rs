//! Resident frames and the eviction engine.
//!
//! Frames are tracked in a [`FrameTable`] indexed by physical page number,
//! so share-count bookkeeping is a bounds-checked array update rather than
//! a pointer graph. A frame is owned by the pool while free, by exactly one
//! page at share count 1, and jointly by its sharers after a fork.
//!
//! [`acquire_frame`] is the single way a page obtains a frame. When the
//! pool is exhausted it manufactures one by evicting a resident page from
//! the *faulting process's own* candidate queue. Victims never come from
//! another address space, so no cross-process page-table lock is needed.

use alloc::vec::Vec;
use log::{trace, warn};

use crate::KernelError;
use crate::addressing::{Pa, Va};
use crate::hal::VmCtx;
use crate::page::{self, Backing, Page};
use crate::spt::Spt;

/// A page stops being an eviction candidate after this many selections.
pub const EVICT_ATTEMPT_CAP: u8 = 5;

/// One resident physical page.
#[derive(Debug)]
pub struct Frame {
    pa: Pa,
    owner: Va,
    share: u32,
}

impl Frame {
    /// The physical address of this frame.
    #[inline]
    pub fn pa(&self) -> Pa {
        self.pa
    }

    /// The virtual page the frame was first claimed for.
    #[inline]
    pub fn owner(&self) -> Va {
        self.owner
    }

    /// Number of pages currently sharing this frame.
    #[inline]
    pub fn share(&self) -> u32 {
        self.share
    }
}

/// System-wide table of resident frames, indexed by physical page number.
pub struct FrameTable {
    slots: Vec<Option<Frame>>,
}

impl FrameTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        FrameTable { slots: Vec::new() }
    }

    fn slot_mut(&mut self, pa: Pa) -> &mut Option<Frame> {
        let idx = pa.ppn();
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        &mut self.slots[idx]
    }

    /// Registers a freshly acquired frame with share count 1.
    pub fn insert(&mut self, pa: Pa, owner: Va) {
        let slot = self.slot_mut(pa);
        debug_assert!(slot.is_none(), "frame {pa:?} registered twice");
        *slot = Some(Frame {
            pa,
            owner,
            share: 1,
        });
    }

    /// Adds one sharer to the frame at `pa`, returning the new count.
    pub fn share(&mut self, pa: Pa) -> u32 {
        match self.slot_mut(pa) {
            Some(frame) => {
                frame.share += 1;
                frame.share
            }
            None => {
                debug_assert!(false, "sharing unregistered frame {pa:?}");
                0
            }
        }
    }

    /// Drops one sharer from the frame at `pa`, returning the remaining
    /// count. At zero the entry is removed and the caller must return the
    /// physical page to the pool.
    pub fn unshare(&mut self, pa: Pa) -> u32 {
        let slot = self.slot_mut(pa);
        match slot {
            Some(frame) if frame.share > 1 => {
                frame.share -= 1;
                frame.share
            }
            Some(_) => {
                *slot = None;
                0
            }
            None => {
                debug_assert!(false, "unsharing unregistered frame {pa:?}");
                0
            }
        }
    }

    /// Current share count of the frame at `pa`; zero if unregistered.
    pub fn share_count(&self, pa: Pa) -> u32 {
        self.slots
            .get(pa.ppn())
            .and_then(|slot| slot.as_ref())
            .map_or(0, Frame::share)
    }

    /// The frame registered at `pa`, if any.
    pub fn get(&self, pa: Pa) -> Option<&Frame> {
        self.slots.get(pa.ppn()).and_then(|slot| slot.as_ref())
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Obtains a frame for the page at `for_va`, evicting one of `spt`'s own
/// resident pages if the pool is exhausted.
///
/// The new frame is registered in the frame table with share count 1 and
/// its owning page is enqueued as an eviction candidate: pages that are
/// still uninitialized or file-backed go to the back of the queue,
/// already-initialized anonymous pages to the front, so freshly loaded
/// executable and file content outlives generic anonymous pages under
/// pressure.
///
/// Eviction may write back through the swap device or file system and can
/// block; never call this from a non-blockable context.
pub fn acquire_frame(spt: &mut Spt, ctx: &mut VmCtx<'_>, for_va: Va) -> Result<Pa, KernelError> {
    let pa = acquire_raw(spt, ctx)?;
    ctx.frames.insert(pa, for_va);
    let front = matches!(
        spt.find(for_va).map(Page::backing),
        Some(Backing::Anon(_))
    );
    spt.enqueue_candidate(for_va, front);
    Ok(pa)
}

/// Obtains a bare frame, evicting from `spt`'s candidate queue on pool
/// exhaustion, without registering an owner. The caller must insert it
/// into the frame table and enqueue its owning page itself; fork uses
/// this to evict from the parent while handing the frame to the child.
pub(crate) fn acquire_raw(spt: &mut Spt, ctx: &mut VmCtx<'_>) -> Result<Pa, KernelError> {
    match ctx.pool.acquire(true) {
        Some(pa) => Ok(pa),
        None => evict_and_acquire(spt, ctx),
    }
}

/// Takes back a frame whose page never became resident: registered in the
/// table but with no mapping and no `Page::frame` pointing at it. Without
/// this, a failed population strands the physical page past the owning
/// process's teardown.
pub(crate) fn discard(ctx: &mut VmCtx<'_>, pa: Pa) {
    if ctx.frames.unshare(pa) == 0 {
        ctx.pool.release(pa);
    }
}

fn evict_and_acquire(spt: &mut Spt, ctx: &mut VmCtx<'_>) -> Result<Pa, KernelError> {
    while let Some(cand) = spt.pop_candidate() {
        // Stale entries (freed pages, pages that already lost their
        // frame, corrupted addresses) are dropped on the floor.
        if !cand.is_page_aligned() {
            continue;
        }
        let Some(page) = spt.page_mut(cand) else {
            continue;
        };
        if page.frame().is_none() {
            continue;
        }
        let attempts = page.bump_evict_attempts();
        if attempts >= EVICT_ATTEMPT_CAP {
            warn!("evict: abandoning candidate {cand:?} after {attempts} attempts");
            continue;
        }
        trace!("evict: victim {cand:?} (attempt {attempts})");
        page::swap_out(page, ctx)?;
        // The victim's frame went back to the pool unless it was shared;
        // keep evicting until an allocation actually succeeds.
        if let Some(pa) = ctx.pool.acquire(true) {
            return Ok(pa);
        }
    }
    Err(KernelError::NoMemory)
}
