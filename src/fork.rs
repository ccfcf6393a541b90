//! Address-space duplication for fork.
//!
//! [`copy_address_space`] walks the parent's supplemental page table and
//! duplicates every descriptor into the child. Resident pages are not
//! copied eagerly; parent and child share the frame copy-on-write, with
//! both mappings downgraded to read-only so that the first write by either
//! side traps and gets a private copy.
//!
//! Stack pages are the exception and are deep-copied up front: both sides
//! return from fork straight into stack writes.
//!
//! Mapping records are not duplicated: the child inherits the mapped
//! pages themselves but cannot unmap the range by base address, and its
//! exit drops them without writeback.

use alloc::vec::Vec;
use log::trace;

use crate::KernelError;
use crate::addressing::Va;
use crate::frame;
use crate::hal::{AddressSpace, VmCtx};
use crate::page::Page;
use crate::spt::Spt;

/// Duplicates `src` into the empty table `dst`, copy-on-write.
///
/// `ctx.pt` must be the parent's address space and `dst_pt` the child's.
/// If a frame has to be manufactured for a stack copy, eviction pressure
/// falls on the parent's own resident set.
///
/// On failure the child table is left partially populated; the caller is
/// expected to destroy it.
pub fn copy_address_space(
    dst: &mut Spt,
    dst_pt: &mut dyn AddressSpace,
    src: &mut Spt,
    ctx: &mut VmCtx<'_>,
) -> Result<(), KernelError> {
    dst.copy_stack_bounds(src);
    let vas: Vec<Va> = src.iter().map(Page::va).collect();
    for va in vas {
        let child = src.find(va).cloned().ok_or(KernelError::BadAddress)?;
        match child.frame() {
            None => dst.insert(child)?,
            Some(pa) if child.is_stack() => {
                trace!("fork: deep-copying stack page {va:?}");
                // Snapshot before taking a frame: eviction pressure draws
                // on the parent's queue and can select this very page,
                // recycling its frame as the one handed back.
                let content = ctx.pool.frame(pa).to_vec();
                let new_pa = frame::acquire_raw(src, ctx)?;
                ctx.frames.insert(new_pa, va);
                ctx.pool.frame_mut(new_pa).copy_from_slice(&content);
                if let Err(e) = dst_pt.map(va, new_pa, true) {
                    frame::discard(ctx, new_pa);
                    return Err(e);
                }
                // Re-read the parent descriptor: the eviction above may
                // have updated it.
                let mut child = src.find(va).cloned().ok_or(KernelError::BadAddress)?;
                child.set_frame(Some(new_pa));
                dst.insert(child)?;
                dst.enqueue_candidate(va, true);
            }
            Some(pa) => {
                trace!("fork: sharing frame of {va:?}");
                ctx.frames.share(pa);
                // Downgrading the parent's mapping must not lose a dirty
                // bit a later writeback depends on.
                let dirty = ctx.pt.is_dirty(va);
                ctx.pt.map(va, pa, false)?;
                ctx.pt.set_dirty(va, dirty);
                dst_pt.map(va, pa, false)?;
                dst.insert(child)?;
            }
        }
    }
    Ok(())
}
