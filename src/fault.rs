//! Page-fault classification and resolution.
//!
//! [`handle_page_fault`] is the crate's entry point from the trap handler.
//! It consults the faulting process's supplemental page table and resolves
//! the fault, or returns an error that the caller turns into process
//! termination. The kernel itself never dies on a user fault.
//!
//! Four states cover every fault, keyed on what the table knows about the
//! faulting address:
//!
//! * no entry: grow the stack if the address sits in the growth window and
//!   the fault plausibly came from stack use, else the access is invalid;
//! * entry without a frame: the demand-paging path, claim a frame and let
//!   the backing store populate it;
//! * entry with a shared frame, write fault, page writable: break the
//!   copy-on-write sharing;
//! * anything else: invalid access.

use bitflags::bitflags;
use log::{debug, trace};

use crate::KernelError;
use crate::addressing::{PAGE_SIZE, Pa, Va};
use crate::frame;
use crate::hal::VmCtx;
use crate::page::{self, Page};
use crate::spt::Spt;

bitflags! {
    /// Hardware error code of a page fault.
    pub struct FaultFlags: u32 {
        /// The mapping was present; the fault is a protection violation.
        const PRESENT = 1;
        /// The faulting access was a write.
        const WRITE = 1 << 1;
        /// The fault came from user mode.
        const USER = 1 << 2;
    }
}

/// Everything the trap handler knows about a fault.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultReason {
    fault_addr: Va,
    flags: FaultFlags,
    /// User stack pointer at the time of the fault, when available. Kernel
    /// traps on behalf of a process may not have one.
    rsp: Option<Va>,
}

impl PageFaultReason {
    /// Packages a fault for [`handle_page_fault`].
    pub fn new(fault_addr: Va, flags: FaultFlags, rsp: Option<Va>) -> Self {
        PageFaultReason {
            fault_addr,
            flags,
            rsp,
        }
    }

    /// The faulting virtual address.
    #[inline]
    pub fn fault_addr(&self) -> Va {
        self.fault_addr
    }

    /// Whether the faulting access was a write.
    #[inline]
    pub fn is_write(&self) -> bool {
        self.flags.contains(FaultFlags::WRITE)
    }

    /// Whether the mapping was present (protection fault rather than a
    /// missing page).
    #[inline]
    pub fn is_present(&self) -> bool {
        self.flags.contains(FaultFlags::PRESENT)
    }

    /// Whether the fault came from user mode.
    #[inline]
    pub fn is_user(&self) -> bool {
        self.flags.contains(FaultFlags::USER)
    }

    /// A push or a local-variable access lands at or barely below the
    /// stack pointer; `push` itself writes 8 bytes below, and the red-zone
    /// style access patterns stay within 32. An address far below `rsp` is
    /// not stack use. With no stack pointer on record the check is
    /// permissive.
    fn looks_like_stack_access(&self) -> bool {
        self.rsp
            .map_or(true, |rsp| self.fault_addr + 32 >= rsp)
    }
}

/// Resolves a page fault against `spt`.
///
/// `Ok(())` means the faulting instruction can be retried. Any `Err` means
/// the fault could not be resolved and the caller must terminate the
/// process.
pub fn handle_page_fault(
    spt: &mut Spt,
    ctx: &mut VmCtx<'_>,
    reason: PageFaultReason,
) -> Result<(), KernelError> {
    let addr = reason.fault_addr;
    if addr.is_null() {
        return Err(KernelError::InvalidAccess);
    }
    let Some(page) = spt.find(addr) else {
        if in_growth_window(spt, addr) && reason.looks_like_stack_access() {
            return grow_stack(spt, ctx, addr);
        }
        debug!("fault: no page at {addr:?}, not stack growth");
        return Err(KernelError::InvalidAccess);
    };
    match page.frame() {
        None => {
            trace!("fault: demand-paging {addr:?}");
            let pa = frame::acquire_frame(spt, ctx, addr)?;
            let populated = match spt.page_mut(addr) {
                Some(page) => page::swap_in(page, ctx, pa),
                None => Err(KernelError::BadAddress),
            };
            if let Err(e) = populated {
                // The frame was registered before population; take it
                // back or it outlives the process's teardown.
                frame::discard(ctx, pa);
                return Err(e);
            }
            Ok(())
        }
        Some(pa) => {
            let writable = page.writable();
            let shared = ctx.frames.share_count(pa) > 1;
            if reason.is_write() && writable && shared {
                trace!("fault: copy-on-write break at {addr:?}");
                break_copy_on_write(spt, ctx, addr, pa)
            } else {
                // A write to a non-writable page, or a fault that should
                // not have happened at all.
                debug!("fault: protection violation at {addr:?}");
                Err(KernelError::InvalidAccess)
            }
        }
    }
}

fn in_growth_window(spt: &Spt, addr: Va) -> bool {
    addr >= spt.stack_limit() && addr < spt.stack_bottom()
}

/// Extends the stack with zeroed anonymous pages, from the current bottom
/// down to the faulting page inclusive.
fn grow_stack(spt: &mut Spt, ctx: &mut VmCtx<'_>, fault_addr: Va) -> Result<(), KernelError> {
    let target = fault_addr.page_floor();
    let mut va = spt.stack_bottom();
    while va > target {
        va = va - PAGE_SIZE;
        spt.insert(Page::new_stack(va))?;
        page::claim_zeroed(spt, ctx, va)?;
        spt.set_stack_bottom(va);
        trace!("fault: stack grown to {va:?}");
    }
    Ok(())
}

/// Gives the faulting page a private writable copy of its shared frame.
///
/// The old frame keeps its share count; sharers that break away do not
/// decrement it, so the count stays inflated until the remaining owners
/// exit (see DESIGN.md).
fn break_copy_on_write(
    spt: &mut Spt,
    ctx: &mut VmCtx<'_>,
    addr: Va,
    old_pa: Pa,
) -> Result<(), KernelError> {
    let va = addr.page_floor();
    let new_pa = frame::acquire_frame(spt, ctx, va)?;
    ctx.pool.copy_frame(old_pa, new_pa);
    if let Err(e) = ctx.pt.map(va, new_pa, true) {
        frame::discard(ctx, new_pa);
        return Err(e);
    }
    let Some(page) = spt.page_mut(va) else {
        ctx.pt.unmap(va);
        frame::discard(ctx, new_pa);
        return Err(KernelError::BadAddress);
    };
    page.set_frame(Some(new_pa));
    Ok(())
}
