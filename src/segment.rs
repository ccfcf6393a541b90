//! Loader entry points: lazy executable segments and the initial stack.
//!
//! The ELF loader registers each segment here instead of reading it; the
//! bytes come in page by page as the process touches them. A segment page
//! reads its initial content from the executable but lives as an anonymous
//! page afterwards, swapping to the swap device rather than back to the
//! (read-only) executable.

use log::trace;

use crate::KernelError;
use crate::addressing::{PAGE_SIZE, Va};
use crate::fs::FileHandle;
use crate::hal::VmCtx;
use crate::page::{self, InitSpec, Page};
use crate::spt::Spt;

/// Registers an executable segment for demand loading.
///
/// `read_bytes` are read from `file` at `offset`, the following
/// `zero_bytes` are zero-filled, and the two together must cover whole
/// pages starting at the page-aligned `va`. Nothing is read here.
pub fn register_segment(
    spt: &mut Spt,
    file: &FileHandle,
    offset: usize,
    va: Va,
    read_bytes: usize,
    zero_bytes: usize,
    writable: bool,
) -> Result<(), KernelError> {
    // Sizes and offsets come from the ELF header; nothing about them can
    // be trusted not to wrap.
    let span = read_bytes
        .checked_add(zero_bytes)
        .ok_or(KernelError::InvalidArgument)?;
    if !va.is_page_aligned() || offset % PAGE_SIZE != 0 || span % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    if va.into_usize().checked_add(span).is_none()
        || offset.checked_add(read_bytes).is_none()
    {
        return Err(KernelError::InvalidArgument);
    }
    let mut va = va;
    let mut offset = offset;
    let mut read_bytes = read_bytes;
    let mut zero_bytes = zero_bytes;
    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = read_bytes.min(PAGE_SIZE);
        let spec = if page_read == 0 {
            // A fully zeroed page (bss) never touches the file.
            InitSpec::Anon
        } else {
            InitSpec::AnonFromFile {
                file: file.clone(),
                read_len: page_read,
                offset,
            }
        };
        spt.register_lazy(va, writable, spec)?;
        read_bytes -= page_read;
        zero_bytes -= PAGE_SIZE - page_read;
        offset += page_read;
        va = va + PAGE_SIZE;
    }
    Ok(())
}

/// Creates and maps the first stack page, one page below the stack top.
///
/// Unlike everything else in the address space the initial stack page is
/// populated eagerly: the loader writes the argument area into it before
/// the process ever runs. Returns the stack top.
pub fn setup_stack(spt: &mut Spt, ctx: &mut VmCtx<'_>) -> Result<Va, KernelError> {
    let top = spt.stack_top();
    let va = top - PAGE_SIZE;
    spt.insert(Page::new_stack(va))?;
    page::claim_zeroed(spt, ctx, va)?;
    trace!("stack set up at {va:?}");
    Ok(top)
}
