//! Memory-mapped files.
//!
//! [`map_range`] registers a run of lazily populated file-backed pages and
//! records the range under one [`MmFile`] so that [`unmap_range`] can later
//! find every page of the mapping, write dirty content back, and drop it.
//! The record keeps its own per-page writeback descriptors: they stay valid
//! even for pages that were never faulted in and still sit in their
//! uninitialized form.
//!
//! Nothing is read from the file at map time. The first touch of each page
//! faults, reads its chunk, and zero-fills the tail past the mapped length
//! or the end of the file.

use alloc::vec::Vec;
use log::debug;

use crate::KernelError;
use crate::addressing::{PAGE_SIZE, Va};
use crate::fs::FileHandle;
use crate::hal::VmCtx;
use crate::page::InitSpec;
use crate::spt::Spt;

/// Writeback descriptor for one page of a mapping.
#[derive(Debug, Clone)]
pub(crate) struct PageSlot {
    file: FileHandle,
    va: Va,
    len: usize,
    offset: usize,
}

/// Record of one active file mapping.
#[derive(Debug)]
pub struct MmFile {
    base: Va,
    slots: Vec<PageSlot>,
}

impl MmFile {
    /// Base address the mapping was established at.
    #[inline]
    pub fn base(&self) -> Va {
        self.base
    }

    /// Number of pages in the mapping.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.slots.len()
    }
}

/// Maps `length` bytes of `file` starting at `offset` into the address
/// space at `addr`, one lazily populated page per 4 KiB chunk.
///
/// Rejects a null or unaligned `addr`, a zero `length`, an unaligned
/// `offset`, and a range that wraps the address space. A range that
/// touches any already-registered page, or a base that already carries a
/// mapping record, fails with [`KernelError::Duplicated`] and registers
/// nothing.
///
/// Returns the base address on success.
pub fn map_range(
    spt: &mut Spt,
    file: FileHandle,
    addr: Va,
    length: usize,
    writable: bool,
    offset: usize,
) -> Result<Va, KernelError> {
    if addr.is_null() || !addr.is_page_aligned() || length == 0 || offset % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    // Both the address range and the file-offset range must fit without
    // wrapping; offset and length come straight from user arguments.
    let span = length
        .checked_next_multiple_of(PAGE_SIZE)
        .ok_or(KernelError::InvalidArgument)?;
    if addr.into_usize().checked_add(span).is_none() || offset.checked_add(span).is_none() {
        return Err(KernelError::InvalidArgument);
    }
    if spt.has_mapping(addr) {
        return Err(KernelError::Duplicated);
    }
    let pages = span / PAGE_SIZE;
    for i in 0..pages {
        if spt.find(addr + i * PAGE_SIZE).is_some() {
            debug!("mmap: range at {addr:?} collides at page {i}");
            return Err(KernelError::Duplicated);
        }
    }

    let file_size = file.size();
    let mut slots = Vec::with_capacity(pages);
    for i in 0..pages {
        let va = addr + i * PAGE_SIZE;
        let page_offset = offset + i * PAGE_SIZE;
        let wanted = PAGE_SIZE.min(length - i * PAGE_SIZE);
        // The last chunk may run past the end of the file; everything past
        // it is zero-filled rather than read.
        let len = wanted.min(file_size.saturating_sub(page_offset));
        let spec = InitSpec::File {
            file: file.clone(),
            len,
            offset: page_offset,
        };
        // Collisions were ruled out above.
        spt.register_lazy(va, writable, spec)?;
        slots.push(PageSlot {
            file: file.clone(),
            va,
            len,
            offset: page_offset,
        });
    }
    spt.add_mapping(MmFile { base: addr, slots });
    Ok(addr)
}

/// Tears down the mapping whose base is `base`.
///
/// Every resident dirty page is written back to the file; every page of
/// the range is then unregistered. Fails with [`KernelError::BadAddress`]
/// if `base` is not the base of an active mapping; other mappings are
/// never affected.
///
/// The record is released even when a writeback fails; the first I/O
/// error is reported after the whole range has been torn down.
pub fn unmap_range(spt: &mut Spt, ctx: &mut VmCtx<'_>, base: Va) -> Result<(), KernelError> {
    let record = spt.take_mapping(base).ok_or(KernelError::BadAddress)?;
    let mut first_err = Ok(());
    for slot in &record.slots {
        if let Err(e) = write_back_slot(spt, ctx, slot) {
            debug!("munmap: writeback at {:?} failed: {e:?}", slot.va);
            if first_err.is_ok() {
                first_err = Err(e);
            }
        }
        spt.remove(slot.va, ctx);
    }
    first_err
}

fn write_back_slot(spt: &Spt, ctx: &mut VmCtx<'_>, slot: &PageSlot) -> Result<(), KernelError> {
    let Some(page) = spt.find(slot.va) else {
        return Ok(());
    };
    let Some(pa) = page.frame() else {
        return Ok(());
    };
    if !ctx.pt.is_dirty(slot.va) {
        return Ok(());
    }
    let buf = ctx.pool.frame(pa);
    let n = slot.file.write_at(&buf[..slot.len], slot.offset)?;
    if n != slot.len {
        return Err(KernelError::IOError);
    }
    Ok(())
}
