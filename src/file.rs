//! File-backed pages.
//!
//! A file-backed page sources its content from a regular file at a fixed
//! offset and, when dirty, writes it back to the same place. The descriptor
//! carries a read length alongside the offset so that the trailing page of
//! a mapping can be partially populated from the file and zero-padded.

use crate::KernelError;
use crate::addressing::{Pa, Va};
use crate::fs::FileHandle;
use crate::hal::{AddressSpace, FramePool};

/// File-backed state of one page.
#[derive(Debug, Clone)]
pub struct FilePage {
    /// The backing file.
    pub file: FileHandle,
    /// Bytes to read from / write back to the file; the rest of the page
    /// is zero-filled.
    pub len: usize,
    /// Byte offset of this page's content within the file.
    pub offset: usize,
}

/// Populates the frame at `pa` from the backing file, zero-filling the
/// tail beyond `len`.
pub(crate) fn swap_in(fp: &FilePage, pa: Pa, pool: &mut dyn FramePool) -> Result<(), KernelError> {
    let buf = pool.frame_mut(pa);
    let n = fp.file.read_at(&mut buf[..fp.len], fp.offset)?;
    if n != fp.len {
        return Err(KernelError::IOError);
    }
    buf[fp.len..].fill(0);
    Ok(())
}

/// Writes the page's content back to the file if the mapping is dirty.
pub(crate) fn swap_out(
    fp: &FilePage,
    va: Va,
    pa: Pa,
    pool: &dyn FramePool,
    pt: &dyn AddressSpace,
) -> Result<(), KernelError> {
    if pt.is_dirty(va) {
        let buf = pool.frame(pa);
        let n = fp.file.write_at(&buf[..fp.len], fp.offset)?;
        if n != fp.len {
            return Err(KernelError::IOError);
        }
    }
    Ok(())
}
