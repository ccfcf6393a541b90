//! File storage, as seen by the paging subsystem.
//!
//! File-backed pages read their content from, and write dirty content back
//! to, a regular file at fixed offsets. The file system itself is a
//! collaborator: it supplies objects implementing [`RegularFile`], which
//! this crate holds through the reference-counted [`FileHandle`] so that a
//! mapping, its per-page writeback descriptors, and a forked child can all
//! keep the same file alive.
//!
//! Every read and write goes through a single global file-system lock,
//! mirroring the serialization the underlying file system requires. No
//! SPT-internal state is held while the lock is taken.

use alloc::sync::Arc;
use spin::Mutex;

use crate::KernelError;

/// Serializes all file I/O issued by the paging subsystem.
static FS_LOCK: Mutex<()> = Mutex::new(());

/// A regular file the paging subsystem can read and write at offsets.
pub trait RegularFile: Send + Sync {
    /// Returns the size of the file in bytes.
    fn size(&self) -> usize;

    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes actually read; short reads past the end
    /// of the file are not an error at this layer.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, KernelError>;

    /// Writes `buf` starting at `offset`, returning the number of bytes
    /// written.
    fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, KernelError>;
}

/// A shared, reference-counted handle to a [`RegularFile`].
pub struct FileHandle(Arc<dyn RegularFile>);

impl Clone for FileHandle {
    fn clone(&self) -> Self {
        FileHandle(Arc::clone(&self.0))
    }
}

impl FileHandle {
    /// Wraps a [`RegularFile`] implementation into a shared handle.
    pub fn new(file: impl RegularFile + 'static) -> Self {
        FileHandle(Arc::new(file))
    }

    /// Returns the size of the file in bytes.
    pub fn size(&self) -> usize {
        let _guard = FS_LOCK.lock();
        self.0.size()
    }

    /// Reads up to `buf.len()` bytes at `offset` under the global
    /// file-system lock.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, KernelError> {
        let _guard = FS_LOCK.lock();
        self.0.read_at(buf, offset)
    }

    /// Writes `buf` at `offset` under the global file-system lock.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, KernelError> {
        let _guard = FS_LOCK.lock();
        self.0.write_at(buf, offset)
    }

    /// Whether two handles refer to the same underlying file object.
    pub fn ptr_eq(&self, other: &FileHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl core::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FileHandle({} bytes)", self.0.size())
    }
}
