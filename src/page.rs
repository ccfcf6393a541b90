//! The page descriptor and its backing-variant dispatch.
//!
//! A [`Page`] describes one virtual page of a process. What sits behind it
//! is decided at registration time and expressed as a closed [`Backing`]
//! enum: uninitialized pages carry an [`InitSpec`] that says how to
//! manufacture their first content, anonymous pages swap to the swap
//! device, and file-backed pages read from and write back to a regular
//! file. The variant set is closed: the dispatch in [`swap_in`],
//! [`swap_out`], and [`destroy`] is a plain `match`, not open virtual
//! dispatch.
//!
//! The first fault on an uninitialized page converts it in place to its
//! target variant: an executable-segment page reads its initial bytes from
//! the ELF file but *becomes anonymous*, so later evictions go to swap; a
//! mapped-file page becomes file-backed and keeps writing back to the file.

use log::trace;

use crate::KernelError;
use crate::addressing::{Pa, Va};
use crate::anon::{self, AnonPage};
use crate::file::{self, FilePage};
use crate::frame;
use crate::fs::FileHandle;
use crate::hal::VmCtx;
use crate::spt::Spt;

/// How to produce the first content of an uninitialized page.
///
/// This is the deferred-load descriptor handed over by the ELF loader or
/// the mapping manager; it also names the variant the page turns into on
/// its first fault.
#[derive(Debug, Clone)]
pub enum InitSpec {
    /// Zero-filled anonymous page.
    Anon,
    /// Anonymous page whose initial content comes from a file, as in an
    /// ELF segment page. `read_len` bytes are read at `offset`, the rest
    /// of the page is zero-filled, and the page swaps to the swap device
    /// from then on.
    AnonFromFile {
        /// File supplying the initial bytes.
        file: FileHandle,
        /// Number of bytes to read.
        read_len: usize,
        /// Byte offset within the file.
        offset: usize,
    },
    /// File-backed page of a memory-mapped file.
    File {
        /// The backing file.
        file: FileHandle,
        /// Bytes read from and written back to the file.
        len: usize,
        /// Byte offset within the file.
        offset: usize,
    },
}

/// Backing variant of a page, fixed at first fault and never changed
/// afterwards.
#[derive(Debug, Clone)]
pub enum Backing {
    /// Content deferred until the first fault.
    Uninit(InitSpec),
    /// Swap-device backed.
    Anon(AnonPage),
    /// Regular-file backed.
    File(FilePage),
}

/// Descriptor for one virtual page of a process.
#[derive(Debug, Clone)]
pub struct Page {
    va: Va,
    writable: bool,
    is_stack: bool,
    evict_attempts: u8,
    frame: Option<Pa>,
    backing: Backing,
}

impl Page {
    /// Creates a lazily populated page; content is deferred per `init`.
    pub fn new_lazy(va: Va, writable: bool, init: InitSpec) -> Self {
        Page {
            va: va.page_floor(),
            writable,
            is_stack: false,
            evict_attempts: 0,
            frame: None,
            backing: Backing::Uninit(init),
        }
    }

    /// Creates an initialized anonymous stack page. The caller still has
    /// to claim a frame for it.
    pub fn new_stack(va: Va) -> Self {
        Page {
            va: va.page_floor(),
            writable: true,
            is_stack: true,
            evict_attempts: 0,
            frame: None,
            backing: Backing::Anon(AnonPage::new()),
        }
    }

    /// The virtual page number this descriptor covers.
    #[inline]
    pub fn va(&self) -> Va {
        self.va
    }

    /// Whether the page may be written by the process.
    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Whether this page belongs to the process stack.
    #[inline]
    pub fn is_stack(&self) -> bool {
        self.is_stack
    }

    /// The resident frame, if any.
    #[inline]
    pub fn frame(&self) -> Option<Pa> {
        self.frame
    }

    /// The backing variant.
    #[inline]
    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// How many times this page has been selected for eviction.
    #[inline]
    pub fn evict_attempts(&self) -> u8 {
        self.evict_attempts
    }

    pub(crate) fn set_frame(&mut self, frame: Option<Pa>) {
        self.frame = frame;
    }

    pub(crate) fn bump_evict_attempts(&mut self) -> u8 {
        self.evict_attempts += 1;
        self.evict_attempts
    }
}

/// Populates the frame at `pa` with the page's content and installs the
/// mapping.
///
/// An uninitialized page is converted to its target variant here, on its
/// first fault. The dirty bit is cleared on the way out: content is clean
/// immediately after a fresh load.
pub fn swap_in(page: &mut Page, ctx: &mut VmCtx<'_>, pa: Pa) -> Result<(), KernelError> {
    let VmCtx {
        pool, pt, swap, ..
    } = ctx;
    let converted = match &page.backing {
        Backing::Uninit(spec) => {
            let spec = spec.clone();
            trace!("page: first fault converts {:?}", page.va);
            Some(populate_initial(&spec, pa, &mut **pool)?)
        }
        Backing::Anon(anon) => {
            anon::swap_in(anon, pa, &mut **pool, &mut **swap)?;
            None
        }
        Backing::File(fp) => {
            file::swap_in(fp, pa, &mut **pool)?;
            None
        }
    };
    if let Some(backing) = converted {
        page.backing = backing;
    }
    pt.map(page.va, pa, page.writable)?;
    pt.set_dirty(page.va, false);
    page.frame = Some(pa);
    Ok(())
}

fn populate_initial(
    spec: &InitSpec,
    pa: Pa,
    pool: &mut dyn crate::hal::FramePool,
) -> Result<Backing, KernelError> {
    match spec {
        // The pool hands out zeroed frames; nothing to do.
        InitSpec::Anon => Ok(Backing::Anon(AnonPage::new())),
        InitSpec::AnonFromFile {
            file,
            read_len,
            offset,
        } => {
            let buf = pool.frame_mut(pa);
            let n = file.read_at(&mut buf[..*read_len], *offset)?;
            if n != *read_len {
                return Err(KernelError::IOError);
            }
            buf[*read_len..].fill(0);
            Ok(Backing::Anon(AnonPage::new()))
        }
        InitSpec::File { file, len, offset } => {
            let fp = FilePage {
                file: file.clone(),
                len: *len,
                offset: *offset,
            };
            file::swap_in(&fp, pa, pool)?;
            Ok(Backing::File(fp))
        }
    }
}

/// Persists the page's dirty content, releases its frame, and clears the
/// mapping.
///
/// May block on backing-store I/O; never call it from a non-blockable
/// context.
pub fn swap_out(page: &mut Page, ctx: &mut VmCtx<'_>) -> Result<(), KernelError> {
    let Some(pa) = page.frame else {
        debug_assert!(false, "swap_out of a page with no resident frame");
        return Ok(());
    };
    let VmCtx {
        pool,
        pt,
        swap,
        frames,
        slots,
    } = ctx;
    match &mut page.backing {
        Backing::Anon(anon) => {
            anon::swap_out(anon, page.va, pa, &**pool, &**pt, &mut **swap, &mut **slots)?
        }
        Backing::File(fp) => file::swap_out(fp, page.va, pa, &**pool, &**pt)?,
        Backing::Uninit(_) => {
            debug_assert!(false, "uninitialized page can never be resident");
        }
    }
    pt.unmap(page.va);
    if frames.unshare(pa) == 0 {
        pool.release(pa);
    }
    page.frame = None;
    Ok(())
}

/// Releases the page's bookkeeping without writing anything back.
///
/// Used on the exit path once any wanted writeback has already happened.
/// An assigned swap slot is leaked by design (see DESIGN.md).
pub fn destroy(page: &mut Page, ctx: &mut VmCtx<'_>) {
    if let Some(pa) = page.frame.take() {
        ctx.pt.unmap(page.va);
        if ctx.frames.unshare(pa) == 0 {
            ctx.pool.release(pa);
        }
    }
}

/// Creates, maps, and registers a frame for an already-inserted
/// initialized anonymous page. This is the stack-page claim path.
pub(crate) fn claim_zeroed(spt: &mut Spt, ctx: &mut VmCtx<'_>, va: Va) -> Result<(), KernelError> {
    let pa = frame::acquire_frame(spt, ctx, va)?;
    if let Err(e) = ctx.pt.map(va, pa, true) {
        frame::discard(ctx, pa);
        return Err(e);
    }
    ctx.pt.set_dirty(va, false);
    let Some(page) = spt.page_mut(va) else {
        ctx.pt.unmap(va);
        frame::discard(ctx, pa);
        return Err(KernelError::BadAddress);
    };
    page.set_frame(Some(pa));
    Ok(())
}
