//! The supplemental page table, one per process.
//!
//! The hardware page table only knows about resident pages. The [`Spt`]
//! is the process's full memory map: every registered page, resident or
//! not, keyed by its page-aligned virtual address, plus the per-process
//! eviction-candidate queue, the stack bounds, and the records of active
//! file mappings.
//!
//! Lookups normalize their argument to the page boundary, so callers can
//! pass raw fault addresses.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use log::debug;

use crate::KernelError;
use crate::addressing::{PAGE_SIZE, Va};
use crate::hal::VmCtx;
use crate::mmap::{self, MmFile};
use crate::page::{self, InitSpec, Page};

/// The stack may grow to at most this many pages.
pub const STACK_LIMIT_PAGES: usize = 256;

/// Per-process supplemental page table.
pub struct Spt {
    pages: BTreeMap<Va, Page>,
    /// FIFO of eviction candidates. Entries may be stale; the eviction
    /// engine drops those when it meets them.
    candidates: VecDeque<Va>,
    mappings: Vec<MmFile>,
    stack_top: Va,
    stack_bottom: Va,
    stack_limit: Va,
}

impl Spt {
    /// Creates an empty table for a process whose stack grows downward
    /// from `stack_top`.
    pub fn new(stack_top: Va) -> Self {
        let stack_top = stack_top.page_floor();
        Spt {
            pages: BTreeMap::new(),
            candidates: VecDeque::new(),
            mappings: Vec::new(),
            stack_top,
            stack_bottom: stack_top - PAGE_SIZE,
            stack_limit: stack_top - STACK_LIMIT_PAGES * PAGE_SIZE,
        }
    }

    /// Looks up the page covering `va`, if registered.
    pub fn find(&self, va: Va) -> Option<&Page> {
        self.pages.get(&va.page_floor())
    }

    /// Mutable lookup of the page covering `va`.
    pub fn page_mut(&mut self, va: Va) -> Option<&mut Page> {
        self.pages.get_mut(&va.page_floor())
    }

    /// Registers `page` under its own address.
    ///
    /// Fails with [`KernelError::Duplicated`] if a page is already
    /// registered there; the existing page is left untouched.
    pub fn insert(&mut self, page: Page) -> Result<(), KernelError> {
        match self.pages.entry(page.va()) {
            alloc::collections::btree_map::Entry::Occupied(_) => Err(KernelError::Duplicated),
            alloc::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(page);
                Ok(())
            }
        }
    }

    /// Registers a lazily populated page at `va`.
    pub fn register_lazy(
        &mut self,
        va: Va,
        writable: bool,
        init: InitSpec,
    ) -> Result<(), KernelError> {
        self.insert(Page::new_lazy(va, writable, init))
    }

    /// Unregisters the page covering `va`, releasing its frame without
    /// writeback. No-op if nothing is registered there.
    pub fn remove(&mut self, va: Va, ctx: &mut VmCtx<'_>) {
        if let Some(mut page) = self.pages.remove(&va.page_floor()) {
            page::destroy(&mut page, ctx);
        }
    }

    /// Appends `va` to the eviction-candidate queue; `front` puts it at
    /// the head so it is considered first.
    pub(crate) fn enqueue_candidate(&mut self, va: Va, front: bool) {
        if front {
            self.candidates.push_front(va);
        } else {
            self.candidates.push_back(va);
        }
    }

    pub(crate) fn pop_candidate(&mut self) -> Option<Va> {
        self.candidates.pop_front()
    }

    /// All registered pages, in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    /// Lowest stack page currently registered.
    pub fn stack_bottom(&self) -> Va {
        self.stack_bottom
    }

    pub(crate) fn set_stack_bottom(&mut self, va: Va) {
        self.stack_bottom = va;
    }

    /// Lowest address the stack is allowed to reach.
    pub fn stack_limit(&self) -> Va {
        self.stack_limit
    }

    /// Address the stack grows downward from.
    pub fn stack_top(&self) -> Va {
        self.stack_top
    }

    pub(crate) fn copy_stack_bounds(&mut self, other: &Spt) {
        self.stack_top = other.stack_top;
        self.stack_bottom = other.stack_bottom;
        self.stack_limit = other.stack_limit;
    }

    pub(crate) fn add_mapping(&mut self, record: MmFile) {
        self.mappings.push(record);
    }

    pub(crate) fn take_mapping(&mut self, base: Va) -> Option<MmFile> {
        let idx = self.mappings.iter().position(|m| m.base() == base)?;
        Some(self.mappings.swap_remove(idx))
    }

    pub(crate) fn has_mapping(&self, base: Va) -> bool {
        self.mappings.iter().any(|m| m.base() == base)
    }

    /// Tears down the whole address space on process exit.
    ///
    /// Active file mappings are unmapped first so their dirty pages reach
    /// the file; everything else is dropped without writeback. Teardown
    /// always runs to completion; the first I/O error is reported after
    /// the fact.
    pub fn destroy(&mut self, ctx: &mut VmCtx<'_>) -> Result<(), KernelError> {
        let mut first_err = Ok(());
        let bases: Vec<Va> = self.mappings.iter().map(MmFile::base).collect();
        for base in bases {
            if let Err(e) = mmap::unmap_range(self, ctx, base) {
                debug!("destroy: writeback of mapping at {base:?} failed: {e:?}");
                if first_err.is_ok() {
                    first_err = Err(e);
                }
            }
        }
        let mut pages = core::mem::take(&mut self.pages);
        for page in pages.values_mut() {
            page::destroy(page, ctx);
        }
        self.candidates.clear();
        first_err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut spt = Spt::new(Va::new(0x4750_0000));
        let va = Va::new(0x400000);
        spt.register_lazy(va, true, InitSpec::Anon).unwrap();
        assert_eq!(
            spt.register_lazy(va, false, InitSpec::Anon),
            Err(KernelError::Duplicated)
        );
        // The original registration survives.
        assert!(spt.find(va).is_some_and(Page::writable));
    }

    #[test]
    fn lookup_normalizes_to_page_boundary() {
        let mut spt = Spt::new(Va::new(0x4750_0000));
        spt.register_lazy(Va::new(0x400000), true, InitSpec::Anon)
            .unwrap();
        assert!(spt.find(Va::new(0x400fff)).is_some());
        assert!(spt.find(Va::new(0x401000)).is_none());
    }

    #[test]
    fn stack_bounds() {
        let spt = Spt::new(Va::new(0x4750_0000));
        assert_eq!(spt.stack_bottom(), Va::new(0x4750_0000 - PAGE_SIZE));
        assert_eq!(
            spt.stack_limit(),
            Va::new(0x4750_0000 - STACK_LIMIT_PAGES * PAGE_SIZE)
        );
    }
}
