//! Virtual and physical addresses.
//!
//! Pages are the unit of everything in this crate: a [`Va`] names one page
//! of a process's address space once rounded down to a page boundary, and a
//! [`Pa`] names the physical frame backing it. Both are thin wrappers over
//! `usize` so that the two kinds of address can never be mixed up.

use core::fmt;
use core::ops::{Add, Sub};

/// Size of a page, in bytes.
pub const PAGE_SIZE: usize = 4096;
/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: usize = 12;
/// Mask covering the offset-in-page bits of an address.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Size of one swap-device block, in bytes.
pub const SECTOR_SIZE: usize = 512;
/// Number of swap-device blocks that hold one page.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Default top of the user stack.
pub const USER_STACK_TOP: Va = Va::new(0x4748_0000);

/// A virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// Creates a virtual address from a raw value.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Va(addr)
    }

    /// Returns the raw value of this address.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Rounds this address down to its page boundary.
    #[inline]
    pub const fn page_floor(self) -> Self {
        Va(self.0 & !PAGE_MASK)
    }

    /// Returns the offset of this address within its page.
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Whether this address sits exactly on a page boundary.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Whether this is the null address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Add<usize> for Va {
    type Output = Va;
    fn add(self, rhs: usize) -> Va {
        Va(self.0 + rhs)
    }
}

impl Sub<usize> for Va {
    type Output = Va;
    fn sub(self, rhs: usize) -> Va {
        Va(self.0 - rhs)
    }
}

impl Sub<Va> for Va {
    type Output = usize;
    fn sub(self, rhs: Va) -> usize {
        self.0 - rhs.0
    }
}

impl fmt::Debug for Va {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Va(0x{:x})", self.0)
    }
}

/// A physical address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pa(usize);

impl Pa {
    /// Creates a physical address from a raw value.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Pa(addr)
    }

    /// Returns the raw value of this address.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Returns the physical page number of this address.
    #[inline]
    pub const fn ppn(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Whether this address sits exactly on a page boundary.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }
}

impl fmt::Debug for Pa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pa(0x{:x})", self.0)
    }
}
