//! Memory types and address space layout
//!
//! Address newtypes, page and swap sector constants, and the fixed layout
//! constants the fault handler needs (kernel base, user stack boundaries).

pub mod interface;

use bitflags::bitflags;
use static_assertions::const_assert;
use static_assertions::const_assert_eq;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;
/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;
/// Swap disk sector size in bytes
pub const SECTOR_SIZE: usize = 512;
/// Number of contiguous swap sectors holding one page
pub const SECTORS_PER_SLOT: usize = PAGE_SIZE / SECTOR_SIZE;

// A swap slot must cover a whole page with no remainder.
const_assert_eq!(SECTORS_PER_SLOT * SECTOR_SIZE, PAGE_SIZE);
const_assert!(PAGE_SIZE.is_power_of_two());

/// First kernel virtual address; everything at or above it is off limits to
/// user faults.
pub const KERNEL_BASE: usize = 0x80_0400_0000;
/// Top of the user stack region (exclusive upper bound of stack faults)
pub const USER_STACK_TOP: usize = 0x4748_0000;
/// Maximum stack size (1MB below the fixed stack top)
pub const MAX_STACK_SIZE: usize = 1 << 20;
/// How far below the recorded stack pointer a fault may land and still count
/// as stack growth. Covers push instructions that fault before the stack
/// pointer is decremented.
pub const STACK_SLOP: usize = 32;

/// Align address down to page boundary
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Align address up to page boundary
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Check if address is in kernel space
#[inline]
pub const fn is_kernel_address(addr: usize) -> bool {
    addr >= KERNEL_BASE
}

/// A virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// Creates a new virtual address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the virtual address as a raw usize value.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the offset within the current page.
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Checks if the virtual address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Rounds down the virtual address to the previous page boundary.
    pub const fn page_round_down(self) -> Self {
        Self(page_round_down(self.0))
    }

    /// Rounds up the virtual address to the next page boundary.
    pub const fn page_round_up(self) -> Self {
        Self(page_round_up(self.0))
    }

    /// Checks if the address lies in the kernel's reserved range.
    pub const fn is_kernel(self) -> bool {
        is_kernel_address(self.0)
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<VirtAddr> for usize {
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}

/// A physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    /// Creates a new physical address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the physical address as a raw usize value.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the frame number for this physical address.
    pub const fn frame_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Checks if the physical address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }
}

impl From<usize> for PhysAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<PhysAddr> for usize {
    fn from(addr: PhysAddr) -> Self {
        addr.0
    }
}

bitflags! {
    /// Hardware page fault descriptor, as decoded by the trap handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultKind: u8 {
        /// The faulting access hit a present page (protection violation)
        const PRESENT = 1 << 0;
        /// The faulting access was a write
        const WRITE = 1 << 1;
        /// The fault originated in user context
        const USER = 1 << 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_alignment() {
        assert_eq!(page_round_down(0x1234), 0x1000);
        assert_eq!(page_round_up(0x1234), 0x2000);
        assert_eq!(page_round_up(0x1000), 0x1000);
        assert_eq!(page_round_down(0), 0);
    }

    #[test]
    fn virt_addr_helpers() {
        let va = VirtAddr::new(0x4000_0123);
        assert_eq!(va.page_offset(), 0x123);
        assert!(!va.is_page_aligned());
        assert_eq!(va.page_round_down(), VirtAddr::new(0x4000_0000));
        assert!(!va.is_kernel());
        assert!(VirtAddr::new(KERNEL_BASE).is_kernel());
    }

    #[test]
    fn stack_region_sits_below_kernel() {
        assert!(USER_STACK_TOP < KERNEL_BASE);
        assert!(MAX_STACK_SIZE < USER_STACK_TOP);
    }
}
