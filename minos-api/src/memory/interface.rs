//! Collaborator interfaces consumed by the virtual memory subsystem
//!
//! The VM subsystem never talks to hardware or drivers directly; it goes
//! through these traits. The trap handler supplies a [`HardwareSpace`] per
//! address space, the file layer supplies [`BackingFile`] handles, and the
//! disk driver supplies the [`SwapDisk`].

use alloc::sync::Arc;

use crate::error::Result;
use crate::memory::{PhysAddr, VirtAddr, SECTOR_SIZE};

/// Hardware page table manipulation for one address space.
///
/// Implementations use interior mutability; the subsystem shares one handle
/// per address space as `Arc<dyn HardwareSpace>` so the frame evictor can
/// reach the victim's page tables from any context.
pub trait HardwareSpace: Send + Sync {
    /// Installs a virtual-to-physical mapping.
    fn map(&self, va: VirtAddr, pa: PhysAddr, writable: bool) -> Result<()>;

    /// Removes the mapping for `va`, if any. Idempotent.
    fn unmap(&self, va: VirtAddr);

    /// Returns the hardware dirty bit for `va`. Unmapped addresses report
    /// clean.
    fn is_dirty(&self, va: VirtAddr) -> bool;

    /// Clears the hardware dirty bit for `va`.
    fn clear_dirty(&self, va: VirtAddr);

    /// Returns the physical address `va` currently maps to, if present.
    fn probe(&self, va: VirtAddr) -> Option<PhysAddr>;
}

/// Positioned I/O on an open backing file.
pub trait BackingFile: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`, returning the count read.
    /// Reads past end of file return short counts or zero.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Writes `buf` at `offset`, returning the count written.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Current length of the file in bytes.
    fn length(&self) -> u64;

    /// Opens an independent handle to the same file, so a mapping survives
    /// the caller closing its own handle.
    fn reopen(&self) -> Result<Arc<dyn BackingFile>>;
}

/// Sector-granularity I/O on the swap disk.
pub trait SwapDisk: Send + Sync {
    /// Reads one sector into `buf`.
    fn read_sector(&self, index: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<()>;

    /// Writes one sector from `buf`.
    fn write_sector(&self, index: usize, buf: &[u8; SECTOR_SIZE]) -> Result<()>;

    /// Total number of sectors on the disk.
    fn sector_count(&self) -> usize;
}
