//! MINOS Virtual Memory
//!
//! The demand-paging core of the MINOS teaching kernel: supplemental page
//! tables, a global frame pool with FIFO eviction, swap-backed anonymous
//! pages, and lazily-materialized memory-mapped files.
//!
//! The subsystem is driven entirely by its collaborators through the
//! `minos-api` traits: the trap handler feeds faults into
//! [`Vm::handle_page_fault`], the loader registers lazy pages with
//! [`Vm::allocate_lazy_page`], and the syscall layer calls
//! [`Vm::map_file`]/[`Vm::unmap_file`]. All shared state (frame pool, swap
//! slot table, file-I/O serialization) is owned by the [`Vm`] value handed
//! out at initialization; there are no hidden globals.
//!
//! # Concurrency
//!
//! One spin lock guards each piece of cross-context state: the frame pool
//! (eviction and acquisition), the swap slot table, each frame's contents,
//! each page's metadata, and the backing-file I/O path. An address space's
//! own table is only ever mutated by its owning context. Lock order is
//! pool → page → frame buffer → (swap table | file lock); the claim path
//! never holds a page lock while taking the pool lock.

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod anon;
pub mod fault;
pub mod file;
pub mod frame;
pub mod mmap;
pub mod page;
pub mod space;
pub mod spt;
pub mod swap;

use alloc::sync::Arc;

use minos_api::memory::USER_STACK_TOP;
use minos_api::{Error, HardwareSpace, Result, SwapDisk, VirtAddr, PAGE_SIZE};
use spin::Mutex;

use crate::frame::{FramePool, FramePoolStats};
use crate::page::Page;
use crate::swap::SwapStore;

// Re-export commonly used types
pub use crate::frame::FrameIndex;
pub use crate::page::{FirstTouch, PageBacking, SegmentSource, TargetKind};
pub use crate::space::AddressSpace;
pub use crate::spt::{EntryState, Spt};

/// What to do with partial state when a multi-page operation fails halfway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Undo the registrations this call made before returning the error.
    Strict,
    /// Leave partial registrations in place.
    BestEffort,
}

/// Tunable behaviors the reference semantics leave open.
#[derive(Debug, Clone, Copy)]
pub struct VmPolicy {
    /// Keep a page's swap slot reserved across swap-in instead of freeing
    /// it. Defaults to freeing.
    pub retain_slot_on_swap_in: bool,
    /// Rollback behavior of `map_file` and `copy_space`.
    pub rollback: RollbackPolicy,
}

impl Default for VmPolicy {
    fn default() -> Self {
        VmPolicy {
            retain_slot_on_swap_in: false,
            rollback: RollbackPolicy::Strict,
        }
    }
}

/// State shared by the drivers: the swap store, the file-I/O serializing
/// lock, and the policy knobs. Injected by reference into the frame pool
/// and the backing drivers rather than living in statics.
pub(crate) struct VmShared {
    pub(crate) swap: SwapStore,
    pub(crate) file_lock: Mutex<()>,
    pub(crate) policy: VmPolicy,
}

/// The virtual memory subsystem. One per system; shared across execution
/// contexts by the caller (typically as `Arc<Vm>`).
pub struct Vm {
    pub(crate) shared: VmShared,
    pub(crate) frames: Mutex<FramePool>,
}

impl Vm {
    /// Initializes the subsystem with `frames` physical frames and the
    /// given swap disk.
    pub fn new(frames: usize, swap_disk: Arc<dyn SwapDisk>, policy: VmPolicy) -> Self {
        log::debug!("vm init: {} frames, policy {:?}", frames, policy);
        Vm {
            shared: VmShared {
                swap: SwapStore::new(swap_disk),
                file_lock: Mutex::new(()),
                policy,
            },
            frames: Mutex::new(FramePool::new(frames)),
        }
    }

    /// Creates the supplemental page table and VM-side state for a new
    /// address space.
    pub fn create_space(&self, hw: Arc<dyn HardwareSpace>) -> AddressSpace {
        AddressSpace::new(hw)
    }

    /// Registers a page that materializes on first fault: `target` is the
    /// kind it becomes (never *uninitialized* itself), `source` the
    /// first-touch resolver and its context. The address is rounded down
    /// to its page; an occupied page is refused.
    pub fn allocate_lazy_page(
        &self,
        space: &mut AddressSpace,
        target: TargetKind,
        addr: VirtAddr,
        writable: bool,
        source: FirstTouch,
    ) -> Result<()> {
        let page = Page::new_uninit(addr.page_round_down(), writable, false, target, source)?;
        space.spt.insert(page)?;
        Ok(())
    }

    /// Creates and claims the initial user stack page, one page below the
    /// fixed stack top. Returns its address.
    pub fn setup_stack(&self, space: &mut AddressSpace) -> Result<VirtAddr> {
        let va = VirtAddr::new(USER_STACK_TOP - PAGE_SIZE);
        self.stack_page_at(space, va)?;
        Ok(va)
    }

    /// Copies bytes out of the page containing `addr` into `out`, claiming
    /// the page first if it is not resident. The range must not cross the
    /// page boundary.
    pub fn read_page_bytes(
        &self,
        space: &AddressSpace,
        addr: VirtAddr,
        out: &mut [u8],
    ) -> Result<()> {
        let page_ref = space.spt.find(addr).ok_or(Error::NotMapped)?;
        self.claim(space, &page_ref)?;
        let page = page_ref.lock();
        let frame = page.frame().ok_or(Error::NotMapped)?;
        let start = addr.page_offset();
        let end = start
            .checked_add(out.len())
            .filter(|&end| end <= PAGE_SIZE)
            .ok_or(Error::InvalidAddress("read crosses page boundary"))?;
        out.copy_from_slice(&frame.buffer().lock().bytes()[start..end]);
        Ok(())
    }

    /// Copies `bytes` into the page containing `addr`, claiming the page
    /// first if it is not resident. This is a kernel-side copy; user-level
    /// write protection does not apply. The range must not cross the page
    /// boundary.
    pub fn write_page_bytes(
        &self,
        space: &AddressSpace,
        addr: VirtAddr,
        bytes: &[u8],
    ) -> Result<()> {
        let page_ref = space.spt.find(addr).ok_or(Error::NotMapped)?;
        self.claim(space, &page_ref)?;
        let page = page_ref.lock();
        let frame = page.frame().ok_or(Error::NotMapped)?;
        let start = addr.page_offset();
        let end = start
            .checked_add(bytes.len())
            .filter(|&end| end <= PAGE_SIZE)
            .ok_or(Error::InvalidAddress("write crosses page boundary"))?;
        frame.buffer().lock().bytes_mut()[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Frame pool counters (acquisitions, evictions).
    pub fn frame_stats(&self) -> FramePoolStats {
        self.frames.lock().stats()
    }

    /// Number of swap slots currently reserved.
    pub fn swap_slots_in_use(&self) -> usize {
        self.shared.swap.slots_in_use()
    }
}

#[cfg(test)]
pub(crate) fn test_shared() -> VmShared {
    use minos_api::SECTOR_SIZE;

    struct NullDisk;

    impl SwapDisk for NullDisk {
        fn read_sector(&self, _index: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
            buf.fill(0);
            Ok(())
        }

        fn write_sector(&self, _index: usize, _buf: &[u8; SECTOR_SIZE]) -> Result<()> {
            Ok(())
        }

        fn sector_count(&self) -> usize {
            64
        }
    }

    VmShared {
        swap: SwapStore::new(Arc::new(NullDisk)),
        file_lock: Mutex::new(()),
        policy: VmPolicy::default(),
    }
}
