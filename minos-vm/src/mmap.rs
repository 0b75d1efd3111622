//! mmap/munmap manager
//!
//! Builds lazily-initialized file-backed page ranges and tears them down
//! with writeback. Registration creates one *uninitialized* page per
//! page-sized chunk; nothing touches the file until a page is first
//! faulted in.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::min;

use minos_api::memory::page_round_up;
use minos_api::{BackingFile, Error, Result, VirtAddr, PAGE_SIZE};

use crate::page::{FirstTouch, Page, SegmentSource, TargetKind};
use crate::space::AddressSpace;
use crate::{RollbackPolicy, Vm};

impl Vm {
    /// Maps `length` bytes of `file` starting at `offset` into `space` at
    /// `addr`. Address and offset must be page-aligned; the mapping gets
    /// its own reopened file handle so the caller's handle lifetime does
    /// not matter. Bytes past `min(file length, length)` read as zeroes.
    ///
    /// Returns the starting address.
    pub fn map_file(
        &self,
        space: &mut AddressSpace,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &Arc<dyn BackingFile>,
        offset: u64,
    ) -> Result<VirtAddr> {
        if addr.as_usize() == 0 {
            return Err(Error::InvalidAddress("mmap at page zero"));
        }
        if !addr.is_page_aligned() {
            return Err(Error::Unaligned("mmap address"));
        }
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(Error::Unaligned("mmap offset"));
        }
        if length == 0 {
            return Err(Error::InvalidAddress("zero-length mapping"));
        }
        let span = page_round_up(length);
        let end = addr.as_usize().checked_add(span).ok_or(Error::InvalidAddress("mapping wraps"))?;
        if minos_api::memory::is_kernel_address(end - 1) {
            return Err(Error::InvalidAddress("mapping reaches kernel range"));
        }

        let file = file.reopen()?;
        let mut remaining_read = min(file.length(), length as u64) as usize;

        log::debug!(
            "mmap {:#x}..{:#x} (read {} bytes from offset {})",
            addr.as_usize(),
            end,
            remaining_read,
            offset
        );

        let mut registered: Vec<VirtAddr> = Vec::with_capacity(span / PAGE_SIZE);
        let mut va = addr;
        let mut off = offset;
        while va.as_usize() < end {
            let read_bytes = min(remaining_read, PAGE_SIZE);
            let source = FirstTouch::FileSegment(SegmentSource {
                file: file.clone(),
                offset: off,
                read_bytes,
                zero_bytes: PAGE_SIZE - read_bytes,
            });
            let result = Page::new_uninit(va, writable, false, TargetKind::File, source)
                .and_then(|page| space.spt.insert(page).map(|_| ()));
            if let Err(e) = result {
                if self.shared.policy.rollback == RollbackPolicy::Strict {
                    // Only pending entries were created; dropping them needs
                    // no writeback.
                    for done in registered {
                        let _ = space.spt.take(done);
                    }
                }
                return Err(e);
            }
            registered.push(va);
            remaining_read -= read_bytes;
            va = VirtAddr::new(va.as_usize() + PAGE_SIZE);
            off += PAGE_SIZE as u64;
        }
        Ok(addr)
    }

    /// Unmaps the file mapping starting at `addr`: walks page-size strides
    /// while the table has an entry, writing dirty pages back and removing
    /// each, and stops at the first gap.
    pub fn unmap_file(&self, space: &mut AddressSpace, addr: VirtAddr) -> Result<()> {
        let mut va = addr.page_round_down();
        while space.spt.contains(va) {
            self.remove_page(space, va)?;
            va = VirtAddr::new(va.as_usize() + PAGE_SIZE);
        }
        Ok(())
    }
}
