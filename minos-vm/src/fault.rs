//! Page-fault orchestrator
//!
//! Central dispatch for every hardware page fault: validate the address,
//! look the page up, grow the stack when the miss fits the growth
//! heuristic, enforce write protection, then claim a frame and materialize
//! the page. Fatal conditions come back as `Err`; the trap handler decides
//! what to do with the faulting context.

use alloc::sync::Arc;

use minos_api::memory::{MAX_STACK_SIZE, STACK_SLOP, USER_STACK_TOP};
use minos_api::{Error, FaultKind, Result, VirtAddr};

use crate::page::{FirstTouch, Page, TargetKind};
use crate::space::AddressSpace;
use crate::spt::PageRef;
use crate::Vm;

impl Vm {
    /// Handles one hardware page fault.
    ///
    /// `sp` is the faulting context's stack pointer as captured by the trap
    /// frame; for kernel-context faults the recorded user stack pointer on
    /// `space` is used instead.
    pub fn handle_page_fault(
        &self,
        space: &mut AddressSpace,
        addr: VirtAddr,
        kind: FaultKind,
        sp: VirtAddr,
    ) -> Result<()> {
        log::trace!("page fault at {:#x} ({:?})", addr.as_usize(), kind);

        if addr.is_kernel() {
            return Err(Error::InvalidAddress("fault in kernel address range"));
        }
        // A fault on a present page is a protection violation, not demand
        // paging work.
        if kind.contains(FaultKind::PRESENT) {
            return Err(Error::PermissionDenied("access violates page protections"));
        }

        let page_ref = match space.spt.find(addr) {
            Some(page_ref) => page_ref,
            None => {
                let sp = if kind.contains(FaultKind::USER) {
                    sp
                } else {
                    space.stack_pointer()
                };
                if !is_stack_growth(addr, sp) {
                    return Err(Error::NotMapped);
                }
                self.grow_stack(space, addr)?;
                // Retry the lookup; the new page goes down the normal path.
                space.spt.find(addr).ok_or(Error::NotMapped)?
            }
        };

        {
            let page = page_ref.lock();
            if kind.contains(FaultKind::WRITE) && !page.writable() {
                return Err(Error::PermissionDenied("write to read-only page"));
            }
        }

        self.claim(space, &page_ref)
    }

    /// Forces the page registered at `addr` resident. Fails with
    /// [`Error::NotMapped`] if nothing is registered there.
    pub fn claim_resident(&self, space: &AddressSpace, addr: VirtAddr) -> Result<()> {
        let page_ref = space.spt.find(addr).ok_or(Error::NotMapped)?;
        self.claim(space, &page_ref)
    }

    /// Claims a frame for `page_ref` and materializes it: acquire (evicting
    /// if needed), link page↔frame, install the hardware mapping, fill the
    /// frame from the backing store, and only then make the frame
    /// evictable. Already-resident pages are a no-op.
    pub(crate) fn claim(&self, space: &AddressSpace, page_ref: &PageRef) -> Result<()> {
        if page_ref.lock().is_resident() {
            return Ok(());
        }

        // The pool lock is never taken while holding a page lock; eviction
        // inside acquire() takes them in pool→page order.
        let frame = self.frames.lock().acquire(&self.shared)?;
        let index = frame.index();

        let mut page = page_ref.lock();
        let va = page.va();
        if let Err(e) = space.hardware().map(va, frame.phys_addr(), page.writable()) {
            drop(page);
            self.frames.lock().release(index);
            return Err(e);
        }
        let buf = frame.buffer().clone();
        page.set_frame(frame);

        let filled = {
            let mut buf = buf.lock();
            crate::page::materialize_in(&mut page, buf.bytes_mut(), &self.shared)
        };
        match filled {
            Ok(()) => {
                drop(page);
                self.frames
                    .lock()
                    .attach(index, Arc::downgrade(page_ref), space.hardware().clone());
                Ok(())
            }
            Err(e) => {
                space.hardware().unmap(va);
                page.clear_frame();
                drop(page);
                self.frames.lock().release(index);
                Err(e)
            }
        }
    }

    /// Registers a zero-fill anonymous page for a fault that the stack
    /// growth heuristic accepted.
    fn grow_stack(&self, space: &mut AddressSpace, addr: VirtAddr) -> Result<()> {
        let va = addr.page_round_down();
        log::debug!("growing stack with page at {:#x}", va.as_usize());
        self.insert_stack_page(space, va)?;
        Ok(())
    }

    /// Registers a stack-marked, writable, zero-fill anonymous page at `va`
    /// without claiming it.
    pub(crate) fn insert_stack_page(
        &self,
        space: &mut AddressSpace,
        va: VirtAddr,
    ) -> Result<PageRef> {
        let page = Page::new_uninit(va, true, true, TargetKind::Anon, FirstTouch::ZeroFill)?;
        space.spt.insert(page)
    }

    /// Creates and immediately claims a stack page at `va`. Used by initial
    /// stack setup.
    pub(crate) fn stack_page_at(&self, space: &mut AddressSpace, va: VirtAddr) -> Result<()> {
        let page_ref = self.insert_stack_page(space, va)?;
        self.claim(space, &page_ref)
    }
}

/// Stack growth heuristic: the miss must lie inside the stack's 1MB
/// ceiling, below the stack top, and at most [`STACK_SLOP`] bytes below the
/// recorded stack pointer (push instructions fault before moving it).
fn is_stack_growth(addr: VirtAddr, sp: VirtAddr) -> bool {
    let addr = addr.as_usize();
    addr > USER_STACK_TOP - MAX_STACK_SIZE
        && addr < USER_STACK_TOP
        && addr + STACK_SLOP > sp.as_usize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_rejects_beyond_max_stack() {
        let sp = VirtAddr::new(USER_STACK_TOP - MAX_STACK_SIZE + 8);
        assert!(!is_stack_growth(
            VirtAddr::new(USER_STACK_TOP - MAX_STACK_SIZE - 1),
            sp
        ));
        assert!(!is_stack_growth(
            VirtAddr::new(USER_STACK_TOP - MAX_STACK_SIZE),
            sp
        ));
        assert!(is_stack_growth(
            VirtAddr::new(USER_STACK_TOP - MAX_STACK_SIZE + 1),
            sp
        ));
    }

    #[test]
    fn heuristic_allows_push_slop() {
        let sp = VirtAddr::new(USER_STACK_TOP - 0x2000);
        // A push faults just below the still-undecremented stack pointer.
        assert!(is_stack_growth(VirtAddr::new(sp.as_usize() - 8), sp));
        assert!(is_stack_growth(VirtAddr::new(sp.as_usize() - 31), sp));
        assert!(!is_stack_growth(VirtAddr::new(sp.as_usize() - 32), sp));
    }

    #[test]
    fn heuristic_rejects_at_or_above_stack_top() {
        let sp = VirtAddr::new(USER_STACK_TOP - 64);
        assert!(!is_stack_growth(VirtAddr::new(USER_STACK_TOP), sp));
        assert!(is_stack_growth(VirtAddr::new(USER_STACK_TOP - 1), sp));
    }
}
