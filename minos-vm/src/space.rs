//! Per-context address space handle
//!
//! Bundles the pieces of one execution context the VM subsystem works on:
//! its supplemental page table and its hardware mapping handle, plus the
//! last stack pointer recorded on kernel entry (faults taken in kernel
//! context have no usable stack pointer of their own, so the stack growth
//! heuristic falls back to this one).

use alloc::sync::Arc;

use minos_api::{HardwareSpace, VirtAddr};

use crate::spt::Spt;

/// One address space as the VM subsystem sees it.
pub struct AddressSpace {
    pub(crate) spt: Spt,
    hw: Arc<dyn HardwareSpace>,
    stack_pointer: VirtAddr,
}

impl AddressSpace {
    pub(crate) fn new(hw: Arc<dyn HardwareSpace>) -> Self {
        AddressSpace {
            spt: Spt::new(),
            hw,
            stack_pointer: VirtAddr::new(minos_api::memory::USER_STACK_TOP),
        }
    }

    pub fn spt(&self) -> &Spt {
        &self.spt
    }

    pub fn hardware(&self) -> &Arc<dyn HardwareSpace> {
        &self.hw
    }

    /// Records the user stack pointer on entry to the kernel. The fault
    /// handler consults it when a fault arrives from kernel context.
    pub fn record_stack_pointer(&mut self, sp: VirtAddr) {
        self.stack_pointer = sp;
    }

    pub fn stack_pointer(&self) -> VirtAddr {
        self.stack_pointer
    }
}
