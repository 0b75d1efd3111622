//! Anonymous backing driver
//!
//! Anonymous pages have no file behind them: their contents exist only in
//! memory, and under pressure they spill to the swap disk. A page that has
//! never been touched and has no swap slot reads back as zeroes.

use minos_api::{Error, HardwareSpace, Result, VirtAddr};

use crate::VmShared;

/// Driver state for one anonymous page: the swap slot holding its contents
/// while it is not resident, if any.
pub struct AnonPage {
    slot: Option<usize>,
}

impl AnonPage {
    pub(crate) fn new() -> Self {
        AnonPage { slot: None }
    }

    /// Swap slot currently assigned to this page.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }
}

/// Fills `buf` from the page's swap slot, or zero-fills on first touch.
///
/// Whether the slot reservation survives the swap-in is a policy decision;
/// see [`crate::VmPolicy::retain_slot_on_swap_in`].
pub(crate) fn materialize_in(
    va: VirtAddr,
    page: &mut AnonPage,
    buf: &mut [u8],
    shared: &VmShared,
) -> Result<()> {
    match page.slot {
        None => {
            buf.fill(0);
            Ok(())
        }
        Some(slot) => {
            if !shared.swap.slot_in_use(slot) {
                return Err(Error::Io("swap slot no longer holds this page"));
            }
            shared.swap.read_slot(slot, buf)?;
            log::trace!("swap in {:#x} <- slot {}", va.as_usize(), slot);
            if !shared.policy.retain_slot_on_swap_in {
                shared.swap.release_slot(slot);
                page.slot = None;
            }
            Ok(())
        }
    }
}

/// Writes `buf` to a freshly reserved swap slot and detaches the hardware
/// mapping. A full slot table propagates as [`Error::SwapExhausted`].
pub(crate) fn materialize_out(
    va: VirtAddr,
    page: &mut AnonPage,
    buf: &[u8],
    hw: &dyn HardwareSpace,
    shared: &VmShared,
) -> Result<()> {
    // A retained slot from an earlier swap-out is superseded by this one.
    if let Some(old) = page.slot.take() {
        shared.swap.release_slot(old);
    }
    let slot = shared.swap.allocate_slot()?;
    if let Err(e) = shared.swap.write_slot(slot, buf) {
        shared.swap.release_slot(slot);
        return Err(e);
    }
    page.slot = Some(slot);
    hw.unmap(va);
    log::trace!("swap out {:#x} -> slot {}", va.as_usize(), slot);
    Ok(())
}

/// Releases the swap slot of a page destroyed while swapped out. The frame,
/// if any, is detached by the caller.
pub(crate) fn destroy(page: &mut AnonPage, shared: &VmShared) -> Result<()> {
    if let Some(slot) = page.slot.take() {
        shared.swap.release_slot(slot);
    }
    Ok(())
}
