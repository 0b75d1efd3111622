//! Swap slot table and swap disk access
//!
//! The swap disk is carved into fixed slots of [`SECTORS_PER_SLOT`]
//! contiguous sectors, slot 0 starting at sector 0. A word-packed bitmap
//! tracks which slots hold valid swapped-out contents. The table is global
//! (one swap disk per system) and spin-locked; slot allocation is first-fit.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use minos_api::{Error, Result, SwapDisk, PAGE_SIZE, SECTOR_SIZE};
use minos_api::memory::SECTORS_PER_SLOT;
use spin::Mutex;

const BITS_PER_WORD: usize = u64::BITS as usize;

/// In-use bitmap over swap slots. A set bit means the slot holds valid
/// swapped-out content.
pub struct SlotTable {
    words: Vec<u64>,
    slots: usize,
}

impl SlotTable {
    pub fn new(slots: usize) -> Self {
        let words = vec![0u64; slots.div_ceil(BITS_PER_WORD)];
        SlotTable { words, slots }
    }

    /// Number of slots the table covers.
    pub fn len(&self) -> usize {
        self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    pub fn is_in_use(&self, slot: usize) -> bool {
        debug_assert!(slot < self.slots);
        self.words[slot / BITS_PER_WORD] & (1 << (slot % BITS_PER_WORD)) != 0
    }

    fn set(&mut self, slot: usize, in_use: bool) {
        debug_assert!(slot < self.slots);
        let mask = 1u64 << (slot % BITS_PER_WORD);
        if in_use {
            self.words[slot / BITS_PER_WORD] |= mask;
        } else {
            self.words[slot / BITS_PER_WORD] &= !mask;
        }
    }

    /// First-fit scan for a free slot; marks it in use.
    pub fn allocate(&mut self) -> Option<usize> {
        for w in 0..self.words.len() {
            let word = self.words[w];
            if word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let slot = w * BITS_PER_WORD + bit;
                if slot >= self.slots {
                    return None;
                }
                self.set(slot, true);
                return Some(slot);
            }
        }
        None
    }

    /// Returns a slot to the free pool.
    pub fn release(&mut self, slot: usize) {
        debug_assert!(self.is_in_use(slot), "releasing a free swap slot");
        self.set(slot, false);
    }

    /// Number of slots currently in use.
    pub fn in_use(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// The swap disk plus its locked slot table, injected into the anonymous
/// driver and the frame evictor at subsystem initialization.
pub struct SwapStore {
    disk: Arc<dyn SwapDisk>,
    table: Mutex<SlotTable>,
}

impl SwapStore {
    pub fn new(disk: Arc<dyn SwapDisk>) -> Self {
        let slots = disk.sector_count() / SECTORS_PER_SLOT;
        log::debug!("swap store: {} slots ({} sectors)", slots, disk.sector_count());
        SwapStore {
            disk,
            table: Mutex::new(SlotTable::new(slots)),
        }
    }

    /// Reserves a free slot, first-fit. Exhaustion is an error the caller
    /// propagates; it is never retried.
    pub fn allocate_slot(&self) -> Result<usize> {
        self.table.lock().allocate().ok_or(Error::SwapExhausted)
    }

    /// Frees a slot. The on-disk bytes are left behind; only the
    /// reservation goes away.
    pub fn release_slot(&self, slot: usize) {
        self.table.lock().release(slot);
    }

    pub fn slot_in_use(&self, slot: usize) -> bool {
        self.table.lock().is_in_use(slot)
    }

    pub fn slots_in_use(&self) -> usize {
        self.table.lock().in_use()
    }

    /// Reads one slot's sectors into `buf` (one full page).
    pub fn read_slot(&self, slot: usize, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut sector = [0u8; SECTOR_SIZE];
        for i in 0..SECTORS_PER_SLOT {
            self.disk.read_sector(slot * SECTORS_PER_SLOT + i, &mut sector)?;
            buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].copy_from_slice(&sector);
        }
        Ok(())
    }

    /// Writes `buf` (one full page) across one slot's sectors.
    pub fn write_slot(&self, slot: usize, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut sector = [0u8; SECTOR_SIZE];
        for i in 0..SECTORS_PER_SLOT {
            sector.copy_from_slice(&buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
            self.disk.write_sector(slot * SECTORS_PER_SLOT + i, &sector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_allocates_lowest_free_slot() {
        let mut table = SlotTable::new(70);
        for expected in 0..70 {
            assert_eq!(table.allocate(), Some(expected));
        }
        assert_eq!(table.allocate(), None);

        table.release(3);
        table.release(65);
        assert_eq!(table.allocate(), Some(3));
        assert_eq!(table.allocate(), Some(65));
        assert_eq!(table.allocate(), None);
    }

    #[test]
    fn in_use_counts_survive_word_boundaries() {
        let mut table = SlotTable::new(130);
        for _ in 0..130 {
            table.allocate();
        }
        assert_eq!(table.in_use(), 130);
        table.release(64);
        table.release(128);
        assert_eq!(table.in_use(), 128);
        assert!(!table.is_in_use(64));
        assert!(table.is_in_use(129));
    }

    #[test]
    fn tiny_table_respects_slot_count() {
        let mut table = SlotTable::new(2);
        assert_eq!(table.allocate(), Some(0));
        assert_eq!(table.allocate(), Some(1));
        assert_eq!(table.allocate(), None);
    }
}
