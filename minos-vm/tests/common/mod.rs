//! In-memory collaborator doubles for the integration tests.
//!
//! [`SoftSpace`] stands in for the hardware page tables, [`MemFile`] for a
//! filesystem file, and [`MemDisk`] for the swap disk. All three track just
//! enough state for the tests to observe mapping, dirtiness, and I/O.

use std::collections::HashMap;
use std::sync::Arc;

use minos_api::{
    BackingFile, Error, HardwareSpace, PhysAddr, Result, SwapDisk, VirtAddr, SECTOR_SIZE,
};
use minos_vm::{Vm, VmPolicy};
use spin::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A `Vm` with `frames` physical frames and an 8-slot in-memory swap disk.
pub fn vm_with_frames(frames: usize, policy: VmPolicy) -> Vm {
    vm_with_disk(frames, MemDisk::new(64), policy)
}

pub fn vm_with_disk(frames: usize, disk: Arc<impl SwapDisk + 'static>, policy: VmPolicy) -> Vm {
    Vm::new(frames, disk, policy)
}

struct SoftMapping {
    pa: PhysAddr,
    #[allow(dead_code)]
    writable: bool,
    dirty: bool,
}

/// Software stand-in for one address space's hardware page tables.
pub struct SoftSpace {
    maps: Mutex<HashMap<VirtAddr, SoftMapping>>,
}

impl SoftSpace {
    pub fn new() -> Arc<Self> {
        Arc::new(SoftSpace {
            maps: Mutex::new(HashMap::new()),
        })
    }

    pub fn mapped(&self, va: VirtAddr) -> bool {
        self.maps.lock().contains_key(&va.page_round_down())
    }

    pub fn mapping_count(&self) -> usize {
        self.maps.lock().len()
    }

    /// Simulates a store through the mapping by setting the dirty bit.
    pub fn set_dirty(&self, va: VirtAddr) {
        if let Some(m) = self.maps.lock().get_mut(&va.page_round_down()) {
            m.dirty = true;
        }
    }
}

impl HardwareSpace for SoftSpace {
    fn map(&self, va: VirtAddr, pa: PhysAddr, writable: bool) -> Result<()> {
        self.maps.lock().insert(
            va,
            SoftMapping {
                pa,
                writable,
                dirty: false,
            },
        );
        Ok(())
    }

    fn unmap(&self, va: VirtAddr) {
        self.maps.lock().remove(&va);
    }

    fn is_dirty(&self, va: VirtAddr) -> bool {
        self.maps.lock().get(&va).is_some_and(|m| m.dirty)
    }

    fn clear_dirty(&self, va: VirtAddr) {
        if let Some(m) = self.maps.lock().get_mut(&va) {
            m.dirty = false;
        }
    }

    fn probe(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.maps.lock().get(&va).map(|m| m.pa)
    }
}

/// In-memory backing file. Reopened handles share the same contents.
pub struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemFile {
    pub fn new(contents: Vec<u8>) -> Arc<Self> {
        Arc::new(MemFile {
            data: Arc::new(Mutex::new(contents)),
            writes: Arc::new(Mutex::new(0)),
        })
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Number of `write_at` calls across all handles.
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }

    /// Upcast helper; `map_file` takes the trait object.
    pub fn handle(self: &Arc<Self>) -> Arc<dyn BackingFile> {
        self.clone()
    }
}

impl BackingFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.data.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let mut data = self.data.lock();
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        *self.writes.lock() += 1;
        Ok(buf.len())
    }

    fn length(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn reopen(&self) -> Result<Arc<dyn BackingFile>> {
        Ok(Arc::new(MemFile {
            data: self.data.clone(),
            writes: self.writes.clone(),
        }))
    }
}

/// Hardware page tables that refuse every `map` call.
pub struct BrokenMapSpace;

impl BrokenMapSpace {
    pub fn new() -> Arc<Self> {
        Arc::new(BrokenMapSpace)
    }
}

impl HardwareSpace for BrokenMapSpace {
    fn map(&self, _va: VirtAddr, _pa: PhysAddr, _writable: bool) -> Result<()> {
        Err(Error::Io("page table update refused"))
    }

    fn unmap(&self, _va: VirtAddr) {}

    fn is_dirty(&self, _va: VirtAddr) -> bool {
        false
    }

    fn clear_dirty(&self, _va: VirtAddr) {}

    fn probe(&self, _va: VirtAddr) -> Option<PhysAddr> {
        None
    }
}

/// Backing file whose writes always fail; reads serve the given contents.
pub struct BrokenWriteFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl BrokenWriteFile {
    pub fn new(contents: Vec<u8>) -> Arc<Self> {
        Arc::new(BrokenWriteFile {
            data: Arc::new(Mutex::new(contents)),
        })
    }

    pub fn handle(self: &Arc<Self>) -> Arc<dyn BackingFile> {
        self.clone()
    }
}

impl BackingFile for BrokenWriteFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.data.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, _buf: &[u8], _offset: u64) -> Result<usize> {
        Err(Error::Io("file write failed"))
    }

    fn length(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn reopen(&self) -> Result<Arc<dyn BackingFile>> {
        Ok(Arc::new(BrokenWriteFile {
            data: self.data.clone(),
        }))
    }
}

/// Swap disk whose writes always fail; reads return zeroes.
pub struct BrokenWriteDisk {
    count: usize,
}

impl BrokenWriteDisk {
    pub fn new(sector_count: usize) -> Arc<Self> {
        Arc::new(BrokenWriteDisk {
            count: sector_count,
        })
    }
}

impl SwapDisk for BrokenWriteDisk {
    fn read_sector(&self, _index: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        buf.fill(0);
        Ok(())
    }

    fn write_sector(&self, _index: usize, _buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        Err(Error::Io("swap write failed"))
    }

    fn sector_count(&self) -> usize {
        self.count
    }
}

/// In-memory swap disk.
pub struct MemDisk {
    sectors: Mutex<Vec<u8>>,
    count: usize,
}

impl MemDisk {
    pub fn new(sector_count: usize) -> Arc<Self> {
        Arc::new(MemDisk {
            sectors: Mutex::new(vec![0u8; sector_count * SECTOR_SIZE]),
            count: sector_count,
        })
    }
}

impl SwapDisk for MemDisk {
    fn read_sector(&self, index: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        let sectors = self.sectors.lock();
        let start = index * SECTOR_SIZE;
        buf.copy_from_slice(&sectors[start..start + SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&self, index: usize, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        let mut sectors = self.sectors.lock();
        let start = index * SECTOR_SIZE;
        sectors[start..start + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> usize {
        self.count
    }
}
