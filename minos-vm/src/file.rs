//! File-backed backing driver
//!
//! Pages of a memory-mapped file read their contents from the file on
//! materialization and, when dirty, write them back at the same offset on
//! eviction or destruction. All file traffic goes through the subsystem's
//! serializing file lock so writeback never interleaves with another
//! context's access to the same region.

use minos_api::{Error, HardwareSpace, Result, VirtAddr};

use crate::frame::ResidentFrame;
use crate::page::SegmentSource;
use crate::VmShared;

/// Driver state for one file-backed page: the mapping parameters captured
/// when the mmap registered it.
pub struct FilePage {
    src: SegmentSource,
}

impl FilePage {
    pub(crate) fn new(src: SegmentSource) -> Self {
        FilePage { src }
    }

    pub(crate) fn source(&self) -> &SegmentSource {
        &self.src
    }

    /// Byte offset of this page within the backing file.
    pub fn offset(&self) -> u64 {
        self.src.offset
    }

    /// Bytes backed by file contents; the rest of the page is zero-fill.
    pub fn read_bytes(&self) -> usize {
        self.src.read_bytes
    }
}

/// Reads a segment's file bytes into `buf` and zero-fills the remainder.
/// Short reads (offset at or past end of file) extend the zero-fill.
pub(crate) fn read_segment(src: &SegmentSource, buf: &mut [u8], shared: &VmShared) -> Result<()> {
    if src.read_bytes + src.zero_bytes != buf.len() {
        return Err(Error::Io("segment does not cover the page"));
    }
    let n = {
        let _guard = shared.file_lock.lock();
        src.file.read_at(&mut buf[..src.read_bytes], src.offset)?
    };
    buf[n..].fill(0);
    Ok(())
}

pub(crate) fn materialize_in(page: &FilePage, buf: &mut [u8], shared: &VmShared) -> Result<()> {
    read_segment(&page.src, buf, shared)
}

/// Writes the page back to its file iff the hardware dirty bit is set, then
/// detaches the hardware mapping.
pub(crate) fn materialize_out(
    va: VirtAddr,
    page: &mut FilePage,
    buf: &[u8],
    hw: &dyn HardwareSpace,
    shared: &VmShared,
) -> Result<()> {
    writeback_if_dirty(va, page, buf, hw, shared)?;
    hw.unmap(va);
    Ok(())
}

/// Same writeback as [`materialize_out`]; destruction and eviction share it
/// so running both is idempotent.
pub(crate) fn destroy(
    va: VirtAddr,
    page: &mut FilePage,
    resident: Option<&ResidentFrame>,
    hw: &dyn HardwareSpace,
    shared: &VmShared,
) -> Result<()> {
    if let Some(frame) = resident {
        let buf = frame.buffer().lock();
        writeback_if_dirty(va, page, buf.bytes(), hw, shared)?;
    }
    hw.unmap(va);
    Ok(())
}

fn writeback_if_dirty(
    va: VirtAddr,
    page: &FilePage,
    buf: &[u8],
    hw: &dyn HardwareSpace,
    shared: &VmShared,
) -> Result<()> {
    if !hw.is_dirty(va) {
        return Ok(());
    }
    let _guard = shared.file_lock.lock();
    let n = page.src.file.write_at(&buf[..page.src.read_bytes], page.src.offset)?;
    if n != page.src.read_bytes {
        return Err(Error::Io("short write during file writeback"));
    }
    hw.clear_dirty(va);
    log::trace!(
        "writeback {:#x}: {} bytes at offset {}",
        va.as_usize(),
        page.src.read_bytes,
        page.src.offset
    );
    Ok(())
}
