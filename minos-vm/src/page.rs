//! Page metadata and backing-store dispatch
//!
//! A [`Page`] records the software-side state of one virtual page: where its
//! contents live when it is not resident, and which frame backs it when it
//! is. The backing kind is a tagged union ([`PageBacking`]): a page starts
//! *uninitialized* and converts exactly once, on first touch, into an
//! anonymous or file-backed page. The conversion rewrites the tag on the
//! same entry; it never allocates a new one.

use alloc::sync::Arc;

use minos_api::{BackingFile, Error, HardwareSpace, Result, VirtAddr};

use crate::anon::{self, AnonPage};
use crate::file::{self, FilePage};
use crate::frame::ResidentFrame;
use crate::VmShared;

/// Which concrete kind an uninitialized page becomes on first touch.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Becomes an anonymous page (swap-disk backed once evicted)
    Anon,
    /// Becomes a file-backed page (written back to its file)
    File,
}

/// First-touch content source for an uninitialized page.
///
/// Cloneable so fork-copy can replicate a pending resolver into the child
/// without materializing it.
#[derive(Clone)]
pub enum FirstTouch {
    /// Fill the frame with zeroes.
    ZeroFill,
    /// Read part of a file into the frame and zero the tail.
    FileSegment(SegmentSource),
}

/// Resolver context for file-fed first touches: lazy ELF segments and mmap
/// pages both use this shape.
#[derive(Clone)]
pub struct SegmentSource {
    /// Backing file handle (independent of the caller's handle)
    pub file: Arc<dyn BackingFile>,
    /// Byte offset of this page's data within the file
    pub offset: u64,
    /// Bytes to read from the file, `<= PAGE_SIZE`
    pub read_bytes: usize,
    /// Bytes to zero-fill after the read portion
    pub zero_bytes: usize,
}

/// Not-yet-materialized page state: the stored resolver and the kind it
/// converts into.
pub struct UninitPage {
    pub(crate) target: TargetKind,
    pub(crate) source: FirstTouch,
}

/// Tagged backing-store state of a page.
pub enum PageBacking {
    /// Created but never touched; carries its first-touch resolver
    Uninit(UninitPage),
    /// Anonymous memory, swapped to the swap disk under pressure
    Anon(AnonPage),
    /// Memory-mapped file contents, written back to the file when dirty
    File(FilePage),
}

impl PageBacking {
    /// The kind this backing currently is, counting `Uninit` by its target.
    pub fn target_kind(&self) -> TargetKind {
        match self {
            PageBacking::Uninit(u) => u.target,
            PageBacking::Anon(_) => TargetKind::Anon,
            PageBacking::File(_) => TargetKind::File,
        }
    }

    /// True while the first touch is still pending.
    pub fn is_uninit(&self) -> bool {
        matches!(self, PageBacking::Uninit(_))
    }
}

/// One virtual page of one address space.
///
/// Owned exclusively by its SPT entry (behind `Arc<Mutex<_>>` so the frame
/// evictor can reach it); the frame link is a non-owning handle into the
/// global frame pool.
pub struct Page {
    va: VirtAddr,
    writable: bool,
    stack: bool,
    backing: PageBacking,
    frame: Option<ResidentFrame>,
}

impl Page {
    /// Creates an uninitialized page pending first-touch materialization.
    ///
    /// `va` must be page-aligned; a `File` target must carry a
    /// `FileSegment` source, since the conversion takes its mapping
    /// parameters from it.
    pub(crate) fn new_uninit(
        va: VirtAddr,
        writable: bool,
        stack: bool,
        target: TargetKind,
        source: FirstTouch,
    ) -> Result<Self> {
        if !va.is_page_aligned() {
            return Err(Error::Unaligned("page virtual address"));
        }
        if target == TargetKind::File && !matches!(source, FirstTouch::FileSegment(_)) {
            return Err(Error::InvalidAddress("file-backed page needs a file segment source"));
        }
        Ok(Page {
            va,
            writable,
            stack,
            backing: PageBacking::Uninit(UninitPage { target, source }),
            frame: None,
        })
    }

    /// Creates an already-materialized anonymous page with no swap slot.
    /// Used by fork-copy, which claims and byte-copies immediately.
    pub(crate) fn new_anon(va: VirtAddr, writable: bool) -> Self {
        Page {
            va,
            writable,
            stack: false,
            backing: PageBacking::Anon(AnonPage::new()),
            frame: None,
        }
    }

    /// Creates an already-materialized file-backed page. Used by fork-copy.
    pub(crate) fn new_file(va: VirtAddr, writable: bool, src: SegmentSource) -> Self {
        Page {
            va,
            writable,
            stack: false,
            backing: PageBacking::File(FilePage::new(src)),
            frame: None,
        }
    }

    pub fn va(&self) -> VirtAddr {
        self.va
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// True for pages created by stack setup or stack growth.
    pub fn is_stack(&self) -> bool {
        self.stack
    }

    pub fn backing(&self) -> &PageBacking {
        &self.backing
    }

    /// Resident iff a frame currently backs this page.
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub(crate) fn frame(&self) -> Option<&ResidentFrame> {
        self.frame.as_ref()
    }

    pub(crate) fn set_frame(&mut self, frame: ResidentFrame) {
        debug_assert!(self.frame.is_none(), "page already has a frame");
        self.frame = Some(frame);
    }

    pub(crate) fn clear_frame(&mut self) -> Option<ResidentFrame> {
        self.frame.take()
    }
}

/// Fills `buf` (the page's freshly linked frame) from the backing store.
///
/// For an uninitialized page this runs the stored resolver and then rewrites
/// the tag to the target kind; the conversion happens on this same `Page`,
/// keyed by the same virtual address, exactly once.
pub(crate) fn materialize_in(page: &mut Page, buf: &mut [u8], shared: &VmShared) -> Result<()> {
    match &mut page.backing {
        PageBacking::Uninit(uninit) => {
            match &uninit.source {
                FirstTouch::ZeroFill => buf.fill(0),
                FirstTouch::FileSegment(src) => file::read_segment(src, buf, shared)?,
            }
            // One-way, one-time tag rewrite.
            let converted = match uninit.target {
                TargetKind::Anon => PageBacking::Anon(AnonPage::new()),
                TargetKind::File => match &uninit.source {
                    FirstTouch::FileSegment(src) => PageBacking::File(FilePage::new(src.clone())),
                    // Rejected at construction time.
                    FirstTouch::ZeroFill => return Err(Error::InvalidAddress("file page without segment")),
                },
            };
            log::trace!("page {:#x}: first touch, now {:?}", page.va.as_usize(), converted.target_kind());
            page.backing = converted;
            Ok(())
        }
        PageBacking::Anon(anon_page) => anon::materialize_in(page.va, anon_page, buf, shared),
        PageBacking::File(file_page) => file::materialize_in(file_page, buf, shared),
    }
}

/// Persists the page's resident contents and detaches its hardware mapping,
/// in preparation for the frame being reused.
pub(crate) fn materialize_out(
    page: &mut Page,
    buf: &[u8],
    hw: &dyn HardwareSpace,
    shared: &VmShared,
) -> Result<()> {
    match &mut page.backing {
        // Never resident, so never evicted.
        PageBacking::Uninit(_) => {
            debug_assert!(false, "evicting an uninitialized page");
            Ok(())
        }
        PageBacking::Anon(anon_page) => anon::materialize_out(page.va, anon_page, buf, hw, shared),
        PageBacking::File(file_page) => file::materialize_out(page.va, file_page, buf, hw, shared),
    }
}

/// Releases driver-owned resources before the page metadata is dropped.
///
/// File-backed pages write back if dirty (idempotent with
/// [`materialize_out`]); anonymous pages destroyed while swapped out release
/// their slot. The caller detaches and frees the frame afterwards.
pub(crate) fn destroy(page: &mut Page, hw: &dyn HardwareSpace, shared: &VmShared) -> Result<()> {
    match &mut page.backing {
        PageBacking::Uninit(_) => Ok(()),
        PageBacking::Anon(anon_page) => anon::destroy(anon_page, shared),
        PageBacking::File(file_page) => {
            let resident = page.frame.as_ref();
            file::destroy(page.va, file_page, resident, hw, shared)
        }
    }
}

impl core::fmt::Debug for TargetKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TargetKind::Anon => write!(f, "anon"),
            TargetKind::File => write!(f, "file"),
        }
    }
}
