//! Supplemental page table
//!
//! Per-address-space registry from page-aligned virtual address to page
//! metadata, supplementing the hardware page tables with the software-only
//! state demand paging needs. Lookup rounds the query down to its page
//! boundary; insertion enforces one entry per virtual page.
//!
//! The table-level operations that need the frame pool or the backing
//! drivers (remove, fork-copy, teardown) live on [`Vm`] below.

use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;
use minos_api::{Error, Result, VirtAddr};
use spin::Mutex;

use crate::page::{Page, PageBacking, SegmentSource, TargetKind};
use crate::space::AddressSpace;
use crate::{RollbackPolicy, Vm};

pub(crate) type PageRef = Arc<Mutex<Page>>;

/// Supplemental page table: unique page metadata per virtual page.
pub struct Spt {
    pages: HashMap<VirtAddr, PageRef>,
}

impl Spt {
    pub fn new() -> Self {
        Spt { pages: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Registers a page. Fails with [`Error::AlreadyMapped`] if the table
    /// already holds an entry at that virtual page.
    pub(crate) fn insert(&mut self, page: Page) -> Result<PageRef> {
        let va = page.va();
        debug_assert!(va.is_page_aligned());
        if self.pages.contains_key(&va) {
            return Err(Error::AlreadyMapped);
        }
        let page_ref = Arc::new(Mutex::new(page));
        self.pages.insert(va, page_ref.clone());
        Ok(page_ref)
    }

    /// Looks up the page containing `va` (any byte of it).
    pub(crate) fn find(&self, va: VirtAddr) -> Option<PageRef> {
        self.pages.get(&va.page_round_down()).cloned()
    }

    /// True if any byte of `va`'s page is registered.
    pub fn contains(&self, va: VirtAddr) -> bool {
        self.pages.contains_key(&va.page_round_down())
    }

    pub(crate) fn take(&mut self, va: VirtAddr) -> Option<PageRef> {
        self.pages.remove(&va.page_round_down())
    }

    /// Registered page addresses, in no particular order.
    pub fn addresses(&self) -> Vec<VirtAddr> {
        self.pages.keys().copied().collect()
    }

    /// Observable state of the entry at `va`, if one is registered.
    pub fn entry_state(&self, va: VirtAddr) -> Option<EntryState> {
        self.find(va).map(|page_ref| {
            let page = page_ref.lock();
            EntryState {
                kind: page.backing().target_kind(),
                pending: page.backing().is_uninit(),
                resident: page.is_resident(),
                writable: page.writable(),
            }
        })
    }
}

/// Snapshot of one table entry for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryState {
    /// Kind the page is, or will become on first touch
    pub kind: TargetKind,
    /// First touch still pending
    pub pending: bool,
    /// A frame currently backs this page
    pub resident: bool,
    pub writable: bool,
}

impl Default for Spt {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one source entry taken under its lock, so fork-copy never
/// holds a page lock across claims.
enum CopySource {
    Uninit {
        writable: bool,
        stack: bool,
        target: TargetKind,
        source: crate::page::FirstTouch,
    },
    Stack,
    Anon {
        writable: bool,
    },
    File {
        writable: bool,
        src: SegmentSource,
    },
}

impl Vm {
    /// Removes one page: runs its backing driver's destroy step (writeback
    /// for dirty file pages, swap slot release for swapped-out anonymous
    /// pages), detaches its frame, and drops the entry.
    pub fn remove_page(&self, space: &mut AddressSpace, va: VirtAddr) -> Result<()> {
        let page_ref = space.spt.take(va).ok_or(Error::NotMapped)?;
        self.destroy_page(space, &page_ref)
    }

    pub(crate) fn destroy_page(&self, space: &AddressSpace, page_ref: &PageRef) -> Result<()> {
        let (result, released) = {
            let mut page = page_ref.lock();
            let result = crate::page::destroy(&mut page, space.hardware().as_ref(), &self.shared);
            let frame = page.clear_frame();
            if frame.is_some() {
                space.hardware().unmap(page.va());
            }
            (result, frame)
        };
        // The frame goes back to the pool even if writeback failed; the
        // entry is gone either way.
        if let Some(frame) = released {
            self.frames.lock().release(frame.index());
        }
        result
    }

    /// Fork-copy: replicates `src`'s table into `dst`.
    ///
    /// Pending (uninitialized) entries are copied as pending state — the
    /// child materializes them on its own first touch. Materialized entries
    /// are recreated in the child, forced resident, and byte-copied from
    /// the parent's frame. Stack-marked pages re-run stack setup in the
    /// child instead of copying bytes.
    pub fn copy_space(&self, src: &AddressSpace, dst: &mut AddressSpace) -> Result<()> {
        let mut created: Vec<VirtAddr> = Vec::new();
        let result = self.copy_entries(src, dst, &mut created);
        if result.is_err() && self.shared.policy.rollback == RollbackPolicy::Strict {
            for va in created {
                if let Err(e) = self.remove_page(dst, va) {
                    log::warn!("fork rollback failed at {:#x}: {}", va.as_usize(), e);
                }
            }
        }
        result
    }

    fn copy_entries(
        &self,
        src: &AddressSpace,
        dst: &mut AddressSpace,
        created: &mut Vec<VirtAddr>,
    ) -> Result<()> {
        for va in src.spt.addresses() {
            let Some(src_ref) = src.spt.find(va) else { continue };
            let snapshot = {
                let page = src_ref.lock();
                if page.is_stack() && !page.backing().is_uninit() {
                    CopySource::Stack
                } else {
                    match page.backing() {
                        PageBacking::Uninit(u) => CopySource::Uninit {
                            writable: page.writable(),
                            stack: page.is_stack(),
                            target: u.target,
                            source: u.source.clone(),
                        },
                        PageBacking::Anon(_) => CopySource::Anon {
                            writable: page.writable(),
                        },
                        PageBacking::File(f) => CopySource::File {
                            writable: page.writable(),
                            src: f.source().clone(),
                        },
                    }
                }
            };

            match snapshot {
                CopySource::Uninit { writable, stack, target, source } => {
                    let page = Page::new_uninit(va, writable, stack, target, source)?;
                    dst.spt.insert(page)?;
                    created.push(va);
                }
                CopySource::Stack => {
                    // Fresh stack page at the same address; no byte copy.
                    // Registered before the claim so a failed claim still
                    // rolls the entry back.
                    let dst_ref = self.insert_stack_page(dst, va)?;
                    created.push(va);
                    self.claim(dst, &dst_ref)?;
                }
                CopySource::Anon { writable } => {
                    let dst_ref = dst.spt.insert(Page::new_anon(va, writable))?;
                    created.push(va);
                    self.copy_resident_pair(src, &src_ref, dst, &dst_ref)?;
                }
                CopySource::File { writable, src: seg } => {
                    let dst_ref = dst.spt.insert(Page::new_file(va, writable, seg))?;
                    created.push(va);
                    self.copy_resident_pair(src, &src_ref, dst, &dst_ref)?;
                }
            }
        }
        Ok(())
    }

    /// Forces `src_ref` and `dst_ref` resident together and copies the
    /// source frame into the destination frame.
    ///
    /// Claiming the destination can evict the source when memory is tight,
    /// so the pair is re-claimed until both are resident at once. A pool
    /// that cannot hold two frames for them fails with
    /// [`Error::OutOfMemory`] instead of spinning.
    fn copy_resident_pair(
        &self,
        src: &AddressSpace,
        src_ref: &PageRef,
        dst: &AddressSpace,
        dst_ref: &PageRef,
    ) -> Result<()> {
        for _ in 0..4 {
            self.claim(src, src_ref)?;
            self.claim(dst, dst_ref)?;
            if copy_frame_bytes(src_ref, dst_ref) {
                return Ok(());
            }
        }
        Err(Error::OutOfMemory)
    }

    /// Tears the table down: every file-backed entry takes the writeback
    /// path first, then all entries and their frames are released. Errors
    /// are reported after the sweep finishes; the table always empties.
    pub fn teardown_space(&self, space: &mut AddressSpace) -> Result<()> {
        let mut first_err = None;
        for va in space.spt.addresses() {
            if let Err(e) = self.remove_page(space, va) {
                log::warn!("teardown writeback failed at {:#x}: {}", va.as_usize(), e);
                first_err.get_or_insert(e);
            }
        }
        debug_assert!(space.spt.is_empty());
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

/// Copies the full frame contents of `src` into `dst`'s frame. Returns
/// false without copying if either page lost its frame to eviction. The
/// bytes go through a stack-local staging buffer so only one frame lock is
/// held at a time.
fn copy_frame_bytes(src: &PageRef, dst: &PageRef) -> bool {
    let mut staged = [0u8; minos_api::PAGE_SIZE];
    {
        let page = src.lock();
        let Some(frame) = page.frame() else {
            return false;
        };
        staged.copy_from_slice(frame.buffer().lock().bytes());
    }
    {
        let page = dst.lock();
        let Some(frame) = page.frame() else {
            return false;
        };
        frame.buffer().lock().bytes_mut().copy_from_slice(&staged);
    }
    true
}
