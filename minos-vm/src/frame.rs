//! Frame pool and evictor
//!
//! The pool owns every physical frame available for user pages. Acquiring a
//! frame takes one off the free list; when the list is empty the oldest
//! claimed frame is evicted, FIFO — deliberately the simplest correct
//! policy. Frames enter the eviction queue only once a page has successfully
//! claimed them; an acquired-but-unclaimed frame cannot be chosen as a
//! victim.
//!
//! Frame contents live in pool-owned buffers shared as `Arc<Mutex<_>>`, so
//! backing drivers fill and drain them without holding the pool lock. The
//! page side keeps a [`ResidentFrame`] handle; the pool side keeps a weak
//! back-reference for eviction. No owning cycle either way.

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use minos_api::memory::PAGE_SHIFT;
use minos_api::{HardwareSpace, PhysAddr, Result, PAGE_SIZE};
use spin::Mutex;

use crate::page::Page;
use crate::VmShared;

/// Index of a frame within the pool.
pub type FrameIndex = usize;

/// Contents of one physical frame.
pub struct PageBuf([u8; PAGE_SIZE]);

impl PageBuf {
    fn zeroed() -> Self {
        PageBuf([0u8; PAGE_SIZE])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// A page's handle to the frame backing it while resident.
#[derive(Clone)]
pub struct ResidentFrame {
    index: FrameIndex,
    buf: Arc<Mutex<PageBuf>>,
}

impl ResidentFrame {
    pub fn index(&self) -> FrameIndex {
        self.index
    }

    pub fn phys_addr(&self) -> PhysAddr {
        PhysAddr::new(self.index << PAGE_SHIFT)
    }

    pub fn buffer(&self) -> &Arc<Mutex<PageBuf>> {
        &self.buf
    }
}

/// Reverse link from a claimed frame to the page it backs and that page's
/// hardware mapping handle, so eviction can reach both from any context.
struct FrameOwner {
    page: Weak<Mutex<Page>>,
    hw: Arc<dyn HardwareSpace>,
}

struct FrameSlot {
    buf: Arc<Mutex<PageBuf>>,
    owner: Option<FrameOwner>,
}

/// Running counters, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePoolStats {
    /// Frames handed out (free-list hits and evictions together)
    pub acquired: usize,
    /// Victims evicted to satisfy an acquire
    pub evictions: usize,
}

/// The global pool of physical frames, shared by all address spaces and
/// protected by a single lock.
pub struct FramePool {
    slots: Vec<FrameSlot>,
    free: Vec<FrameIndex>,
    /// Claimed frames in claim order; eviction pops the front.
    queue: VecDeque<FrameIndex>,
    stats: FramePoolStats,
}

impl FramePool {
    pub fn new(frames: usize) -> Self {
        let mut slots = Vec::with_capacity(frames);
        for _ in 0..frames {
            slots.push(FrameSlot {
                buf: Arc::new(Mutex::new(PageBuf::zeroed())),
                owner: None,
            });
        }
        // Pop order is irrelevant; the free list is not the eviction policy.
        let free = (0..frames).rev().collect();
        FramePool {
            slots,
            free,
            queue: VecDeque::with_capacity(frames),
            stats: FramePoolStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> FramePoolStats {
        self.stats
    }

    /// Hands out a frame, evicting the oldest claimed frame if none is
    /// free. Returns `Err` only when the victim's swap-out or writeback
    /// fails; an empty pool with nothing evictable is a fatal invariant
    /// violation and panics.
    pub(crate) fn acquire(&mut self, shared: &VmShared) -> Result<ResidentFrame> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => self.evict(shared)?,
        };
        self.stats.acquired += 1;
        Ok(ResidentFrame {
            index,
            buf: self.slots[index].buf.clone(),
        })
    }

    fn evict(&mut self, shared: &VmShared) -> Result<FrameIndex> {
        let Some(victim) = self.queue.pop_front() else {
            panic!("out of frames with no evictable victim");
        };
        let Some(owner) = self.slots[victim].owner.take() else {
            // Freed owner without queue removal would be a bookkeeping bug.
            panic!("queued frame {victim} has no owner");
        };
        if let Some(page_arc) = owner.page.upgrade() {
            let mut page = page_arc.lock();
            // The owning page may have detached this frame already.
            if page.frame().is_some_and(|f| f.index == victim) {
                let out = {
                    let buf = self.slots[victim].buf.lock();
                    crate::page::materialize_out(&mut page, buf.bytes(), owner.hw.as_ref(), shared)
                };
                if let Err(e) = out {
                    // Victim stays resident and evictable; the acquire fails.
                    drop(page);
                    self.slots[victim].owner = Some(owner);
                    self.queue.push_front(victim);
                    return Err(e);
                }
                page.clear_frame();
                log::debug!("evicted frame {} from page {:#x}", victim, page.va().as_usize());
            }
        }
        self.stats.evictions += 1;
        Ok(victim)
    }

    /// Registers the page↔frame link after a successful claim and makes the
    /// frame evictable.
    pub(crate) fn attach(
        &mut self,
        index: FrameIndex,
        page: Weak<Mutex<Page>>,
        hw: Arc<dyn HardwareSpace>,
    ) {
        debug_assert!(self.slots[index].owner.is_none());
        self.slots[index].owner = Some(FrameOwner { page, hw });
        self.queue.push_back(index);
    }

    /// Detaches a frame from its page (if any) and returns it to the free
    /// list. Used on page destruction and on failed claims.
    pub(crate) fn release(&mut self, index: FrameIndex) {
        self.slots[index].owner = None;
        if let Some(pos) = self.queue.iter().position(|&i| i == index) {
            self.queue.remove(pos);
        }
        self.free.push(index);
    }
}
