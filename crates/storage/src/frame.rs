//! L1: a single buffer pool slot.
//!
//! `live`/`dirty`/`pins`/`last_access`/`page_id` are bookkeeping the pool's coarse
//! `Mutex<PoolState>` (§4.2, "the pool-wide exclusive latch... released before any
//! caller-facing latch is taken") mutates while holding `L_pool`; they're plain atomics so
//! `unpin` can touch `pins` without reacquiring it (unpin is "never I/O", §4.2). The page
//! bytes themselves live behind the frame's own [`Latch`] so a caller can hold a read or write
//! guard on the bytes *after* `L_pool` has already been released, per the locking hierarchy in
//! §5.
//!
//! Grounded on the teacher's `Page` (`reinhardbuyabo-rdbms/crates/storage/src/page.rs`) for the
//! byte-buffer-plus-metadata shape, generalized with the latch `MohamedAbdeen21-niwid-db`
//! pairs with its frames.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::latch::{ExclusiveGuard, Latch, SharedGuard};
use crate::page::{PageId, PageType, PAGE_SIZE};

pub struct Frame {
    latch: Latch,
    buffer: UnsafeCell<Box<[u8; PAGE_SIZE]>>,
    page_id: AtomicU32,
    live: AtomicBool,
    dirty: AtomicBool,
    pins: AtomicU64,
    last_access: AtomicU64,
    page_type: AtomicU8,
}

// SAFETY: `buffer` is only ever read through `FrameReadGuard` (behind `latch.shared()`) or
// written through `FrameWriteGuard` (behind `latch.exclusive()`); the latch enforces the
// exclusion an ordinary `Sync` bound would otherwise require the compiler to see statically.
unsafe impl Sync for Frame {}

impl Frame {
    pub fn new() -> Self {
        Frame {
            latch: Latch::new(),
            buffer: UnsafeCell::new(Box::new([0u8; PAGE_SIZE])),
            page_id: AtomicU32::new(0),
            live: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            pins: AtomicU64::new(0),
            last_access: AtomicU64::new(0),
            page_type: AtomicU8::new(PageType::Free as u8),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_page_id(&self, id: PageId) {
        self.page_id.store(id, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub fn pin_count(&self) -> u64 {
        self.pins.load(Ordering::Acquire)
    }

    pub(crate) fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the pin count. Never touches the pool mutex or performs I/O (§4.2).
    pub(crate) fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on a frame with pin count 0");
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_access(&self, value: u64) {
        self.last_access.store(value, Ordering::Release);
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type.load(Ordering::Acquire))
            .expect("frame page_type byte always holds a valid discriminant")
    }

    pub(crate) fn set_page_type(&self, page_type: PageType) {
        self.page_type.store(page_type as u8, Ordering::Release);
    }

    /// Acquires a shared hold on the frame's bytes.
    pub fn read(&self) -> FrameReadGuard<'_> {
        let guard = self.latch.shared();
        FrameReadGuard {
            _guard: guard,
            ptr: self.buffer.get(),
        }
    }

    /// Acquires an exclusive hold on the frame's bytes.
    pub fn write(&self) -> FrameWriteGuard<'_> {
        let guard = self.latch.exclusive();
        FrameWriteGuard {
            _guard: guard,
            ptr: self.buffer.get(),
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FrameReadGuard<'a> {
    _guard: SharedGuard<'a>,
    ptr: *const [u8; PAGE_SIZE],
}

impl Deref for FrameReadGuard<'_> {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the shared guard guarantees no concurrent writer.
        unsafe { &*self.ptr }
    }
}

pub struct FrameWriteGuard<'a> {
    _guard: ExclusiveGuard<'a>,
    ptr: *mut [u8; PAGE_SIZE],
}

impl Deref for FrameWriteGuard<'_> {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the exclusive guard guarantees no concurrent reader or writer.
        unsafe { &*self.ptr }
    }
}

impl DerefMut for FrameWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: see above.
        unsafe { &mut *self.ptr }
    }
}
