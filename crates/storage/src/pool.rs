//! L1 + L2a: the buffer pool and the page-directory allocator built on top of it.
//!
//! Structurally this splits the teacher's single `Arc<Mutex<BufferPoolState>>`
//! (`reinhardbuyabo-rdbms/crates/storage/src/buffer.rs`) into two pieces, per §9's note on the
//! self-referential frame table: `frames: Vec<Frame>` sits directly on `BufferPool`, outside any
//! mutex, so a caller holding a [`PinnedFrame`] can take the frame's own read/write latch
//! without reacquiring the pool lock. `state: Mutex<PoolState>` holds everything that must stay
//! serialized with the backing file — the page table, the op counter used for eviction
//! recency, and the file handle itself — matching §4.2's "the backing file is reached only from
//! inside the pool while `L_pool` is held". `L_pool` is taken for the full duration of
//! `pin`/`allocate_page`/`free_page`, including their I/O; it is released before the caller's
//! frame-latch acquisition in [`PinnedFrame::read`]/[`PinnedFrame::write`], respecting the
//! locking order in §5 (`L_pool` before any frame latch, never the reverse).
//!
//! Eviction replaces the teacher's `LRUReplacer`/`Replacer` trait (`replacer.rs`) with the
//! spec's literal two-phase scan: first an unoccupied frame, else the unpinned frame with the
//! smallest `last_access` counter (see [`find_victim`]).

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;

use crate::directory;
use crate::error::{StorageError, StorageResult};
use crate::file::FileAccessor;
use crate::frame::{Frame, FrameReadGuard, FrameWriteGuard};
use crate::page::{PageHeader, PageId, PageType, PAGE_SIZE};

struct PoolState {
    file: FileAccessor,
    page_table: HashMap<PageId, usize>,
    op_counter: u64,
}

pub struct BufferPool {
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Opens (creating if absent) the backing file and brings up `num_frames` frames. Formats
    /// page 0 as the root page-directory page if the file is new.
    ///
    /// The root directory page is pinned and unpinned through the same path as every other
    /// directory-page frame (see [`find_dir_page_in_chain`]) rather than held permanently — an
    /// earlier revision permanently pinned it to skip re-walking the chain on every
    /// allocate/free, but that wasted one whole frame for the pool's lifetime and made a 1- or
    /// 2-frame pool unusable (the head page alone would never free up a frame for anything
    /// else).
    pub fn open<P: AsRef<Path>>(path: P, num_frames: usize) -> StorageResult<Self> {
        assert!(num_frames > 0, "a buffer pool needs at least one frame");
        let file = FileAccessor::open(path)?;
        let frames: Vec<Frame> = (0..num_frames).map(|_| Frame::new()).collect();
        let mut state = PoolState { file, page_table: HashMap::new(), op_counter: 0 };

        let dir_frame = pin_locked(&mut state, &frames, 0, None)?;
        {
            let mut buf = frames[dir_frame].write();
            match PageHeader::parse(&buf[..]) {
                None => {
                    PageHeader::format(&mut buf[..], 0, PageType::Directory);
                    directory::init(&mut buf[..]);
                    drop(buf);
                    frames[dir_frame].mark_dirty();
                    frames[dir_frame].set_page_type(PageType::Directory);
                }
                Some(header) => {
                    // The root directory page is this engine's one page that every open must be
                    // able to trust blindly, since nothing else establishes whether the rest of
                    // the allocator bitmap chain is sane. A page 0 that parses (has a valid
                    // magic) but was formatted as something other than a directory page isn't a
                    // case this engine can recover from (§7's corrupt-directory-page policy).
                    if header.page_type != PageType::Directory {
                        drop(buf);
                        unpin_locked(&frames, dir_frame);
                        let err: StorageResult<()> =
                            Err(StorageError::CorruptDirectoryPage { page_id: 0 });
                        err.expect("root page-directory page (id 0) is corrupt");
                    }
                }
            }
        }
        unpin_locked(&frames, dir_frame);

        Ok(BufferPool { frames, state: Mutex::new(state) })
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Pins an existing page into a frame, loading it from disk if it isn't already resident.
    /// If `expected_type` is given, a page whose on-disk or resident type is neither `Free` nor
    /// that type fails with [`StorageError::PageTypeMismatch`] (§4.2 pin algorithm, step 1/4).
    pub fn pin(&self, page_id: PageId, expected_type: Option<PageType>) -> StorageResult<PinnedFrame<'_>> {
        let mut state = self.state.lock();
        let idx = pin_locked(&mut state, &self.frames, page_id, expected_type)?;
        Ok(PinnedFrame { pool: self, idx })
    }

    /// Allocates a fresh page of `page_type` via the page-directory bitmap, growing the
    /// directory's linked list if every existing directory page is full, and returns it
    /// pinned and formatted.
    pub fn allocate_page(&self, page_type: PageType) -> StorageResult<PinnedFrame<'_>> {
        let mut state = self.state.lock();
        let idx = allocate_locked(&mut state, &self.frames, page_type)?;
        Ok(PinnedFrame { pool: self, idx })
    }

    /// Frees a previously allocated page. Fails with [`StorageError::CannotFree`] if the page
    /// is currently pinned.
    pub fn free_page(&self, page_id: PageId) -> StorageResult<()> {
        let mut state = self.state.lock();
        free_locked(&mut state, &self.frames, page_id)
    }

    /// Flushes every dirty, resident page to disk without evicting it.
    pub fn flush_all(&self) -> StorageResult<()> {
        let state = self.state.lock();
        for (&page_id, &idx) in state.page_table.iter() {
            if self.frames[idx].is_dirty() {
                let buf = self.frames[idx].read();
                state.file.write_page(page_id, &buf[..])?;
                drop(buf);
                self.frames[idx].set_dirty(false);
            }
        }
        state.file.sync()
    }
}

fn find_victim(frames: &[Frame]) -> StorageResult<usize> {
    if let Some(idx) = frames.iter().position(|f| !f.is_live()) {
        return Ok(idx);
    }
    let mut best: Option<(usize, u64)> = None;
    for (idx, f) in frames.iter().enumerate() {
        if f.pin_count() == 0 {
            let la = f.last_access();
            if best.is_none_or(|(_, b)| la < b) {
                best = Some((idx, la));
            }
        }
    }
    best.map(|(idx, _)| idx).ok_or_else(|| {
        tracing::warn!(num_frames = frames.len(), "buffer pool exhausted, every frame is pinned");
        StorageError::Full
    })
}

/// Pins `page_id`, loading it from disk into a victim frame if it isn't already resident.
/// Callers must already hold `state`'s lock.
fn pin_locked(
    state: &mut PoolState,
    frames: &[Frame],
    page_id: PageId,
    expected_type: Option<PageType>,
) -> StorageResult<usize> {
    if let Some(&idx) = state.page_table.get(&page_id) {
        check_type(page_id, frames[idx].page_type(), expected_type)?;
        frames[idx].pin();
        state.op_counter += 1;
        frames[idx].set_last_access(state.op_counter);
        return Ok(idx);
    }

    let victim = find_victim(frames)?;
    if frames[victim].is_live() {
        if frames[victim].is_dirty() {
            tracing::debug!(
                evicted_page = frames[victim].page_id(),
                loading_page = page_id,
                "writing back dirty frame before eviction"
            );
            let buf = frames[victim].read();
            state.file.write_page(frames[victim].page_id(), &buf[..])?;
        }
        state.page_table.remove(&frames[victim].page_id());
    }

    let mut loaded = [0u8; PAGE_SIZE];
    state.file.read_page(page_id, &mut loaded)?;
    let loaded_type = match PageHeader::parse(&loaded) {
        Some(header) if header.page_id != page_id => {
            return Err(StorageError::Invalid { page_id });
        }
        Some(header) => header.page_type,
        None => PageType::Free,
    };
    check_type(page_id, loaded_type, expected_type)?;

    {
        let mut w = frames[victim].write();
        w.copy_from_slice(&loaded);
    }
    frames[victim].set_page_id(page_id);
    frames[victim].set_live(true);
    frames[victim].set_dirty(false);
    frames[victim].set_page_type(loaded_type);
    frames[victim].pin();
    state.op_counter += 1;
    frames[victim].set_last_access(state.op_counter);
    state.page_table.insert(page_id, victim);
    Ok(victim)
}

/// A page whose resident/on-disk type is `Free` (never formatted, or freed and not yet
/// reformatted) passes any `expected_type` check — only a formatted page of the *wrong* kind is
/// a mismatch (§4.2 pin algorithm).
fn check_type(page_id: PageId, found: PageType, expected: Option<PageType>) -> StorageResult<()> {
    match expected {
        Some(expected) if found != PageType::Free && found != expected => {
            Err(StorageError::PageTypeMismatch { page_id, expected, found })
        }
        _ => Ok(()),
    }
}

fn unpin_locked(frames: &[Frame], idx: usize) {
    frames[idx].unpin();
}

/// Walks the page-directory chain looking for a free bit, growing the chain if none has one,
/// then formats and pins the newly claimed page. The root directory page (page 0) is pinned and
/// unpinned through the exact same path as every other link in the chain — nothing holds it
/// permanently, so a pool's `num_frames` frames are all genuinely available for callers to pin.
fn allocate_locked(
    state: &mut PoolState,
    frames: &[Frame],
    page_type: PageType,
) -> StorageResult<usize> {
    let mut dir_idx = pin_locked(state, frames, 0, None)?;

    loop {
        let (dir_page_id, next, free_bit) = {
            let buf = frames[dir_idx].read();
            let dir_page_id = PageHeader::parse(&buf[..])
                .map(|h| h.page_id)
                .unwrap_or(0);
            (dir_page_id, directory::next(&buf[..]), directory::find_first_free(&buf[..]))
        };

        if let Some(bit) = free_bit {
            {
                let mut buf = frames[dir_idx].write();
                directory::set_bit(&mut buf[..], bit, true);
            }
            frames[dir_idx].mark_dirty();
            unpin_locked(frames, dir_idx);

            let new_page_id = directory::managed_page_id(dir_page_id, bit);
            let new_idx = pin_locked(state, frames, new_page_id, None)?;
            {
                let mut w = frames[new_idx].write();
                PageHeader::format(&mut w[..], new_page_id, page_type);
            }
            frames[new_idx].mark_dirty();
            frames[new_idx].set_page_type(page_type);
            return Ok(new_idx);
        }

        if next != 0 {
            unpin_locked(frames, dir_idx);
            dir_idx = pin_locked(state, frames, next, Some(PageType::Directory))?;
            continue;
        }

        // This directory page's bitmap is exhausted and there's no next link yet: extend the
        // chain with a fresh, fully-free directory page.
        let new_dir_page_id = directory::next_chain_page_id(dir_page_id);
        let new_dir_idx = pin_locked(state, frames, new_dir_page_id, None)?;
        {
            let mut w = frames[new_dir_idx].write();
            PageHeader::format(&mut w[..], new_dir_page_id, PageType::Directory);
            directory::init(&mut w[..]);
        }
        frames[new_dir_idx].mark_dirty();
        frames[new_dir_idx].set_page_type(PageType::Directory);

        {
            let mut w = frames[dir_idx].write();
            directory::set_next(&mut w[..], new_dir_page_id);
        }
        frames[dir_idx].mark_dirty();
        unpin_locked(frames, dir_idx);
        dir_idx = new_dir_idx;
    }
}

fn free_locked(state: &mut PoolState, frames: &[Frame], page_id: PageId) -> StorageResult<()> {
    let (dir_page_id, bit) = directory::locate(page_id);

    // Walk the actual directory chain rather than trusting `locate`'s arithmetic blindly: a
    // `page_id` whose computed `dir_page_id` lies past the end of the chain was never handed out
    // by `allocate_locked` and must fail `PageNotFound` (§4.2 free algorithm, §7).
    let dir_idx = find_dir_page_in_chain(state, frames, dir_page_id)?
        .ok_or(StorageError::PageNotFound { page_id })?;

    if let Some(&idx) = state.page_table.get(&page_id) {
        if frames[idx].pin_count() > 0 {
            return Err(StorageError::CannotFree {
                page_id,
                pins: frames[idx].pin_count(),
            });
        }
        frames[idx].set_live(false);
        frames[idx].set_dirty(false);
        state.page_table.remove(&page_id);
    }

    {
        let mut buf = frames[dir_idx].write();
        directory::set_bit(&mut buf[..], bit, false);
    }
    frames[dir_idx].mark_dirty();
    unpin_locked(frames, dir_idx);
    Ok(())
}

/// Walks the directory chain starting at the root looking for `target_dir_page_id`, returning
/// its pinned frame index if found (pinned exactly once, same as any other directory-page
/// access). Any chain link visited along the way and not ultimately returned is unpinned before
/// moving on.
fn find_dir_page_in_chain(
    state: &mut PoolState,
    frames: &[Frame],
    target_dir_page_id: PageId,
) -> StorageResult<Option<usize>> {
    let mut dir_idx = pin_locked(state, frames, 0, None)?;
    loop {
        let (this_page_id, next) = {
            let buf = frames[dir_idx].read();
            let this_page_id = PageHeader::parse(&buf[..]).map(|h| h.page_id).unwrap_or(0);
            (this_page_id, directory::next(&buf[..]))
        };
        if this_page_id == target_dir_page_id {
            return Ok(Some(dir_idx));
        }
        if next == 0 {
            unpin_locked(frames, dir_idx);
            return Ok(None);
        }
        unpin_locked(frames, dir_idx);
        dir_idx = pin_locked(state, frames, next, Some(PageType::Directory))?;
    }
}

/// An RAII hold on a resident page. Dropping it releases the pin; it does not itself grant
/// access to the page's bytes — call [`PinnedFrame::read`] or [`PinnedFrame::write`] for that,
/// which acquire the frame's own latch independently of the pool lock.
pub struct PinnedFrame<'a> {
    pool: &'a BufferPool,
    idx: usize,
}

impl<'a> PinnedFrame<'a> {
    pub fn page_id(&self) -> PageId {
        self.pool.frames[self.idx].page_id()
    }

    pub fn page_type(&self) -> PageType {
        self.pool.frames[self.idx].page_type()
    }

    pub fn read(&self) -> FrameReadGuard<'a> {
        self.pool.frames[self.idx].read()
    }

    pub fn write(&self) -> FrameWriteGuard<'a> {
        self.pool.frames[self.idx].mark_dirty();
        self.pool.frames[self.idx].write()
    }
}

impl Drop for PinnedFrame<'_> {
    fn drop(&mut self) {
        self.pool.frames[self.idx].unpin();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn pool(num_frames: usize) -> (BufferPool, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let pool = BufferPool::open(tmp.path(), num_frames).unwrap();
        (pool, tmp)
    }

    #[test]
    fn allocate_then_pin_round_trips_bytes() {
        let (pool, _tmp) = pool(4);
        let page_id = {
            let frame = pool.allocate_page(PageType::Tuple).unwrap();
            let id = frame.page_id();
            {
                let mut w = frame.write();
                w[30] = 0x42;
            }
            id
        };

        let frame = pool.pin(page_id, None).unwrap();
        assert_eq!(frame.page_type(), PageType::Tuple);
        assert_eq!(frame.read()[30], 0x42);
    }

    #[test]
    fn full_pool_with_all_pins_held_errors() {
        let (pool, _tmp) = pool(2);
        let _a = pool.allocate_page(PageType::Tuple).unwrap();
        let _b = pool.allocate_page(PageType::Tuple).unwrap();
        let err = pool.allocate_page(PageType::Tuple).unwrap_err();
        assert!(matches!(err, StorageError::Full));
    }

    #[test]
    fn unpinning_frees_it_for_eviction() {
        let (pool, _tmp) = pool(1);
        let first = pool.allocate_page(PageType::Tuple).unwrap().page_id();
        // The one frame is now free again: allocating another page must succeed by evicting.
        let second = pool.allocate_page(PageType::Tuple).unwrap().page_id();
        assert_ne!(first, second);
    }

    #[test]
    fn dirty_page_survives_eviction_round_trip() {
        let (pool, _tmp) = pool(1);
        let page_id = {
            let frame = pool.allocate_page(PageType::Tuple).unwrap();
            let id = frame.page_id();
            frame.write()[100] = 0x99;
            id
        };
        // Force eviction of the only frame by allocating a second page.
        let _other = pool.allocate_page(PageType::Tuple).unwrap();
        let frame = pool.pin(page_id, None).unwrap();
        assert_eq!(frame.read()[100], 0x99);
    }

    #[test]
    fn free_then_reallocate_reuses_the_slot() {
        let (pool, _tmp) = pool(4);
        let page_id = pool.allocate_page(PageType::Tuple).unwrap().page_id();
        pool.free_page(page_id).unwrap();
        let reused = pool.allocate_page(PageType::Tuple).unwrap().page_id();
        assert_eq!(page_id, reused);
    }

    #[test]
    fn freeing_a_pinned_page_fails() {
        let (pool, _tmp) = pool(4);
        let frame = pool.allocate_page(PageType::Tuple).unwrap();
        let page_id = frame.page_id();
        let err = pool.free_page(page_id).unwrap_err();
        assert!(matches!(err, StorageError::CannotFree { .. }));
        drop(frame);
        pool.free_page(page_id).unwrap();
    }

    #[test]
    fn freeing_an_id_outside_any_directory_range_is_not_found() {
        let (pool, _tmp) = pool(4);
        // Only the root directory page exists; this id lies in a chain link that was never
        // allocated.
        let far_page_id = directory::next_chain_page_id(0) + 5;
        let err = pool.free_page(far_page_id).unwrap_err();
        assert!(matches!(err, StorageError::PageNotFound { page_id } if page_id == far_page_id));
    }

    #[test]
    fn allocation_grows_past_a_single_directory_page() {
        let (pool, _tmp) = pool(8);
        let mut ids = Vec::new();
        for _ in 0..(directory::N_PAGES_PER_DIR + 4) {
            let frame = pool.allocate_page(PageType::Tuple).unwrap();
            ids.push(frame.page_id());
        }
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len(), "every allocated page id must be unique");
    }

    #[test]
    #[should_panic(expected = "is corrupt")]
    fn opening_a_file_whose_page_0_is_not_a_directory_page_panics() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let file = FileAccessor::open(tmp.path()).unwrap();
            let mut buf = [0u8; PAGE_SIZE];
            PageHeader::format(&mut buf, 0, PageType::Tuple);
            file.write_page(0, &buf).unwrap();
            file.sync().unwrap();
        }
        let _ = BufferPool::open(tmp.path(), 4);
    }

    #[test]
    fn pin_with_mismatched_expected_type_fails() {
        let (pool, _tmp) = pool(4);
        let page_id = pool.allocate_page(PageType::Tuple).unwrap().page_id();
        let err = pool.pin(page_id, Some(PageType::HashBucket)).unwrap_err();
        assert!(matches!(err, StorageError::PageTypeMismatch { .. }));
        // the correct expected type still pins fine.
        pool.pin(page_id, Some(PageType::Tuple)).unwrap();
    }
}
