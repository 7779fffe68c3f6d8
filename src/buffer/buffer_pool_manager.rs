use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{FrameId, PageId, Result, StrataError, INVALID_PAGE_ID, PAGE_SIZE};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::frame::Frame;
use super::page_guard::FramePin;
use super::{LruKReplacer, ReadPageGuard, WritePageGuard};

/// Fixed pool of page frames backed by the disk scheduler.
///
/// The page table (an extendible hash directory) maps resident logical
/// pages to frame indices; the LRU-K replacer picks eviction victims among
/// unpinned frames. One pool mutex serializes all structural transitions
/// (miss handling, eviction, deletion), so a page is resident in at most
/// one frame and dirty frames are written back before their identity
/// changes.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Arc<Frame>>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: Arc<LruKReplacer>,
    free_list: Mutex<VecDeque<FrameId>>,
    /// Serializes new/fetch/delete/flush and pin release against each
    /// other; every `FramePin` carries a handle to it.
    latch: Arc<Mutex<()>>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames with LRU-`k` replacement.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(crate::common::DEFAULT_BUCKET_SIZE),
            replacer: Arc::new(LruKReplacer::new(k, pool_size)),
            free_list: Mutex::new(free_list),
            latch: Arc::new(Mutex::new(())),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a fresh logical page, installs it in a frame, and pins it
    /// once. The caller owns that pin and must pair it with `unpin_page`.
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<PageId> {
        let _guard = self.latch.lock();

        let frame_id = self.acquire_frame()?;
        let page_id = self.disk_scheduler.disk_manager().allocate_page()?;

        self.frames[frame_id.as_usize()].install(page_id);
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false);

        Ok(page_id)
    }

    /// Makes `page_id` resident (reading it from disk on a miss), pins it
    /// once, and returns the frame holding it. The caller owns that pin and
    /// must pair it with `unpin_page`; page bytes are only reachable
    /// through `read_page`/`write_page` guards.
    pub fn fetch_page(&self, page_id: PageId) -> Result<FrameId> {
        if page_id == INVALID_PAGE_ID {
            return Err(StrataError::InvalidPageId(page_id));
        }
        let _guard = self.latch.lock();
        self.fetch_frame(page_id)
    }

    /// Releases one pin, folding `dirty` into the frame's dirty flag.
    /// Returns false if the page is not resident or its pin count is
    /// already zero.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let _guard = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        match self.frames[frame_id.as_usize()].release(dirty) {
            None => false,
            Some(0) => {
                self.replacer.set_evictable(frame_id, true);
                true
            }
            Some(_) => true,
        }
    }

    /// Fetches a page for shared access. The returned guard holds the
    /// frame's read latch and one pin, both released on drop.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::acquire(page_id, self.frame_pin(frame_id)))
    }

    /// Fetches a page for exclusive access. The returned guard holds the
    /// frame's write latch and one pin, both released on drop; the frame is
    /// marked dirty if the guard's bytes were touched mutably.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.fetch_page(page_id)?;
        Ok(WritePageGuard::acquire(page_id, self.frame_pin(frame_id)))
    }

    /// Allocates a fresh page and returns it under a write guard; the only
    /// pin is the guard's.
    pub fn new_page_write(&self) -> Result<WritePageGuard> {
        let page_id = self.new_page()?;
        let guard = self.write_page(page_id)?;
        // Drop the allocation pin; the guard keeps its own.
        self.unpin_page(page_id, false);
        Ok(guard)
    }

    /// Writes the page's current bytes through to disk and clears the
    /// dirty flag. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(StrataError::InvalidPageId(page_id));
        }
        let _guard = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.as_usize()];
        let mut image = [0u8; PAGE_SIZE];
        frame.snapshot(&mut image);
        self.disk_scheduler.schedule_write_sync(page_id, &image)?;
        frame.mark_clean();
        Ok(true)
    }

    /// Flushes every resident dirty page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _guard = self.latch.lock();

        for frame in &self.frames {
            let page_id = frame.page_id();
            if page_id != INVALID_PAGE_ID && frame.is_dirty() {
                let mut image = [0u8; PAGE_SIZE];
                frame.snapshot(&mut image);
                self.disk_scheduler.schedule_write_sync(page_id, &image)?;
                frame.mark_clean();
            }
        }
        Ok(())
    }

    /// Evicts the page from its frame and deallocates the logical page.
    /// Returns false if the page is not resident; fails if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let _guard = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Err(StrataError::PageStillPinned(page_id));
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id)?;
        frame.clear();
        self.free_list.lock().push_back(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns the pin count of a resident page, or None.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        self.page_table
            .find(&page_id)
            .map(|frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Pin + access bookkeeping for a page, loading it on a miss. Must be
    /// called with the pool latch held.
    fn fetch_frame(&self, page_id: PageId) -> Result<FrameId> {
        if let Some(frame_id) = self.page_table.find(&page_id) {
            self.frames[frame_id.as_usize()].acquire();
            self.replacer.record_access(frame_id)?;
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame()?;
        let frame = &self.frames[frame_id.as_usize()];

        let mut image = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut image)?;
        frame.install(page_id);
        frame.load(&image);

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    /// Takes a frame from the free list, or evicts one, writing back a
    /// dirty victim first. Must be called with the pool latch held.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(StrataError::BufferPoolFull);
        };
        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            debug!(page = %old_page_id, frame = %frame_id, "writing back dirty page on eviction");
            let mut image = [0u8; PAGE_SIZE];
            frame.snapshot(&mut image);
            self.disk_scheduler.schedule_write_sync(old_page_id, &image)?;
        } else {
            debug!(page = %old_page_id, frame = %frame_id, "evicting clean page");
        }

        self.page_table.remove(&old_page_id);
        frame.clear();
        Ok(frame_id)
    }

    /// Hands ownership of the pin taken by `fetch_frame` to a guard.
    fn frame_pin(&self, frame_id: FrameId) -> FramePin {
        FramePin::new(
            Arc::clone(&self.frames[frame_id.as_usize()]),
            Arc::clone(&self.replacer),
            Arc::clone(&self.latch),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (BufferPoolManager::new(pool_size, 2, dm), temp_file)
    }

    #[test]
    fn test_new_pool() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        assert!(bpm.unpin_page(page_id, false));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
        // A second unpin has nothing to release.
        assert!(!bpm.unpin_page(page_id, false));
    }

    #[test]
    fn test_pool_exhaustion_and_recovery() {
        let (bpm, _temp) = create_bpm(2);

        let p1 = bpm.new_page().unwrap();
        let _p2 = bpm.new_page().unwrap();
        assert!(matches!(bpm.new_page(), Err(StrataError::BufferPoolFull)));

        assert!(bpm.unpin_page(p1, false));
        let p3 = bpm.new_page().unwrap();
        assert_ne!(p3, p1);
    }

    #[test]
    fn test_read_write_roundtrip() {
        let (bpm, _temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);

        {
            let mut guard = bpm.write_page(page_id).unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
        }
        assert_eq!(bpm.get_pin_count(page_id), Some(0));

        let guard = bpm.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
        assert_eq!(guard.data()[100], 255);
    }

    #[test]
    fn test_eviction_writes_back() {
        let (bpm, _temp) = create_bpm(2);

        let p1 = bpm.new_page().unwrap();
        {
            let mut guard = bpm.write_page(p1).unwrap();
            guard.data_mut()[0] = 7;
        }
        bpm.unpin_page(p1, true);

        // Fill the pool so p1 gets evicted.
        for _ in 0..2 {
            let p = bpm.new_page().unwrap();
            bpm.unpin_page(p, false);
        }

        // p1 must read back from disk with its bytes intact.
        let guard = bpm.read_page(p1).unwrap();
        assert_eq!(guard.data()[0], 7);
    }

    #[test]
    fn test_flush_page_persists() {
        let (bpm, temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);

        {
            let mut guard = bpm.write_page(page_id).unwrap();
            guard.data_mut()[0] = 42;
        }
        assert!(bpm.flush_page(page_id).unwrap());
        drop(bpm);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);
        let guard = bpm2.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(10);
        let page_id = bpm.new_page().unwrap();

        assert!(matches!(
            bpm.delete_page(page_id),
            Err(StrataError::PageStillPinned(_))
        ));

        bpm.unpin_page(page_id, false);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Deleting an absent page reports false.
        assert!(!bpm.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_frame_accounting_invariant() {
        let (bpm, _temp) = create_bpm(4);

        let mut pages = Vec::new();
        for _ in 0..4 {
            pages.push(bpm.new_page().unwrap());
        }
        // free_list plus resident frames partitions the pool.
        assert_eq!(bpm.free_frame_count(), 0);
        for &p in &pages {
            assert_eq!(bpm.get_pin_count(p), Some(1));
            bpm.unpin_page(p, false);
        }
        bpm.delete_page(pages[0]).unwrap();
        assert_eq!(bpm.free_frame_count(), 1);
    }

    #[test]
    fn test_concurrent_guard_access() {
        let (bpm, _temp) = create_bpm(8);
        let bpm = Arc::new(bpm);

        let page_id = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false);

        let mut handles = Vec::new();
        for t in 0..4u8 {
            let bpm = Arc::clone(&bpm);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let mut guard = bpm.write_page(page_id).unwrap();
                    guard.data_mut()[t as usize] = guard.data()[t as usize].wrapping_add(1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let guard = bpm.read_page(page_id).unwrap();
        for t in 0..4usize {
            assert_eq!(guard.data()[t], 50);
        }
    }
}
