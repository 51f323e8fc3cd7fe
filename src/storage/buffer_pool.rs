use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::disk_manager::DiskManager;
use super::error::{StorageError, StorageResult};
use super::frame::{Frame, PageBuffer};
use super::replacer::{LruReplacer, Replacer};
use super::{DEFAULT_POOL_SIZE, FrameId, PAGE_SIZE, PageId};

/// Handle to a pinned page in the buffer pool.
///
/// The handle grants exactly one pin: the holder must balance it with one
/// [`BufferPoolManager::unpin_page`] on every exit path, and must not touch
/// the handle afterwards (the frame may be repurposed for another page).
///
/// Concurrent pins of the same page share one underlying buffer; the
/// `data`/`data_mut` guards give many-readers / one-writer access to it.
/// Guards are meant to be short-lived and must be released before calling
/// back into the buffer pool.
pub struct PageHandle {
    page_id: PageId,
    frame_id: FrameId,
    data: PageBuffer,
}

impl PageHandle {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Lock the page bytes for reading
    pub fn data(&self) -> RwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        self.data.read().unwrap()
    }

    /// Lock the page bytes for writing. Remember to unpin with
    /// `is_dirty = true` afterwards; the guard itself does not mark the
    /// frame dirty.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        self.data.write().unwrap()
    }
}

/// Snapshot of buffer pool occupancy counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub pool_size: usize,
    pub used_frames: usize,
    pub free_frames: usize,
    pub dirty_pages: usize,
    pub pinned_pages: usize,
    pub evictable: usize,
}

impl fmt::Display for BufferPoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool_size={} used={} free={} dirty={} pinned={} evictable={}",
            self.pool_size,
            self.used_frames,
            self.free_frames,
            self.dirty_pages,
            self.pinned_pages,
            self.evictable
        )
    }
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
}

/// Caches pages in a fixed set of frames and mediates all page access.
///
/// Every public operation is serialized by one coarse mutex over the frame
/// array, the page table and the free list; the LRU replacer keeps its own
/// lock. Disk I/O happens under the pool mutex.
pub struct BufferPoolManager {
    pool_size: usize,
    inner: Mutex<PoolInner>,
    replacer: LruReplacer,
    disk_manager: DiskManager,
}

impl BufferPoolManager {
    /// Create a buffer pool with `DEFAULT_POOL_SIZE` frames
    pub fn new(disk_manager: DiskManager) -> Self {
        Self::with_capacity(disk_manager, DEFAULT_POOL_SIZE)
    }

    /// Create a buffer pool with `pool_size` frames
    pub fn with_capacity(disk_manager: DiskManager, pool_size: usize) -> Self {
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list = (0..pool_size).collect();

        info!("buffer pool manager initialized: pool_size={}", pool_size);
        Self {
            pool_size,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    /// Number of frames in the pool
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// The underlying disk manager
    pub fn disk_manager(&self) -> &DiskManager {
        &self.disk_manager
    }

    /// Fetch a page into the pool, pinning it.
    ///
    /// On a hit the existing frame is pinned again; on a miss the page is
    /// read from disk into a free or evicted frame. Fails with
    /// [`StorageError::AllPagesPinned`] when no frame can be freed.
    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageHandle> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &mut inner.frames[frame_id];
            frame.pin();
            let data = frame.buffer();
            self.replacer.pin(frame_id);
            debug!("page {} hit in buffer pool (frame {})", page_id, frame_id);
            return Ok(PageHandle {
                page_id,
                frame_id,
                data,
            });
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        {
            let buffer = inner.frames[frame_id].buffer();
            let mut data = buffer.write().unwrap();
            if let Err(err) = self.disk_manager.read_page(page_id, &mut data[..]) {
                drop(data);
                inner.free_list.push_back(frame_id);
                return Err(err);
            }
        }
        {
            let frame = &mut inner.frames[frame_id];
            frame.set_page_id(page_id);
            frame.pin();
        }
        inner.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        debug!("page {} loaded from disk (frame {})", page_id, frame_id);

        let data = inner.frames[frame_id].buffer();
        Ok(PageHandle {
            page_id,
            frame_id,
            data,
        })
    }

    /// Release one pin on a page, ORing in the caller's dirty flag.
    ///
    /// When the pin count reaches zero the frame becomes evictable.
    /// Unpinning a page that is not in the pool is a warning, not an error.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            warn!("attempted to unpin page {} not in buffer pool", page_id);
            return;
        };

        let frame = &mut inner.frames[frame_id];
        if is_dirty {
            frame.mark_dirty();
        }
        frame.unpin();
        if frame.pin_count() == 0 {
            self.replacer.unpin(frame_id);
            debug!("page {} unpinned (frame {}, now evictable)", page_id, frame_id);
        }
    }

    /// Allocate a fresh on-disk page and pin it into a frame.
    ///
    /// The returned page's buffer is zero-filled. If no frame is available
    /// the allocated id is never exposed; the file keeps one unused page.
    pub fn new_page(&self) -> StorageResult<PageHandle> {
        let mut inner = self.inner.lock().unwrap();

        let page_id = self.disk_manager.allocate_page()?;
        let frame_id = self.acquire_frame(&mut inner)?;

        {
            let frame = &mut inner.frames[frame_id];
            frame.set_page_id(page_id);
            frame.pin();
        }
        inner.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        debug!("created new page {} (frame {})", page_id, frame_id);

        let data = inner.frames[frame_id].buffer();
        Ok(PageHandle {
            page_id,
            frame_id,
            data,
        })
    }

    /// Write a cached page to disk and clear its dirty flag.
    ///
    /// Returns whether the page was present in the pool.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        self.flush_page_locked(&mut inner, page_id)
    }

    /// Flush every page currently cached in the pool
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let page_ids: Vec<PageId> = inner.page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page_locked(&mut inner, page_id)?;
        }
        Ok(())
    }

    /// Drop an unpinned page from the cache, returning its frame to the
    /// free list. On-disk space is not reclaimed.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            warn!("attempted to delete page {} not in buffer pool", page_id);
            return false;
        };

        let pin_count = inner.frames[frame_id].pin_count();
        if pin_count > 0 {
            warn!("cannot delete page {} (pin count {})", page_id, pin_count);
            return false;
        }

        inner.page_table.remove(&page_id);
        // pin doubles as removal from the eviction order
        self.replacer.pin(frame_id);
        inner.frames[frame_id].reset();
        inner.free_list.push_back(frame_id);
        debug!("deleted page {} from buffer pool (frame {})", page_id, frame_id);
        true
    }

    /// Occupancy counters for logging and tests
    pub fn get_stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock().unwrap();
        let mut dirty_pages = 0;
        let mut pinned_pages = 0;
        for frame in &inner.frames {
            if frame.is_occupied() {
                if frame.is_dirty() {
                    dirty_pages += 1;
                }
                if frame.pin_count() > 0 {
                    pinned_pages += 1;
                }
            }
        }
        BufferPoolStats {
            pool_size: self.pool_size,
            used_frames: self.pool_size - inner.free_list.len(),
            free_frames: inner.free_list.len(),
            dirty_pages,
            pinned_pages,
            evictable: self.replacer.size(),
        }
    }

    /// Flush all pages, sync the disk manager and clear the pool
    pub fn close(&self) -> StorageResult<()> {
        info!("closing buffer pool manager");
        self.flush_all_pages()?;
        self.disk_manager.close()?;

        let mut inner = self.inner.lock().unwrap();
        inner.page_table.clear();
        inner.free_list.clear();
        Ok(())
    }

    fn flush_page_locked(&self, inner: &mut PoolInner, page_id: PageId) -> StorageResult<bool> {
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            warn!("attempted to flush page {} not in buffer pool", page_id);
            return Ok(false);
        };

        {
            let buffer = inner.frames[frame_id].buffer();
            let data = buffer.read().unwrap();
            self.disk_manager.write_page(page_id, &data[..])?;
        }
        inner.frames[frame_id].clear_dirty();
        debug!("page {} flushed to disk", page_id);
        Ok(true)
    }

    /// Find a frame for a new occupant: free list first, then the LRU
    /// victim. An occupied victim is flushed if dirty, evicted from the
    /// page table and reset.
    fn acquire_frame(&self, inner: &mut PoolInner) -> StorageResult<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            debug!("allocated free frame {}", frame_id);
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.victim() else {
            warn!("no victim frame available (all pages are pinned)");
            return Err(StorageError::AllPagesPinned);
        };

        let evicted = {
            let frame = &inner.frames[frame_id];
            if frame.is_occupied() {
                let old_page_id = frame.page_id();
                if frame.is_dirty() {
                    let buffer = frame.buffer();
                    let data = buffer.read().unwrap();
                    if let Err(err) = self.disk_manager.write_page(old_page_id, &data[..]) {
                        drop(data);
                        self.replacer.unpin(frame_id);
                        return Err(err);
                    }
                    debug!("flushed dirty page {} before eviction", old_page_id);
                }
                Some(old_page_id)
            } else {
                None
            }
        };
        if let Some(old_page_id) = evicted {
            inner.page_table.remove(&old_page_id);
        }
        inner.frames[frame_id].reset();
        Ok(frame_id)
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        // Best-effort writeback when the pool goes away
        let _ = self.flush_all_pages();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup_pool(pool_size: usize) -> (TempDir, BufferPoolManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk_manager = DiskManager::new(temp_dir.path().join("test.db")).unwrap();
        let pool = BufferPoolManager::with_capacity(disk_manager, pool_size);
        (temp_dir, pool)
    }

    fn write_label(handle: &PageHandle, label: &str) {
        handle.data_mut()[..label.len()].copy_from_slice(label.as_bytes());
    }

    fn read_label(handle: &PageHandle, len: usize) -> Vec<u8> {
        handle.data()[..len].to_vec()
    }

    #[test]
    fn test_new_page_and_fetch() {
        let (_temp_dir, pool) = setup_pool(10);

        let handle = pool.new_page().unwrap();
        let page_id = handle.page_id();
        assert!(handle.data().iter().all(|&b| b == 0));

        write_label(&handle, "hello");
        pool.unpin_page(page_id, true);

        let handle = pool.fetch_page(page_id).unwrap();
        assert_eq!(read_label(&handle, 5), b"hello");
        pool.unpin_page(page_id, false);
    }

    #[test]
    fn test_fetch_hit_does_not_touch_disk() {
        let (_temp_dir, pool) = setup_pool(10);

        let handle = pool.new_page().unwrap();
        let page_id = handle.page_id();
        write_label(&handle, "cached");
        pool.unpin_page(page_id, true);

        // Never flushed; a hit must serve the cached bytes
        let handle = pool.fetch_page(page_id).unwrap();
        assert_eq!(read_label(&handle, 6), b"cached");
        pool.unpin_page(page_id, false);
    }

    #[test]
    fn test_multiple_pins_same_page() {
        let (_temp_dir, pool) = setup_pool(10);

        let handle = pool.new_page().unwrap();
        let page_id = handle.page_id();
        let _second = pool.fetch_page(page_id).unwrap();

        let stats = pool.get_stats();
        assert_eq!(stats.pinned_pages, 1);
        assert_eq!(stats.evictable, 0);

        pool.unpin_page(page_id, false);
        assert_eq!(pool.get_stats().pinned_pages, 1);

        pool.unpin_page(page_id, false);
        let stats = pool.get_stats();
        assert_eq!(stats.pinned_pages, 0);
        assert_eq!(stats.evictable, 1);
    }

    #[test]
    fn test_lru_eviction_restores_content() {
        let (_temp_dir, pool) = setup_pool(10);

        // Fill all 10 frames with labelled pages
        for i in 0..10 {
            let handle = pool.new_page().unwrap();
            assert_eq!(handle.page_id(), i);
            write_label(&handle, &format!("Page {}", i));
            pool.unpin_page(i, true);
        }

        // Touch pages 1..=9 so page 0 becomes the least recently used
        for i in 1..10 {
            pool.fetch_page(i).unwrap();
            pool.unpin_page(i, false);
        }

        // The new page must evict (and flush) page 0
        let handle = pool.new_page().unwrap();
        let new_page_id = handle.page_id();
        pool.unpin_page(new_page_id, false);

        let handle = pool.fetch_page(0).unwrap();
        assert_eq!(read_label(&handle, 6), b"Page 0");
        pool.unpin_page(0, false);
    }

    #[test]
    fn test_all_pinned_exhaustion() {
        let (_temp_dir, pool) = setup_pool(10);

        let mut handles = Vec::new();
        for _ in 0..10 {
            handles.push(pool.new_page().unwrap());
        }

        let result = pool.new_page();
        assert!(matches!(result, Err(StorageError::AllPagesPinned)));

        // Releasing one pin makes allocation possible again
        pool.unpin_page(handles[0].page_id(), false);
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn test_dirty_page_flushed_on_eviction() {
        let (_temp_dir, pool) = setup_pool(2);

        let handle = pool.new_page().unwrap();
        let dirty_id = handle.page_id();
        write_label(&handle, "dirty");
        pool.unpin_page(dirty_id, true);

        // Two more pages push the dirty page out
        for _ in 0..2 {
            let handle = pool.new_page().unwrap();
            pool.unpin_page(handle.page_id(), false);
        }

        let mut buf = [0u8; PAGE_SIZE];
        pool.disk_manager().read_page(dirty_id, &mut buf).unwrap();
        assert_eq!(&buf[..5], b"dirty");
    }

    #[test]
    fn test_flush_page() {
        let (_temp_dir, pool) = setup_pool(10);

        let handle = pool.new_page().unwrap();
        let page_id = handle.page_id();
        write_label(&handle, "flushed");
        pool.unpin_page(page_id, true);
        assert_eq!(pool.get_stats().dirty_pages, 1);

        assert!(pool.flush_page(page_id).unwrap());
        assert_eq!(pool.get_stats().dirty_pages, 0);

        let mut buf = [0u8; PAGE_SIZE];
        pool.disk_manager().read_page(page_id, &mut buf).unwrap();
        assert_eq!(&buf[..7], b"flushed");
    }

    #[test]
    fn test_flush_unknown_page() {
        let (_temp_dir, pool) = setup_pool(10);
        assert!(!pool.flush_page(99).unwrap());
    }

    #[test]
    fn test_flush_all_pages() {
        let (_temp_dir, pool) = setup_pool(10);

        for i in 0..5 {
            let handle = pool.new_page().unwrap();
            write_label(&handle, &format!("p{}", i));
            pool.unpin_page(handle.page_id(), true);
        }
        assert_eq!(pool.get_stats().dirty_pages, 5);

        pool.flush_all_pages().unwrap();
        assert_eq!(pool.get_stats().dirty_pages, 0);

        for i in 0..5 {
            let mut buf = [0u8; PAGE_SIZE];
            pool.disk_manager().read_page(i, &mut buf).unwrap();
            assert_eq!(&buf[..2], format!("p{}", i).as_bytes());
        }
    }

    #[test]
    fn test_delete_page() {
        let (_temp_dir, pool) = setup_pool(10);

        let handle = pool.new_page().unwrap();
        let page_id = handle.page_id();

        // Still pinned: refuse
        assert!(!pool.delete_page(page_id));

        pool.unpin_page(page_id, false);
        assert!(pool.delete_page(page_id));
        assert_eq!(pool.get_stats().free_frames, 10);

        // Already gone
        assert!(!pool.delete_page(page_id));
    }

    #[test]
    fn test_unpin_unknown_page_is_warning_only() {
        let (_temp_dir, pool) = setup_pool(10);
        pool.unpin_page(42, true);
        assert_eq!(pool.get_stats().used_frames, 0);
    }

    #[test]
    fn test_unpin_past_zero_saturates() {
        let (_temp_dir, pool) = setup_pool(10);

        let handle = pool.new_page().unwrap();
        let page_id = handle.page_id();
        pool.unpin_page(page_id, false);
        pool.unpin_page(page_id, false);

        // Still fetchable and the pin balance is intact
        let _handle = pool.fetch_page(page_id).unwrap();
        assert_eq!(pool.get_stats().pinned_pages, 1);
        pool.unpin_page(page_id, false);
    }

    #[test]
    fn test_persistence_across_close_and_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let page_id = {
            let disk_manager = DiskManager::new(&db_path).unwrap();
            let pool = BufferPoolManager::with_capacity(disk_manager, 10);
            let handle = pool.new_page().unwrap();
            let page_id = handle.page_id();
            write_label(&handle, "survives");
            pool.unpin_page(page_id, true);
            pool.close().unwrap();
            page_id
        };

        let disk_manager = DiskManager::new(&db_path).unwrap();
        let pool = BufferPoolManager::with_capacity(disk_manager, 10);
        let handle = pool.fetch_page(page_id).unwrap();
        assert_eq!(read_label(&handle, 8), b"survives");
        pool.unpin_page(page_id, false);
    }

    #[test]
    fn test_get_stats_counts() {
        let (_temp_dir, pool) = setup_pool(4);

        let h0 = pool.new_page().unwrap();
        let h1 = pool.new_page().unwrap();
        write_label(&h1, "x");
        pool.unpin_page(h1.page_id(), true);

        let stats = pool.get_stats();
        assert_eq!(stats.pool_size, 4);
        assert_eq!(stats.used_frames, 2);
        assert_eq!(stats.free_frames, 2);
        assert_eq!(stats.dirty_pages, 1);
        assert_eq!(stats.pinned_pages, 1);
        assert_eq!(stats.evictable, 1);

        pool.unpin_page(h0.page_id(), false);
    }

    #[test]
    fn test_concurrent_fetch_same_page() {
        let (_temp_dir, pool) = setup_pool(4);
        let pool = Arc::new(pool);

        let handle = pool.new_page().unwrap();
        let page_id = handle.page_id();
        write_label(&handle, "shared");
        pool.unpin_page(page_id, true);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let pool = Arc::clone(&pool);
                scope.spawn(move || {
                    let handle = pool.fetch_page(page_id).unwrap();
                    assert_eq!(read_label(&handle, 6), b"shared");
                    pool.unpin_page(page_id, false);
                });
            }
        });

        assert_eq!(pool.get_stats().pinned_pages, 0);
    }

    #[test]
    fn test_concurrent_access_different_pages() {
        let (_temp_dir, pool) = setup_pool(8);
        let pool = Arc::new(pool);

        let mut page_ids = Vec::new();
        for _ in 0..8 {
            let handle = pool.new_page().unwrap();
            page_ids.push(handle.page_id());
            pool.unpin_page(handle.page_id(), false);
        }

        std::thread::scope(|scope| {
            for &page_id in &page_ids {
                let pool = Arc::clone(&pool);
                scope.spawn(move || {
                    let handle = pool.fetch_page(page_id).unwrap();
                    handle.data_mut().fill(page_id as u8 + 1);
                    pool.unpin_page(page_id, true);
                });
            }
        });

        for &page_id in &page_ids {
            let handle = pool.fetch_page(page_id).unwrap();
            assert!(handle.data().iter().all(|&b| b == page_id as u8 + 1));
            pool.unpin_page(page_id, false);
        }
    }
}
