use lru::LruCache;
use std::num::NonZeroUsize;

use super::error::{FileError, FileResult};
use super::file_manager::{FileHandle, PagedFileManager};
use super::{BUFFER_POOL_SIZE, PAGE_SIZE, PageId};

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    file: FileHandle,
    page_no: PageId,
}

/// One buffer pool frame
struct Frame {
    data: Vec<u8>,
    dirty: bool,
    /// Number of outstanding pins; an eviction victim must be at 0
    pins: u32,
}

/// Fixed-capacity page cache with pin counts, dirty flags, and LRU eviction.
///
/// The pin protocol: `fetch_page`/`new_page` pin the frame, and every pin
/// must be paired with exactly one `unpin_page` on every control-flow exit.
/// `with_page`/`with_page_mut` wrap the pair for the common scoped case.
pub struct BufferManager {
    file_manager: PagedFileManager,
    /// Frame table and replacement order in one structure
    frames: LruCache<FrameKey, Frame>,
    capacity: usize,
    /// Recycled page buffer, refilled by evictions
    spare: Vec<u8>,
}

impl BufferManager {
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    pub fn with_capacity(file_manager: PagedFileManager, capacity: usize) -> Self {
        Self {
            file_manager,
            frames: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
            capacity,
            spare: vec![0u8; PAGE_SIZE],
        }
    }

    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    /// Fetch a page into the pool and pin it.
    ///
    /// Fails with `PageNotExist` if the page was never allocated in the file.
    /// The returned slice is valid until the next buffer pool call; callers
    /// must `unpin_page` when done with the frame.
    pub fn fetch_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<&mut [u8]> {
        if !self.file_manager.page_exists(file, page_no)? {
            return Err(FileError::PageNotExist(page_no));
        }

        let key = FrameKey { file, page_no };
        if self.frames.peek(&key).is_none() {
            self.load_page(file, page_no)?;
        }

        let frame = self.frames.get_mut(&key).unwrap();
        frame.pins += 1;
        Ok(&mut frame.data)
    }

    /// Allocate a fresh page in the file, zero-fill a frame for it, and pin it.
    ///
    /// The frame starts dirty so the page materializes on disk even if the
    /// caller only ever reads it.
    pub fn new_page(&mut self, file: FileHandle) -> FileResult<(PageId, &mut [u8])> {
        // Secure a frame before consuming a page number
        self.make_room()?;
        let page_no = self.file_manager.allocate_page(file)?;

        let mut data = std::mem::take(&mut self.spare);
        if data.len() != PAGE_SIZE {
            data = vec![0u8; PAGE_SIZE];
        }
        data.fill(0);

        let key = FrameKey { file, page_no };
        self.frames.put(
            key,
            Frame {
                data,
                dirty: true,
                pins: 1,
            },
        );

        let frame = self.frames.get_mut(&key).unwrap();
        Ok((page_no, &mut frame.data))
    }

    /// Drop one pin from a page, recording whether the caller modified it
    pub fn unpin_page(&mut self, file: FileHandle, page_no: PageId, dirty: bool) -> FileResult<()> {
        let key = FrameKey { file, page_no };
        let frame = self
            .frames
            .peek_mut(&key)
            .ok_or(FileError::PageNotCached(page_no))?;

        if frame.pins == 0 {
            return Err(FileError::PageNotPinned(page_no));
        }
        frame.pins -= 1;
        frame.dirty |= dirty;
        Ok(())
    }

    /// Remove a page's frame from the pool; the page must be unpinned
    pub fn delete_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<()> {
        let key = FrameKey { file, page_no };
        if let Some(frame) = self.frames.peek(&key) {
            if frame.pins > 0 {
                return Err(FileError::PagePinned(page_no));
            }
            if let Some((_, frame)) = self.frames.pop_entry(&key) {
                self.spare = frame.data;
            }
        }
        Ok(())
    }

    /// Fetch a page, run `f` over its contents, and unpin on the way out
    pub fn with_page<R>(
        &mut self,
        file: FileHandle,
        page_no: PageId,
        f: impl FnOnce(&[u8]) -> R,
    ) -> FileResult<R> {
        let frame = self.fetch_page(file, page_no)?;
        let out = f(frame);
        self.unpin_page(file, page_no, false)?;
        Ok(out)
    }

    /// Fetch a page, run `f` mutably over its contents, and unpin dirty
    pub fn with_page_mut<R>(
        &mut self,
        file: FileHandle,
        page_no: PageId,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> FileResult<R> {
        let frame = self.fetch_page(file, page_no)?;
        let out = f(frame);
        self.unpin_page(file, page_no, true)?;
        Ok(out)
    }

    /// Write a page back to disk if it is dirty
    pub fn flush_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<()> {
        let key = FrameKey { file, page_no };
        if let Some(frame) = self.frames.peek_mut(&key) {
            if frame.dirty {
                self.file_manager.write_page(file, page_no, &frame.data)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Write back every dirty frame and sync all files
    pub fn flush_all(&mut self) -> FileResult<()> {
        let dirty_keys: Vec<FrameKey> = self
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(key, _)| *key)
            .collect();

        for key in dirty_keys {
            // peek_mut keeps the replacement order untouched during a flush
            if let Some(frame) = self.frames.peek_mut(&key) {
                if frame.dirty {
                    self.file_manager
                        .write_page(key.file, key.page_no, &frame.data)?;
                    frame.dirty = false;
                }
            }
        }

        self.file_manager.sync_all()?;
        Ok(())
    }

    /// Ensure at least one free frame, evicting the coldest unpinned page
    fn make_room(&mut self) -> FileResult<()> {
        while self.frames.len() >= self.capacity {
            // iter() walks hot-to-cold; remember the coldest unpinned key
            let victim = self
                .frames
                .iter()
                .filter(|(_, frame)| frame.pins == 0)
                .map(|(key, _)| *key)
                .last()
                .ok_or(FileError::BufferPoolExhausted)?;

            if let Some((key, frame)) = self.frames.pop_entry(&victim) {
                if frame.dirty {
                    self.file_manager
                        .write_page(key.file, key.page_no, &frame.data)?;
                }
                self.spare = frame.data;
            }
        }
        Ok(())
    }

    /// Load a page from disk into a frame (unpinned, clean)
    fn load_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<()> {
        self.make_room()?;

        let mut data = std::mem::take(&mut self.spare);
        if data.len() != PAGE_SIZE {
            data = vec![0u8; PAGE_SIZE];
        }
        self.file_manager.read_page(file, page_no, &mut data)?;

        self.frames.put(
            FrameKey { file, page_no },
            Frame {
                data,
                dirty: false,
                pins: 0,
            },
        );
        Ok(())
    }

    /// Drop every frame of a file without writing back (file removal)
    pub fn discard_file_pages(&mut self, file: FileHandle) {
        let keys: Vec<FrameKey> = self
            .frames
            .iter()
            .filter(|(key, _)| key.file == file)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.frames.pop(&key);
        }
    }

    pub fn cached_page_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_page_cached(&self, file: FileHandle, page_no: PageId) -> bool {
        self.frames.contains(&FrameKey { file, page_no })
    }

    pub fn dirty_page_count(&self) -> usize {
        self.frames.iter().filter(|(_, f)| f.dirty).count()
    }

    /// Sum of pin counts across all frames; 0 between public operations
    pub fn pinned_page_count(&self) -> usize {
        self.frames.iter().map(|(_, f)| f.pins as usize).sum()
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_env() -> (TempDir, BufferManager, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        let buffer_manager = BufferManager::new(file_manager);

        (temp_dir, buffer_manager, handle)
    }

    #[test]
    fn test_new_page_is_pinned_and_zeroed() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let (page_no, data) = bm.new_page(handle).unwrap();
        assert_eq!(page_no, 0);
        assert!(data.iter().all(|&b| b == 0));
        assert_eq!(bm.pinned_page_count(), 1);

        bm.unpin_page(handle, page_no, true).unwrap();
        assert_eq!(bm.pinned_page_count(), 0);
    }

    #[test]
    fn test_fetch_unknown_page() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let result = bm.fetch_page(handle, 7);
        assert!(matches!(result, Err(FileError::PageNotExist(7))));
    }

    #[test]
    fn test_fetch_round_trip() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let (page_no, data) = bm.new_page(handle).unwrap();
        data[0] = 42;
        bm.unpin_page(handle, page_no, true).unwrap();

        let data = bm.fetch_page(handle, page_no).unwrap();
        assert_eq!(data[0], 42);
        bm.unpin_page(handle, page_no, false).unwrap();
    }

    #[test]
    fn test_unpin_without_pin() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let (page_no, _) = bm.new_page(handle).unwrap();
        bm.unpin_page(handle, page_no, false).unwrap();

        let result = bm.unpin_page(handle, page_no, false);
        assert!(matches!(result, Err(FileError::PageNotPinned(_))));
    }

    #[test]
    fn test_with_page_mut_pins_and_unpins() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let (page_no, _) = bm.new_page(handle).unwrap();
        bm.unpin_page(handle, page_no, true).unwrap();

        bm.with_page_mut(handle, page_no, |data| data[10] = 9).unwrap();
        assert_eq!(bm.pinned_page_count(), 0);

        let byte = bm.with_page(handle, page_no, |data| data[10]).unwrap();
        assert_eq!(byte, 9);
        assert_eq!(bm.pinned_page_count(), 0);
    }

    #[test]
    fn test_pinned_page_never_evicted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 3);

        // Keep page 0 pinned while churning the rest of the pool
        let (p0, _) = bm.new_page(handle).unwrap();
        for _ in 0..5 {
            let (p, _) = bm.new_page(handle).unwrap();
            bm.unpin_page(handle, p, true).unwrap();
        }

        assert!(bm.is_page_cached(handle, p0));
        bm.unpin_page(handle, p0, true).unwrap();
    }

    #[test]
    fn test_pool_exhausted_when_all_pinned() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 2);

        let (p0, _) = bm.new_page(handle).unwrap();
        let (p1, _) = bm.new_page(handle).unwrap();

        let result = bm.new_page(handle);
        assert!(matches!(result, Err(FileError::BufferPoolExhausted)));

        bm.unpin_page(handle, p0, false).unwrap();
        bm.unpin_page(handle, p1, false).unwrap();
    }

    #[test]
    fn test_dirty_page_survives_eviction() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 2);

        let (p0, data) = bm.new_page(handle).unwrap();
        data[0] = 77;
        bm.unpin_page(handle, p0, true).unwrap();

        // Churn the pool until page 0 is evicted
        for _ in 0..4 {
            let (p, _) = bm.new_page(handle).unwrap();
            bm.unpin_page(handle, p, true).unwrap();
        }
        assert!(!bm.is_page_cached(handle, p0));

        let data = bm.fetch_page(handle, p0).unwrap();
        assert_eq!(data[0], 77);
        bm.unpin_page(handle, p0, false).unwrap();
    }

    #[test]
    fn test_delete_page_requires_unpinned() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let (page_no, _) = bm.new_page(handle).unwrap();
        let result = bm.delete_page(handle, page_no);
        assert!(matches!(result, Err(FileError::PagePinned(_))));

        bm.unpin_page(handle, page_no, false).unwrap();
        bm.delete_page(handle, page_no).unwrap();
        assert!(!bm.is_page_cached(handle, page_no));
    }

    #[test]
    fn test_flush_all_clears_dirty() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        for _ in 0..5 {
            let (p, data) = bm.new_page(handle).unwrap();
            data[0] = p as u8;
            bm.unpin_page(handle, p, true).unwrap();
        }
        assert_eq!(bm.dirty_page_count(), 5);

        bm.flush_all().unwrap();
        assert_eq!(bm.dirty_page_count(), 0);
    }

    #[test]
    fn test_flush_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        {
            let mut bm = BufferManager::new(file_manager);
            let (p, data) = bm.new_page(handle).unwrap();
            data[0] = 88;
            bm.unpin_page(handle, p, true).unwrap();
            // drop flushes
        }

        let mut file_manager = PagedFileManager::new();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::new(file_manager);
        let byte = bm.with_page(handle, 0, |data| data[0]).unwrap();
        assert_eq!(byte, 88);
    }
}
