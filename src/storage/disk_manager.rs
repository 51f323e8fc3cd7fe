use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::{debug, info, warn};

use super::error::{StorageError, StorageResult};
use super::{PAGE_SIZE, PageId};

/// Disk I/O manager: treats a single file as a dense array of 4096-byte pages.
///
/// Pages are appended by [`allocate_page`](Self::allocate_page) and never
/// reclaimed; the file grows monotonically. All reads and writes are
/// positional, so concurrent calls for different pages need no shared
/// cursor.
pub struct DiskManager {
    file: File,
    path: PathBuf,
    num_pages: AtomicI32,
}

impl DiskManager {
    /// Open the database file, creating it (and missing parent directories)
    /// if absent.
    ///
    /// A file size that is not a multiple of `PAGE_SIZE` is tolerated with
    /// a warning; the trailing partial page is treated as if it does not
    /// exist.
    pub fn new<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            warn!(
                "file size {} is not a multiple of page size {}, file may be corrupted",
                file_size, PAGE_SIZE
            );
        }
        let num_pages = (file_size / PAGE_SIZE as u64) as PageId;

        Ok(Self {
            file,
            path,
            num_pages: AtomicI32::new(num_pages),
        })
    }

    /// Append a zero-filled page to the file and return its id.
    ///
    /// On I/O failure the page counter is rolled back and the error is
    /// returned.
    pub fn allocate_page(&self) -> StorageResult<PageId> {
        let page_id = self.num_pages.fetch_add(1, Ordering::SeqCst);
        let offset = page_id as u64 * PAGE_SIZE as u64;

        let zeroes = [0u8; PAGE_SIZE];
        let result = self
            .file
            .write_all_at(&zeroes, offset)
            .and_then(|()| self.file.sync_data());

        match result {
            Ok(()) => {
                debug!(
                    "allocated new page {} (total pages: {})",
                    page_id,
                    self.num_pages.load(Ordering::SeqCst)
                );
                Ok(page_id)
            }
            Err(err) => {
                self.num_pages.fetch_sub(1, Ordering::SeqCst);
                warn!(
                    "failed to allocate page {}, rolling back num_pages to {}",
                    page_id,
                    self.num_pages.load(Ordering::SeqCst)
                );
                Err(err.into())
            }
        }
    }

    /// Read page `page_id` into `buf` (exactly `PAGE_SIZE` bytes).
    ///
    /// A premature EOF means the file lost data and is reported as a
    /// distinct error.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        self.check_page_id(page_id)?;
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut total = 0;
        while total < PAGE_SIZE {
            let bytes_read = self.file.read_at(&mut buf[total..], offset + total as u64)?;
            if bytes_read == 0 {
                return Err(StorageError::UnexpectedEof {
                    page_id,
                    expected: PAGE_SIZE,
                    actual: total,
                });
            }
            total += bytes_read;
        }

        debug!("read page {} from disk (offset={})", page_id, offset);
        Ok(())
    }

    /// Write page `page_id` from `buf` (exactly `PAGE_SIZE` bytes) and sync
    /// the data.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> StorageResult<()> {
        self.check_page_id(page_id)?;
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.write_all_at(buf, offset)?;
        self.file.sync_data()?;

        debug!("wrote page {} to disk (offset={})", page_id, offset);
        Ok(())
    }

    /// Number of pages in the file
    pub fn num_pages(&self) -> PageId {
        self.num_pages.load(Ordering::SeqCst)
    }

    /// Current file size in bytes
    pub fn file_size(&self) -> StorageResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync file data and metadata to disk. The file itself is closed when
    /// the manager is dropped.
    pub fn close(&self) -> StorageResult<()> {
        self.file.sync_all()?;
        info!("disk manager closed: file={}", self.path.display());
        Ok(())
    }

    fn check_page_id(&self, page_id: PageId) -> StorageResult<()> {
        let num_pages = self.num_pages.load(Ordering::SeqCst);
        if page_id < 0 || page_id >= num_pages {
            return Err(StorageError::InvalidPageId { page_id, num_pages });
        }
        Ok(())
    }
}
