use std::sync::{Arc, RwLock};

use tracing::warn;

use super::{INVALID_PAGE_ID, PAGE_SIZE, PageId};

/// Shared page buffer cell; every pin of the same page aliases one cell
pub(crate) type PageBuffer = Arc<RwLock<[u8; PAGE_SIZE]>>;

/// An in-memory slot holding at most one page.
///
/// The buffer pool owns all frames and is the only code that changes their
/// metadata (pin count, dirty flag, page id). The page bytes themselves are
/// shared with the holders of outstanding [`PageHandle`]s through the
/// buffer cell's `RwLock`.
///
/// [`PageHandle`]: super::PageHandle
pub struct Frame {
    page_id: PageId,
    dirty: bool,
    pin_count: u32,
    data: PageBuffer,
}

impl Frame {
    /// Create an empty frame with a zero-filled buffer
    pub fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            dirty: false,
            pin_count: 0,
            data: Arc::new(RwLock::new([0u8; PAGE_SIZE])),
        }
    }

    /// Page currently held by this frame, or `INVALID_PAGE_ID` when empty
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the frame currently holds a page
    pub fn is_occupied(&self) -> bool {
        self.page_id != INVALID_PAGE_ID
    }

    pub(crate) fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Increment the pin count
    pub(crate) fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// Decrement the pin count, saturating at zero
    pub(crate) fn unpin(&mut self) {
        if self.pin_count == 0 {
            warn!(
                "unpin on frame holding page {} whose pin count is already 0",
                self.page_id
            );
            return;
        }
        self.pin_count -= 1;
    }

    /// Clear all metadata and zero the buffer
    pub(crate) fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.dirty = false;
        self.pin_count = 0;
        self.data.write().unwrap().fill(0);
    }

    /// Hand out a reference to the shared buffer cell
    pub(crate) fn buffer(&self) -> PageBuffer {
        Arc::clone(&self.data)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
