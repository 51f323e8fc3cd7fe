use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid page id: {page_id} (total pages: {num_pages})")]
    InvalidPageId { page_id: PageId, num_pages: PageId },

    #[error("Invalid page buffer size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Unexpected EOF: page {page_id} is incomplete (expected {expected} bytes, got {actual})")]
    UnexpectedEof {
        page_id: PageId,
        expected: usize,
        actual: usize,
    },

    #[error("All pages are pinned, cannot allocate a frame")]
    AllPagesPinned,
}

pub type StorageResult<T> = Result<T, StorageError>;
