pub mod record;
pub mod storage;

pub use record::{RecordError, RecordId, RecordResult, SlotId, TableHeap, TableIterator, Tuple};
pub use storage::{
    BufferPoolManager, DiskManager, PAGE_SIZE, PageId, StorageError, StorageResult,
};
