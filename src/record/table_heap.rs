use std::sync::Arc;

use tracing::{error, info};

use super::error::RecordResult;
use super::table_page::TablePage;
use super::tuple::{RecordId, SlotId, Tuple};
use crate::storage::{BufferPoolManager, INVALID_PAGE_ID, PageId};

/// Heap file of one table: a doubly-linked chain of slotted pages.
///
/// Inserts always go to the tail page; when it overflows, a new page is
/// allocated and linked behind it. Pages that filled up once are never
/// revisited for space, even after deletions.
///
/// The heap is not thread-safe; callers must serialize mutating operations
/// on the same heap.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    first_page_id: PageId,
    last_page_id: PageId,
}

impl TableHeap {
    /// Create a fresh heap with a single empty page
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> RecordResult<Self> {
        let handle = buffer_pool.new_page()?;
        let page_id = handle.page_id();
        {
            let mut data = handle.data_mut();
            TablePage::new(&mut data).init(page_id, INVALID_PAGE_ID);
        }
        buffer_pool.unpin_page(page_id, true);

        info!("created table heap: first_page_id={}", page_id);
        Ok(Self {
            buffer_pool,
            first_page_id: page_id,
            last_page_id: page_id,
        })
    }

    /// Reopen a heap from its stored first page, walking the chain to find
    /// the tail.
    pub fn open(buffer_pool: Arc<BufferPoolManager>, first_page_id: PageId) -> RecordResult<Self> {
        let mut last_page_id = first_page_id;
        let mut current_page_id = first_page_id;
        while current_page_id != INVALID_PAGE_ID {
            last_page_id = current_page_id;
            let handle = buffer_pool.fetch_page(current_page_id)?;
            let next_page_id = {
                let mut data = handle.data_mut();
                TablePage::new(&mut data).next_page_id()
            };
            buffer_pool.unpin_page(current_page_id, false);
            current_page_id = next_page_id;
        }

        Ok(Self {
            buffer_pool,
            first_page_id,
            last_page_id,
        })
    }

    /// The heap's persistent handle, stored in a catalog by higher layers
    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn last_page_id(&self) -> PageId {
        self.last_page_id
    }

    /// Insert a tuple into the tail page, allocating and linking a new tail
    /// when it is full. Binds the tuple to its new record id.
    pub fn insert(&mut self, tuple: &mut Tuple) -> RecordResult<RecordId> {
        let tail = self.buffer_pool.fetch_page(self.last_page_id)?;
        let inserted = {
            let mut data = tail.data_mut();
            TablePage::new(&mut data).insert_tuple(tuple)
        };
        let inserted = match inserted {
            Ok(inserted) => inserted,
            Err(err) => {
                self.buffer_pool.unpin_page(self.last_page_id, false);
                return Err(err);
            }
        };

        if let Some(slot_id) = inserted {
            let rid = RecordId::new(self.last_page_id, slot_id);
            tuple.set_record_id(rid);
            self.buffer_pool.unpin_page(self.last_page_id, true);
            return Ok(rid);
        }

        // Tail page is full: allocate a new page and link it behind the tail
        let new_handle = match self.buffer_pool.new_page() {
            Ok(handle) => handle,
            Err(err) => {
                self.buffer_pool.unpin_page(self.last_page_id, false);
                return Err(err.into());
            }
        };
        let new_page_id = new_handle.page_id();
        let slot_id = {
            let mut data = new_handle.data_mut();
            let mut new_page = TablePage::new(&mut data);
            new_page.init(new_page_id, self.last_page_id);
            // size-checked against the old tail already, an empty page must take it
            new_page
                .insert_tuple(tuple)?
                .expect("tuple must fit in an empty page")
        };
        {
            let mut data = tail.data_mut();
            TablePage::new(&mut data).set_next_page_id(new_page_id);
        }

        let rid = RecordId::new(new_page_id, slot_id);
        tuple.set_record_id(rid);
        let old_tail = self.last_page_id;
        self.last_page_id = new_page_id;

        self.buffer_pool.unpin_page(old_tail, true);
        self.buffer_pool.unpin_page(new_page_id, true);
        Ok(rid)
    }

    /// Look up a tuple by record id. Buffer pool failures are logged and
    /// reported as `None`.
    pub fn get(&self, record_id: RecordId) -> Option<Tuple> {
        let handle = match self.buffer_pool.fetch_page(record_id.page_id) {
            Ok(handle) => handle,
            Err(err) => {
                error!("failed to get tuple at {:?}: {}", record_id, err);
                return None;
            }
        };
        let tuple = {
            let mut data = handle.data_mut();
            TablePage::new(&mut data).get_tuple(record_id.slot_id)
        };
        self.buffer_pool.unpin_page(record_id.page_id, false);
        tuple
    }

    /// Tombstone the tuple at `record_id`. The slot is never reused.
    pub fn mark_deleted(&self, record_id: RecordId) -> bool {
        let handle = match self.buffer_pool.fetch_page(record_id.page_id) {
            Ok(handle) => handle,
            Err(err) => {
                error!("failed to mark {:?} deleted: {}", record_id, err);
                return false;
            }
        };
        let deleted = {
            let mut data = handle.data_mut();
            TablePage::new(&mut data).mark_deleted(record_id.slot_id)
        };
        self.buffer_pool.unpin_page(record_id.page_id, true);
        deleted
    }

    /// Overwrite the tuple at `record_id` in place; the new tuple may not
    /// be larger than the stored one (delete + insert instead).
    pub fn update(&self, record_id: RecordId, new_tuple: &Tuple) -> RecordResult<bool> {
        let handle = match self.buffer_pool.fetch_page(record_id.page_id) {
            Ok(handle) => handle,
            Err(err) => {
                error!("failed to update tuple at {:?}: {}", record_id, err);
                return Ok(false);
            }
        };
        let updated = {
            let mut data = handle.data_mut();
            TablePage::new(&mut data).update_tuple(new_tuple, record_id.slot_id)
        };
        self.buffer_pool.unpin_page(record_id.page_id, true);
        updated
    }

    /// Forward iterator over live tuples in `(page_id, slot_id)` order
    pub fn iter(&self) -> TableIterator {
        TableIterator::new(Arc::clone(&self.buffer_pool), self.first_page_id)
    }
}

/// Forward scan over the live tuples of a table heap.
///
/// Yields tuples in ascending `(page_id, slot_id)` order: insertion order
/// within a page, page order along the `next` chain. The next tuple is
/// buffered one step ahead. Behavior under concurrent mutation of the heap
/// is unspecified.
pub struct TableIterator {
    buffer_pool: Arc<BufferPoolManager>,
    current_page_id: PageId,
    current_slot_id: SlotId,
    next_tuple: Option<Tuple>,
}

impl TableIterator {
    fn new(buffer_pool: Arc<BufferPoolManager>, first_page_id: PageId) -> Self {
        let mut iter = Self {
            buffer_pool,
            current_page_id: first_page_id,
            current_slot_id: 0,
            next_tuple: None,
        };
        iter.next_tuple = iter.fetch_next_tuple();
        iter
    }

    /// True iff another live tuple is buffered
    pub fn has_next(&self) -> bool {
        self.next_tuple.is_some()
    }

    fn fetch_next_tuple(&mut self) -> Option<Tuple> {
        while self.current_page_id != INVALID_PAGE_ID {
            let page_id = self.current_page_id;
            let handle = match self.buffer_pool.fetch_page(page_id) {
                Ok(handle) => handle,
                Err(err) => {
                    error!("failed to fetch page {} during scan: {}", page_id, err);
                    self.current_page_id = INVALID_PAGE_ID;
                    return None;
                }
            };

            let (found, next_page_id) = {
                let mut data = handle.data_mut();
                let page = TablePage::new(&mut data);
                let tuple_count = page.tuple_count();
                let mut found = None;
                while self.current_slot_id < tuple_count {
                    let tuple = page.get_tuple(self.current_slot_id);
                    self.current_slot_id += 1;
                    if tuple.is_some() {
                        found = tuple;
                        break;
                    }
                }
                (found, page.next_page_id())
            };
            self.buffer_pool.unpin_page(page_id, false);

            if found.is_some() {
                return found;
            }

            // page exhausted, continue from slot 0 of the next page
            self.current_page_id = next_page_id;
            self.current_slot_id = 0;
        }
        None
    }
}

impl Iterator for TableIterator {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        let tuple = self.next_tuple.take()?;
        self.next_tuple = self.fetch_next_tuple();
        Some(tuple)
    }
}
