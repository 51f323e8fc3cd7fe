mod error;
mod table_heap;
mod table_page;
mod tuple;

pub use error::{RecordError, RecordResult};
pub use table_heap::{TableHeap, TableIterator};
pub use table_page::{HEADER_SIZE, MAX_TUPLE_SIZE, SLOT_SIZE, TablePage};
pub use tuple::{RecordId, SlotId, Tuple};
