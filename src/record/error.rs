use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Tuple is empty")]
    EmptyTuple,

    #[error("Tuple size {size} exceeds page capacity {max}")]
    TupleTooLarge { size: usize, max: usize },

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
