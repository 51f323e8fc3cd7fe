use super::error::{RecordError, RecordResult};
use crate::storage::PageId;

/// Slot index within a page
pub type SlotId = u32;

/// Physical identifier for a tuple (page + slot).
///
/// Stable from insertion until the tuple is deleted; updates preserve it.
/// Ordering is lexicographic by page id then slot id, which the 8-byte
/// big-endian wire format preserves byte-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    /// Wire format size: page id (4 bytes) + slot id (4 bytes)
    pub const SERIALIZED_SIZE: usize = 8;

    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }

    /// Serialize to 8 bytes: page id then slot id, both big-endian
    pub fn serialize(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut buf = [0u8; Self::SERIALIZED_SIZE];
        buf[0..4].copy_from_slice(&self.page_id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.slot_id.to_be_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> RecordResult<Self> {
        if data.len() != Self::SERIALIZED_SIZE {
            return Err(RecordError::Deserialization(format!(
                "expected {} bytes for a record id, got {}",
                Self::SERIALIZED_SIZE,
                data.len()
            )));
        }
        let page_id = PageId::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let slot_id = SlotId::from_be_bytes([data[4], data[5], data[6], data[7]]);
        Ok(Self { page_id, slot_id })
    }
}

/// A single tuple: an opaque byte payload plus its record id once stored.
///
/// The storage engine never interprets the payload; schema concerns live in
/// higher layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    record_id: Option<RecordId>,
    data: Vec<u8>,
}

impl Tuple {
    /// Create a tuple that has not been stored yet
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            record_id: None,
            data,
        }
    }

    /// Create a tuple bound to its location in a table
    pub fn with_record_id(record_id: RecordId, data: Vec<u8>) -> Self {
        Self {
            record_id: Some(record_id),
            data,
        }
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: RecordId) {
        self.record_id = Some(record_id);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
