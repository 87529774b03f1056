use crate::domain::Record;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Why a batch stopped accepting records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SealReason {
    /// The next record would push the batch over the byte limit.
    ByteLimit,
    /// The batch reached the record count limit.
    CountLimit,
    /// The batch outlived the maximum batch age.
    Age,
    /// The caller asked for an explicit flush.
    Flush,
    /// The producer is shutting down.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_bytes: usize,
    pub max_count: usize,
    pub max_age: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024, // 1MB
            max_count: 2048,
            max_age: Duration::from_millis(3000),
        }
    }
}

/// A batch that is still accepting records for one destination.
///
/// Consumed by [`OpenBatch::seal`], so a batch can only be sealed once.
#[derive(Debug)]
pub struct OpenBatch {
    id: String,
    destination: String,
    generation: u64,
    records: Vec<Record>,
    byte_size: usize,
    created_at: Instant,
}

impl OpenBatch {
    pub fn new(destination: impl Into<String>, generation: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            destination: destination.into(),
            generation,
            records: Vec::new(),
            byte_size: 0,
            created_at: Instant::now(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Reason the batch must be sealed before a record of `record_size`
    /// bytes can be added, if any.
    pub fn seal_needed_for(&self, record_size: usize, limits: &BatchLimits) -> Option<SealReason> {
        if self.records.is_empty() {
            return None;
        }
        if self.records.len() >= limits.max_count {
            return Some(SealReason::CountLimit);
        }
        if self.byte_size.saturating_add(record_size) > limits.max_bytes {
            return Some(SealReason::ByteLimit);
        }
        None
    }

    pub fn push(&mut self, record: Record, record_size: usize) {
        self.byte_size += record_size;
        self.records.push(record);
    }

    pub fn seal(self, reason: SealReason) -> Batch {
        Batch {
            id: self.id,
            destination: self.destination,
            records: self.records,
            byte_size: self.byte_size,
            created_at: self.created_at,
            sealed_at: Instant::now(),
            seal_reason: reason,
        }
    }
}

/// An immutable, sealed group of records bound for one destination.
#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    destination: String,
    records: Vec<Record>,
    byte_size: usize,
    created_at: Instant,
    sealed_at: Instant,
    seal_reason: SealReason,
}

impl Batch {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Running serialized size of the records, as counted against buffer limits.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn sealed_at(&self) -> Instant {
        self.sealed_at
    }

    pub fn seal_reason(&self) -> SealReason {
        self.seal_reason
    }
}
