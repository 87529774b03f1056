use thiserror::Error;

/// Caller-facing error type for the producer.
///
/// Every `post` rejection surfaces as one of these. Delivery failures never do;
/// they reach the caller as a `DeliveryResult` instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    #[error("Invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("Record of {size} bytes exceeds the batch limit of {limit} bytes")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("Buffer is full: {requested} bytes requested, {used} of {capacity} bytes in use")]
    BufferFull {
        requested: usize,
        used: usize,
        capacity: usize,
    },

    #[error("Timed out after {timeout_ms}ms waiting for buffer space")]
    BufferTimeout { timeout_ms: u64 },

    #[error("Producer is not running")]
    NotRunning,

    #[error("Producer has been destroyed")]
    Destroyed,

    #[error("Producer already started")]
    AlreadyStarted,
}

impl ProducerError {
    /// Whether the same call may succeed later without caller changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProducerError::BufferFull { .. }
                | ProducerError::BufferTimeout { .. }
                | ProducerError::NotRunning
        )
    }
}
