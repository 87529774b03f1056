use serde::Serialize;

/// Classified outcome of a delivery attempt.
///
/// Only `Success` and `FatalFailure` are ever reported to the caller; a
/// `RetriableFailure` sends the batch back to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryOutcome {
    Success,
    RetriableFailure,
    FatalFailure,
}

/// Why a delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Connection refused, reset, DNS failure and the like.
    Network,
    /// Connect or send deadline elapsed, or the collector answered 408.
    Timeout,
    /// Write quota exceeded (403, 429).
    Quota,
    /// Credentials rejected or destination unknown (401, 404).
    Unauthorized,
    /// 5xx from the collector.
    ServerError,
    /// Malformed request (400, 405, 413).
    BadRequest,
    /// Any other rejection the collector will not accept on retry.
    Discarded,
    /// The producer was destroyed before the batch reached a terminal state.
    ShuttingDown,
}

impl FailureKind {
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            FailureKind::Network
                | FailureKind::Timeout
                | FailureKind::Quota
                | FailureKind::ServerError
        )
    }

    pub fn outcome(self) -> DeliveryOutcome {
        if self.is_retriable() {
            DeliveryOutcome::RetriableFailure
        } else {
            DeliveryOutcome::FatalFailure
        }
    }
}

/// Terminal result of one batch. Produced exactly once per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub destination: String,
    pub batch_id: String,
    pub outcome: DeliveryOutcome,
    pub failure: Option<FailureKind>,
    pub status_code: Option<u16>,
    pub request_id: Option<String>,
    pub raw_bytes: usize,
    pub compressed_bytes: usize,
    pub record_count: usize,
    pub attempts: u32,
    pub error_message: Option<String>,
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        self.outcome == DeliveryOutcome::Success
    }
}
