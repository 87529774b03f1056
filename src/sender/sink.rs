use super::compression::Codec;
use super::serialization::PayloadFormat;
use crate::domain::FailureKind;
use crate::reliability::classify_status;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// One delivery attempt as seen by a sink.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub destination: String,
    pub batch_id: String,
    pub package_id: String,
    pub body: Bytes,
    pub codec: Codec,
    pub format: PayloadFormat,
    pub raw_bytes: usize,
    pub record_count: usize,
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkResponse {
    pub status_code: Option<u16>,
    pub request_id: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("HTTP error: {status} - {message}")]
    Status {
        status: u16,
        message: String,
        request_id: Option<String>,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SinkError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SinkError::Connect(_) | SinkError::Network(_) => FailureKind::Network,
            SinkError::Timeout(_) => FailureKind::Timeout,
            SinkError::Status { status, .. } => classify_status(*status).unwrap_or(FailureKind::Discarded),
            SinkError::InvalidRequest(_) => FailureKind::BadRequest,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            SinkError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            SinkError::Status { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

/// The remote collector, reduced to a single request/response exchange.
///
/// Implementations must be safe to call from several sender workers at once.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, request: DeliveryRequest) -> Result<SinkResponse, SinkError>;
}
