//! Domain layer for cls-log-producer.
//!
//! Contains the canonical types shared across all modules:
//! - `Record`: one immutable log entry (timestamp + ordered key/value fields)
//! - `DeliveryResult`: the terminal outcome of one batch, handed to the caller
//! - `ProducerError`: caller-facing error type

pub mod error;
pub mod record;
pub mod result;

pub use error::ProducerError;
pub use record::{Field, Record};
pub use result::{DeliveryOutcome, DeliveryResult, FailureKind};
