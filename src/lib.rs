#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::cast_precision_loss,      // Acceptable for metrics/display
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. ProducerError in producer module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

//! Client-side batching and delivery of structured logs to a cloud log
//! service collector.
//!
//! Records posted through a [`Producer`] are grouped into per-destination
//! batches, held in a byte-bounded buffer and shipped by a pool of sender
//! workers. Every batch ends in exactly one [`DeliveryResult`].

pub mod app;
pub mod buffer;
pub mod dispatch;
pub mod domain;
pub mod reliability;
pub mod sender;

// Re-export main types for easy access
pub use app::{PostOutcome, Producer, ProducerBuilder, ProducerConfig, ProducerRegistry, ProducerState};
pub use dispatch::DeliveryCallback;
pub use domain::{DeliveryOutcome, DeliveryResult, FailureKind, Field, ProducerError, Record};
pub use sender::{DeliveryRequest, DeliverySink, SinkError, SinkResponse};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
