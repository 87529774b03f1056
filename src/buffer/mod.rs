pub mod assembler;
pub mod backpressure;
pub mod batch;
pub mod memory;
pub mod queue;

pub use assembler::{BatchAssembler, Rejection};
pub use backpressure::BackpressurePolicy;
pub use batch::{Batch, BatchLimits, OpenBatch, SealReason};
pub use memory::{ByteBudget, MemoryPressure};
pub use queue::{BufferManager, BufferMetrics, ClaimedBatch, Reservation};
