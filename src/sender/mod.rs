pub mod compression;
pub mod http;
pub mod metrics;
pub mod pool;
pub mod proto;
pub mod serialization;
pub mod signature;
pub mod sink;

pub use compression::{Codec, Compressed, CompressionError, Compressor};
pub use http::{HttpSink, HttpSinkConfig, HttpSinkError, SinkStats};
pub use metrics::{MetricsSnapshot, ProducerMetrics, SealCounts};
pub use pool::{PackageIdGenerator, PreparedPayload, SenderPool, WorkerContext};
pub use serialization::{BatchSerializer, PayloadFormat, SerializationError};
pub use sink::{DeliveryRequest, DeliverySink, SinkError, SinkResponse};
