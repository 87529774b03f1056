pub mod cli;
pub mod config;
pub mod logging_system;
pub mod producer;
pub mod registry;
pub mod shutdown;

pub use cli::Cli;
pub use config::{ConfigError, Credentials, LogLevel, ProducerConfig};
pub use logging_system::{LogFormat, LoggingError, LoggingSystem, setup_logging_safe};
pub use producer::{PostOutcome, Producer, ProducerBuilder, ProducerState};
pub use registry::ProducerRegistry;
pub use shutdown::shutdown_signal;
