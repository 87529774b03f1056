pub mod retry;

pub use retry::{RetryConfig, RetryDecision, RetryPolicy, RetryStrategy, classify_status};
