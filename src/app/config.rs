use crate::buffer::{BackpressurePolicy, BatchLimits};
use crate::reliability::{RetryConfig, RetryStrategy};
use crate::sender::{Codec, HttpSinkConfig, PayloadFormat};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Collector limit on records per package.
pub const MAX_BATCH_COUNT_CEILING: usize = 10_000;
/// Collector limit on bytes per package.
pub const MAX_BATCH_BYTES_CEILING: usize = 5 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
    #[error("HTTP sink error: {0}")]
    Sink(#[from] crate::sender::HttpSinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as ValueEnum>::from_str(s, true)
    }
}

/// Access key pair plus an optional session token.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub secret_id: String,
    pub secret_key: String,
    pub token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything needed to configure one producer. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub endpoint: String,
    /// Default destination (topic id) for `post`.
    pub topic_id: String,
    pub credentials: Credentials,
    /// Source tag attached to every log group; defaults to the host name.
    pub source: Option<String>,

    pub max_batch_bytes: usize,
    pub max_batch_count: usize,
    pub max_batch_age_ms: u64,
    pub max_buffer_bytes: usize,

    pub send_thread_count: usize,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub destroy_drain_timeout_ms: u64,

    pub compression_codec: Codec,
    pub payload_format: PayloadFormat,
    pub backpressure_policy: BackpressurePolicy,
    pub enqueue_timeout_ms: u64,

    pub max_retries: u32,
    pub retry_strategy: RetryStrategy,
    pub base_retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
    pub retry_jitter: bool,

    pub log_level: LogLevel,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            topic_id: String::new(),
            credentials: Credentials::default(),
            source: None,
            max_batch_bytes: 1024 * 1024, // 1MB
            max_batch_count: 2048,
            max_batch_age_ms: 3000,
            max_buffer_bytes: 64 * 1024 * 1024, // 64MB
            send_thread_count: 1,
            connect_timeout_ms: 10_000,
            send_timeout_ms: 15_000,
            destroy_drain_timeout_ms: 1000,
            compression_codec: Codec::Lz4,
            payload_format: PayloadFormat::Protobuf,
            backpressure_policy: BackpressurePolicy::Block,
            enqueue_timeout_ms: 100,
            max_retries: 10,
            retry_strategy: RetryStrategy::ExponentialBackoff,
            base_retry_backoff_ms: 100,
            max_retry_backoff_ms: 50_000,
            retry_jitter: false,
            log_level: LogLevel::Info,
        }
    }
}

impl ProducerConfig {
    pub fn new(endpoint: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            topic_id: topic_id.into(),
            ..Self::default()
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ProducerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults (or the TOML in `CLS_CONFIG`) overridden by `CLS_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CLS_CONFIG") {
            Ok(inline) => toml::from_str(&inline)?,
            Err(_) => ProducerConfig::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `CLS_*` environment variables that are set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        load_env_string("CLS_ENDPOINT", &mut self.endpoint);
        load_env_string("CLS_TOPIC", &mut self.topic_id);
        load_env_string("CLS_SECRET_ID", &mut self.credentials.secret_id);
        load_env_string("CLS_SECRET_KEY", &mut self.credentials.secret_key);
        load_env_string_opt("CLS_TOKEN", &mut self.credentials.token);
        load_env_string_opt("CLS_SOURCE", &mut self.source);

        load_env_var("CLS_MAX_BATCH_BYTES", &mut self.max_batch_bytes)?;
        load_env_var("CLS_MAX_BATCH_COUNT", &mut self.max_batch_count)?;
        load_env_var("CLS_MAX_BATCH_AGE_MS", &mut self.max_batch_age_ms)?;
        load_env_var("CLS_MAX_BUFFER_BYTES", &mut self.max_buffer_bytes)?;
        load_env_var("CLS_SEND_THREADS", &mut self.send_thread_count)?;
        load_env_var("CLS_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms)?;
        load_env_var("CLS_SEND_TIMEOUT_MS", &mut self.send_timeout_ms)?;
        load_env_var("CLS_DESTROY_TIMEOUT_MS", &mut self.destroy_drain_timeout_ms)?;
        load_env_var("CLS_COMPRESSION", &mut self.compression_codec)?;
        load_env_var("CLS_PAYLOAD_FORMAT", &mut self.payload_format)?;
        load_env_var("CLS_BACKPRESSURE", &mut self.backpressure_policy)?;
        load_env_var("CLS_ENQUEUE_TIMEOUT_MS", &mut self.enqueue_timeout_ms)?;
        load_env_var("CLS_MAX_RETRIES", &mut self.max_retries)?;
        load_env_var("CLS_RETRY_BASE_MS", &mut self.base_retry_backoff_ms)?;
        load_env_var("CLS_RETRY_MAX_MS", &mut self.max_retry_backoff_ms)?;
        load_env_var("CLS_RETRY_JITTER", &mut self.retry_jitter)?;
        load_env_var("CLS_LOG_LEVEL", &mut self.log_level)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;

        if self.topic_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Topic id must not be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("max_batch_bytes", self.max_batch_bytes as u64),
            ("max_batch_count", self.max_batch_count as u64),
            ("max_batch_age_ms", self.max_batch_age_ms),
            ("max_buffer_bytes", self.max_buffer_bytes as u64),
            ("send_thread_count", self.send_thread_count as u64),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.max_batch_count >= MAX_BATCH_COUNT_CEILING {
            return Err(ConfigError::InvalidConfig(format!(
                "max_batch_count ({}) must be below {MAX_BATCH_COUNT_CEILING}",
                self.max_batch_count
            )));
        }

        if self.max_batch_bytes >= MAX_BATCH_BYTES_CEILING {
            return Err(ConfigError::InvalidConfig(format!(
                "max_batch_bytes ({}) must be below {MAX_BATCH_BYTES_CEILING}",
                self.max_batch_bytes
            )));
        }

        if self.max_batch_bytes > self.max_buffer_bytes {
            return Err(ConfigError::InvalidConfig(format!(
                "max_buffer_bytes ({}) must be at least as large as max_batch_bytes ({})",
                self.max_buffer_bytes, self.max_batch_bytes
            )));
        }

        if self.connect_timeout_ms > self.send_timeout_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "connect_timeout_ms ({}) must not exceed send_timeout_ms ({})",
                self.connect_timeout_ms, self.send_timeout_ms
            )));
        }

        if self.base_retry_backoff_ms > self.max_retry_backoff_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "base_retry_backoff_ms ({}) must not exceed max_retry_backoff_ms ({})",
                self.base_retry_backoff_ms, self.max_retry_backoff_ms
            )));
        }

        Ok(())
    }

    /// Endpoint as a URL; a bare host name gets an `https://` scheme.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::InvalidUrl("Endpoint must not be empty".to_string()));
        }

        let candidate = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        let url = Url::parse(&candidate)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint URL '{endpoint}': {e}")))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::InvalidUrl(format!(
                "Unsupported endpoint scheme '{scheme}'"
            ))),
        }
    }

    pub fn resolved_source(&self) -> String {
        if let Some(source) = self.source.as_ref().filter(|s| !s.is_empty()) {
            return source.clone();
        }
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_bytes: self.max_batch_bytes,
            max_count: self.max_batch_count,
            max_age: Duration::from_millis(self.max_batch_age_ms),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_retry_backoff_ms),
            max_delay: Duration::from_millis(self.max_retry_backoff_ms),
            strategy: self.retry_strategy,
            jitter: self.retry_jitter,
        }
    }

    pub fn http_sink_config(&self) -> Result<HttpSinkConfig, ConfigError> {
        Ok(HttpSinkConfig {
            endpoint: self.endpoint_url()?,
            secret_id: self.credentials.secret_id.clone(),
            secret_key: self.credentials.secret_key.clone(),
            token: self.credentials.token.clone().filter(|t| !t.is_empty()),
            connect_timeout: self.connect_timeout(),
            send_timeout: self.send_timeout(),
            user_agent: format!("cls-log-producer/{}", crate::VERSION),
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn destroy_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.destroy_drain_timeout_ms)
    }
}

/// Helper function to load and parse an environment variable.
/// Returns Ok(()) if the variable doesn't exist (keeps default).
fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

fn load_env_string_opt(name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(value);
    }
}
