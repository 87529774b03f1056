use super::config::{ConfigError, LogLevel, ProducerConfig};
use super::logging_system::LogFormat;
use crate::buffer::BackpressurePolicy;
use crate::sender::{Codec, PayloadFormat};
use clap::Parser;
use std::path::PathBuf;

/// Command line of the demo binary. Every option falls back to a `CLS_*`
/// environment variable, then to the config file, then to the defaults.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "cls-log-producer")]
#[command(about = "Reads lines from stdin and ships them to a cloud log topic")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long, env = "CLS_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Collector endpoint, e.g. https://ap-guangzhou.cls.tencentcs.com
    #[arg(short = 'e', long, env = "CLS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Topic id records are posted to
    #[arg(short = 't', long = "topic", env = "CLS_TOPIC")]
    pub topic_id: Option<String>,

    #[arg(long, env = "CLS_SECRET_ID")]
    pub secret_id: Option<String>,

    #[arg(long, env = "CLS_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Session token for temporary credentials
    #[arg(long, env = "CLS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Source tag; defaults to the host name
    #[arg(long, env = "CLS_SOURCE")]
    pub source: Option<String>,

    #[arg(long, env = "CLS_MAX_BATCH_BYTES")]
    pub max_batch_bytes: Option<usize>,

    #[arg(long, env = "CLS_MAX_BATCH_COUNT")]
    pub max_batch_count: Option<usize>,

    #[arg(long, env = "CLS_MAX_BATCH_AGE_MS")]
    pub max_batch_age_ms: Option<u64>,

    #[arg(long, env = "CLS_MAX_BUFFER_BYTES")]
    pub max_buffer_bytes: Option<usize>,

    /// Number of concurrent sender workers
    #[arg(long, env = "CLS_SEND_THREADS")]
    pub send_threads: Option<usize>,

    #[arg(long, env = "CLS_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    #[arg(long, env = "CLS_SEND_TIMEOUT_MS")]
    pub send_timeout_ms: Option<u64>,

    /// How long destroy waits for pending batches
    #[arg(long, env = "CLS_DESTROY_TIMEOUT_MS")]
    pub destroy_timeout_ms: Option<u64>,

    /// none, lz4 or gzip
    #[arg(long, env = "CLS_COMPRESSION")]
    pub compression: Option<Codec>,

    /// protobuf or json
    #[arg(long, env = "CLS_PAYLOAD_FORMAT")]
    pub payload_format: Option<PayloadFormat>,

    /// block, reject-newest or drop-oldest
    #[arg(long, env = "CLS_BACKPRESSURE")]
    pub backpressure: Option<BackpressurePolicy>,

    #[arg(long, env = "CLS_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(short = 'l', long, env = "CLS_LOG_LEVEL", value_enum)]
    pub log_level: Option<LogLevel>,

    /// Emit diagnostic logs as JSON
    #[arg(long, env = "CLS_JSON_LOGS")]
    pub json_logs: bool,

    /// Field key each stdin line is posted under
    #[arg(long, default_value = "content")]
    pub field_key: String,
}

impl Cli {
    pub fn log_format(&self) -> LogFormat {
        if self.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }

    /// Resolve the effective configuration: file or defaults, then `CLS_*`
    /// variables, then explicit flags.
    pub fn into_config(self) -> Result<ProducerConfig, ConfigError> {
        let mut config = match &self.config_file {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => ProducerConfig::default(),
        };
        config.apply_env()?;
        self.overlay(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn overlay(self, config: &mut ProducerConfig) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut config.endpoint, self.endpoint);
        set(&mut config.topic_id, self.topic_id);
        set(&mut config.credentials.secret_id, self.secret_id);
        set(&mut config.credentials.secret_key, self.secret_key);
        if self.token.is_some() {
            config.credentials.token = self.token;
        }
        if self.source.is_some() {
            config.source = self.source;
        }
        set(&mut config.max_batch_bytes, self.max_batch_bytes);
        set(&mut config.max_batch_count, self.max_batch_count);
        set(&mut config.max_batch_age_ms, self.max_batch_age_ms);
        set(&mut config.max_buffer_bytes, self.max_buffer_bytes);
        set(&mut config.send_thread_count, self.send_threads);
        set(&mut config.connect_timeout_ms, self.connect_timeout_ms);
        set(&mut config.send_timeout_ms, self.send_timeout_ms);
        set(&mut config.destroy_drain_timeout_ms, self.destroy_timeout_ms);
        set(&mut config.compression_codec, self.compression);
        set(&mut config.payload_format, self.payload_format);
        set(&mut config.backpressure_policy, self.backpressure);
        set(&mut config.max_retries, self.max_retries);
        set(&mut config.log_level, self.log_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "cls-log-producer",
            "--endpoint",
            "http://localhost:9000",
            "--topic",
            "topic-cli",
            "--max-batch-count",
            "100",
            "--compression",
            "gzip",
            "--backpressure",
            "drop-oldest",
        ]);
        assert_eq!(cli.field_key, "content");

        let mut config = ProducerConfig::default();
        cli.overlay(&mut config);
        assert_eq!(config.endpoint, "http://localhost:9000");
        assert_eq!(config.topic_id, "topic-cli");
        assert_eq!(config.max_batch_count, 100);
        assert_eq!(config.compression_codec, Codec::Gzip);
        assert_eq!(config.backpressure_policy, BackpressurePolicy::DropOldest);
        assert_eq!(config.max_batch_age_ms, 3000);
    }

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::parse_from(["cls-log-producer", "--json-logs", "-l", "debug"]);
        assert_eq!(cli.log_format(), LogFormat::Json);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
    }
}
