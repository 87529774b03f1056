use anyhow::Context;
use clap::Parser;
use cls_log_producer::app::{Cli, setup_logging_safe, shutdown_signal};
use cls_log_producer::{DeliveryResult, Field, Producer, Record};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn print_result(result: &DeliveryResult) {
    if result.is_success() {
        println!(
            "sent topic={} records={} log_bytes={} compressed_bytes={} request_id={}",
            result.destination,
            result.record_count,
            result.raw_bytes,
            result.compressed_bytes,
            result.request_id.as_deref().unwrap_or("-"),
        );
    } else {
        println!(
            "failed topic={} records={} attempts={} status={} request_id={} error={}",
            result.destination,
            result.record_count,
            result.attempts,
            result.status_code.map_or_else(|| "-".to_string(), |s| s.to_string()),
            result.request_id.as_deref().unwrap_or("-"),
            result.error_message.as_deref().unwrap_or("-"),
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_format = cli.log_format();
    let field_key = cli.field_key.clone();
    let config = cli.into_config().context("invalid producer configuration")?;

    setup_logging_safe(config.log_level, log_format).context("failed to initialize logging")?;
    info!("Starting cls-log-producer v{}", cls_log_producer::VERSION);

    let drain_timeout = config.destroy_drain_timeout();
    let producer = Producer::builder(config)
        .callback(print_result)
        .build()
        .context("failed to build producer")?;
    producer.start().context("failed to start producer")?;

    let shutdown = shutdown_signal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            info!("End of input");
            break;
        };
        if line.is_empty() {
            continue;
        }

        let record = Record::now([Field::new(field_key.as_str(), line)])?;
        if let Err(e) = producer.post(record).await {
            warn!("Record not accepted: {e}");
        }
    }

    producer.destroy(drain_timeout).await?;
    let metrics = producer.metrics();
    info!(
        accepted = metrics.records_accepted,
        rejected = metrics.records_rejected,
        delivered = metrics.records_delivered,
        failed_batches = metrics.batches_failed,
        "Producer stopped"
    );
    Ok(())
}
