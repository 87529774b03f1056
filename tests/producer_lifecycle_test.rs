mod common;

use cls_log_producer::{
    DeliveryResult, DeliverySink, Field, PostOutcome, Producer, ProducerConfig, ProducerError,
    ProducerRegistry, ProducerState, Record,
};
use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn record(value: &str) -> Record {
    Record::new(1_700_000_000_000, vec![Field::new("content", value)]).unwrap()
}

fn build(config: ProducerConfig, sink: Arc<ScriptedSink>) -> Producer {
    let sink: Arc<dyn DeliverySink> = sink;
    Producer::builder(config).sink(sink).build().unwrap()
}

#[tokio::test]
async fn test_state_transitions() {
    let producer = build(test_config(), ScriptedSink::ok());
    assert_eq!(producer.state(), ProducerState::Created);

    producer.start().unwrap();
    assert_eq!(producer.state(), ProducerState::Running);
    assert_eq!(producer.start(), Err(ProducerError::AlreadyStarted));
    assert_eq!(producer.state(), ProducerState::Running);

    producer.destroy(Duration::from_secs(1)).await.unwrap();
    assert_eq!(producer.state(), ProducerState::Destroyed);
    assert_eq!(producer.start(), Err(ProducerError::Destroyed));
    assert_eq!(
        producer.destroy(Duration::from_secs(1)).await,
        Err(ProducerError::Destroyed)
    );
}

#[tokio::test]
async fn test_post_before_start_is_not_running() {
    let producer = build(test_config(), ScriptedSink::ok());
    assert_eq!(producer.post(record("early")).await, Err(ProducerError::NotRunning));
    assert_eq!(producer.flush().await, Err(ProducerError::NotRunning));
}

#[tokio::test]
async fn test_post_after_destroy_is_destroyed() {
    let producer = build(test_config(), ScriptedSink::ok());
    producer.start().unwrap();
    producer.post(record("before")).await.unwrap();
    producer.destroy(Duration::from_secs(1)).await.unwrap();

    for _ in 0..3 {
        assert_eq!(producer.post(record("after")).await, Err(ProducerError::Destroyed));
    }
    assert_eq!(
        producer.post_with_outcome(record("after")).await,
        PostOutcome::Rejected(ProducerError::Destroyed)
    );
    assert_eq!(producer.metrics().records_rejected, 4);
}

#[tokio::test]
async fn test_destroy_without_start() {
    let producer = build(test_config(), ScriptedSink::ok());
    producer.destroy(Duration::from_millis(10)).await.unwrap();
    assert_eq!(producer.state(), ProducerState::Destroyed);
    assert_eq!(producer.post(record("x")).await, Err(ProducerError::Destroyed));
}

#[tokio::test]
async fn test_oversized_record_is_rejected() {
    let config = ProducerConfig {
        max_batch_bytes: 256,
        ..test_config()
    };
    let producer = build(config, ScriptedSink::ok());
    producer.start().unwrap();

    let big = "x".repeat(1000);
    let err = producer.post(record(&big)).await.unwrap_err();
    match err {
        ProducerError::RecordTooLarge { size, limit } => {
            assert!(size > 1000);
            assert_eq!(limit, 256);
        }
        other => panic!("expected RecordTooLarge, got {other:?}"),
    }

    producer.post(record("small")).await.unwrap();
    producer.destroy(Duration::from_secs(1)).await.unwrap();
    assert_eq!(producer.metrics().records_accepted, 1);
    assert_eq!(producer.metrics().records_rejected, 1);
}

#[tokio::test]
async fn test_callback_sees_every_terminal_result() {
    let seen: Arc<Mutex<Vec<DeliveryResult>>> = Arc::new(Mutex::new(Vec::new()));
    let sink: Arc<dyn DeliverySink> = ScriptedSink::ok();
    let producer = {
        let seen = Arc::clone(&seen);
        Producer::builder(ProducerConfig {
            max_batch_count: 2,
            ..test_config()
        })
        .sink(sink)
        .callback(move |result: &DeliveryResult| seen.lock().push(result.clone()))
        .build()
        .unwrap()
    };
    producer.start().unwrap();

    for n in 0..5 {
        producer.post(record(&n.to_string())).await.unwrap();
    }
    producer.destroy(Duration::from_secs(1)).await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(DeliveryResult::is_success));
    assert!(seen.iter().all(|r| r.destination == "topic-test"));
    assert!(seen.iter().all(|r| r.raw_bytes > 0 && r.compressed_bytes > 0));
}

#[tokio::test]
async fn test_panicking_callback_does_not_lose_results() {
    let sink: Arc<dyn DeliverySink> = ScriptedSink::ok();
    let producer = Producer::builder(test_config())
        .sink(sink)
        .callback(|result: &DeliveryResult| {
            if result.attempts > 0 {
                panic!("callback failure");
            }
        })
        .build()
        .unwrap();
    producer.start().unwrap();
    let mut results = producer.subscribe();

    producer.post(record("a")).await.unwrap();
    producer.flush().await.unwrap();
    producer.post(record("b")).await.unwrap();
    producer.destroy(Duration::from_secs(1)).await.unwrap();

    assert_eq!(drain(&mut results).len(), 2);
    assert_eq!(producer.metrics().batches_delivered, 2);
}

#[tokio::test]
async fn test_post_with_flush_sends_immediately() {
    let sink = ScriptedSink::ok();
    let producer = build(test_config(), Arc::clone(&sink));
    producer.start().unwrap();
    let mut results = producer.subscribe();

    producer.post_with_flush("topic-test", record("now")).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), results.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.record_count, 1);
    assert_eq!(producer.metrics().batches_sealed.flush, 1);

    producer.destroy(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_registry_destroys_all() {
    let registry = ProducerRegistry::new();
    for name in ["orders", "audit"] {
        let producer = build(test_config(), ScriptedSink::ok());
        producer.start().unwrap();
        assert!(registry.insert(name, producer).is_none());
    }
    assert_eq!(registry.names(), vec!["audit", "orders"]);

    let orders = registry.get("orders").unwrap();
    orders.post(record("kept")).await.unwrap();

    registry.destroy_all(Duration::from_secs(1)).await;
    assert!(registry.is_empty());
    assert_eq!(orders.state(), ProducerState::Destroyed);
    assert_eq!(orders.metrics().records_delivered, 1);
}

#[test]
fn test_invalid_config_is_rejected_at_build() {
    let config = ProducerConfig {
        connect_timeout_ms: 20_000,
        send_timeout_ms: 1_000,
        ..test_config()
    };
    assert!(Producer::builder(config).build().is_err());
    assert!(Producer::new(ProducerConfig::default()).is_err());
}
