#![allow(dead_code)]

use async_trait::async_trait;
use cls_log_producer::sender::proto::{LogGroup, LogGroupList, PACKAGE_ID_TAG};
use cls_log_producer::sender::{Codec, PayloadFormat};
use cls_log_producer::{
    DeliveryRequest, DeliveryResult, DeliverySink, ProducerConfig, SinkError, SinkResponse,
};
use parking_lot::Mutex;
use prost::Message;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// What the sink does on its n-th call (0-based): wait, then answer.
pub type Script = Box<dyn Fn(usize) -> (Duration, Result<SinkResponse, SinkError>) + Send + Sync>;

/// In-process sink that records every request and answers from a script.
pub struct ScriptedSink {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<(Instant, DeliveryRequest)>>,
}

impl ScriptedSink {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Box::new(|n| (Duration::ZERO, Ok(accepted(n)))))
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Self::new(Box::new(move |n| (latency, Ok(accepted(n)))))
    }

    /// Fails the first `failures` calls with `status`, then accepts.
    pub fn failing_first(failures: usize, status: u16) -> Arc<Self> {
        Self::new(Box::new(move |n| {
            if n < failures {
                (Duration::ZERO, Err(status_error(status)))
            } else {
                (Duration::ZERO, Ok(accepted(n)))
            }
        }))
    }

    pub fn always(status: u16) -> Arc<Self> {
        Self::new(Box::new(move |_| (Duration::ZERO, Err(status_error(status)))))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl DeliverySink for ScriptedSink {
    async fn deliver(&self, request: DeliveryRequest) -> Result<SinkResponse, SinkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push((Instant::now(), request));
        let (delay, response) = (self.script)(n);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

pub fn accepted(n: usize) -> SinkResponse {
    SinkResponse {
        status_code: Some(200),
        request_id: Some(format!("req-{n}")),
    }
}

pub fn status_error(status: u16) -> SinkError {
    SinkError::Status {
        status,
        message: format!("status {status}"),
        request_id: Some("req-error".to_string()),
    }
}

/// Small limits so tests exercise sealing without many records.
pub fn test_config() -> ProducerConfig {
    ProducerConfig {
        source: Some("test-host".to_string()),
        max_batch_count: 10,
        max_batch_bytes: 64 * 1024,
        max_buffer_bytes: 1024 * 1024,
        enqueue_timeout_ms: 1000,
        base_retry_backoff_ms: 100,
        max_retry_backoff_ms: 10_000,
        ..ProducerConfig::new("http://127.0.0.1:9", "topic-test")
    }
}

/// Undo compression of a request body.
pub fn decompress(request: &DeliveryRequest) -> Vec<u8> {
    match request.codec {
        Codec::None => request.body.to_vec(),
        Codec::Lz4 => lz4_flex::block::decompress(&request.body, request.raw_bytes)
            .expect("valid lz4 block"),
        Codec::Gzip => {
            let mut raw = Vec::new();
            flate2::read::GzDecoder::new(&request.body[..])
                .read_to_end(&mut raw)
                .expect("valid gzip stream");
            raw
        }
    }
}

pub fn decode_group(request: &DeliveryRequest) -> LogGroup {
    assert_eq!(request.format, PayloadFormat::Protobuf);
    let list = LogGroupList::decode(&decompress(request)[..]).expect("valid log group list");
    assert_eq!(list.log_group_list.len(), 1);
    list.log_group_list.into_iter().next().expect("one log group")
}

/// Values of `key` across all logs of a request, in wire order.
pub fn field_values(request: &DeliveryRequest, key: &str) -> Vec<String> {
    decode_group(request)
        .logs
        .iter()
        .flat_map(|log| log.contents.iter())
        .filter(|content| content.key == key)
        .map(|content| content.value.clone())
        .collect()
}

pub fn package_id(group: &LogGroup) -> Option<String> {
    group
        .log_tags
        .iter()
        .find(|tag| tag.key == PACKAGE_ID_TAG)
        .map(|tag| tag.value.clone())
}

/// Everything already sitting in a result channel.
pub fn drain(rx: &mut UnboundedReceiver<DeliveryResult>) -> Vec<DeliveryResult> {
    let mut results = Vec::new();
    while let Ok(result) = rx.try_recv() {
        results.push(result);
    }
    results
}
