use super::compression::{Codec, Compressor};
use super::metrics::ProducerMetrics;
use super::serialization::BatchSerializer;
use super::sink::{DeliveryRequest, DeliverySink, SinkError};
use crate::buffer::{Batch, BufferManager, ClaimedBatch};
use crate::dispatch::ResultDispatcher;
use crate::domain::{DeliveryOutcome, DeliveryResult, FailureKind};
use crate::reliability::{RetryDecision, RetryPolicy};
use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serialized and compressed batch body, kept across retries.
#[derive(Debug, Clone)]
pub struct PreparedPayload {
    pub package_id: String,
    pub body: Bytes,
    pub codec: Codec,
    pub raw_bytes: usize,
}

/// Issues `<PREFIX>-<INDEX>` package ids: a random per-producer prefix and a
/// monotonically increasing hex index.
#[derive(Debug)]
pub struct PackageIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl PackageIdGenerator {
    pub fn new() -> Self {
        Self::with_prefix(format!("{:016X}", rand::rng().random::<u64>()))
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_id(&self) -> String {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{index:X}", self.prefix)
    }
}

impl Default for PackageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

const SHUTDOWN_MESSAGE: &str = "producer destroyed before the batch was delivered";

/// Everything a sender worker needs, shared by all workers of a pool.
pub struct WorkerContext {
    pub buffer: Arc<BufferManager>,
    pub sink: Arc<dyn DeliverySink>,
    pub serializer: BatchSerializer,
    pub compressor: Compressor,
    pub retry: RetryPolicy,
    pub dispatcher: Arc<ResultDispatcher>,
    pub metrics: Arc<ProducerMetrics>,
    pub package_ids: PackageIdGenerator,
    pub send_timeout: Duration,
}

fn terminal_result(
    claimed: &ClaimedBatch,
    failure: Option<(FailureKind, String)>,
    status_code: Option<u16>,
    request_id: Option<String>,
) -> DeliveryResult {
    let batch = claimed.batch();
    let (raw_bytes, compressed_bytes) = claimed
        .payload()
        .map_or((batch.byte_size(), 0), |payload| (payload.raw_bytes, payload.body.len()));

    let (outcome, failure, error_message) = match failure {
        None => (DeliveryOutcome::Success, None, None),
        Some((kind, message)) => (DeliveryOutcome::FatalFailure, Some(kind), Some(message)),
    };

    DeliveryResult {
        destination: batch.destination().to_string(),
        batch_id: batch.id().to_string(),
        outcome,
        failure,
        status_code,
        request_id,
        raw_bytes,
        compressed_bytes,
        record_count: batch.len(),
        attempts: claimed.attempts(),
        error_message,
    }
}

impl WorkerContext {
    /// Release a batch from the buffer and report its terminal outcome.
    fn finish(
        &self,
        claimed: ClaimedBatch,
        failure: Option<(FailureKind, String)>,
        status_code: Option<u16>,
        request_id: Option<String>,
    ) {
        let result = terminal_result(&claimed, failure, status_code, request_id);
        if result.is_success() {
            self.metrics.record_delivered(result.record_count);
        } else {
            self.metrics.record_failed();
        }
        self.buffer.complete(claimed);
        self.dispatcher.dispatch(result);
    }

    /// Report a buffered batch that will never be attempted again because the
    /// producer is going away.
    pub(crate) fn abandon(&self, claimed: ClaimedBatch) {
        warn!(
            destination = claimed.batch().destination(),
            batch_id = claimed.batch().id(),
            records = claimed.batch().len(),
            attempts = claimed.attempts(),
            "Abandoning undelivered batch"
        );
        self.finish(
            claimed,
            Some((FailureKind::ShuttingDown, SHUTDOWN_MESSAGE.to_string())),
            None,
            None,
        );
    }

    /// Same as [`WorkerContext::abandon`] for a sealed batch that never made it
    /// into the buffer, so it holds no reserved bytes.
    pub(crate) fn abandon_unqueued(&self, batch: Batch) {
        let claimed = ClaimedBatch::new(Arc::new(batch));
        warn!(
            destination = claimed.batch().destination(),
            batch_id = claimed.batch().id(),
            records = claimed.batch().len(),
            "Abandoning batch that never fit in the buffer"
        );
        let result = terminal_result(
            &claimed,
            Some((FailureKind::ShuttingDown, SHUTDOWN_MESSAGE.to_string())),
            None,
            None,
        );
        self.metrics.record_failed();
        self.dispatcher.dispatch(result);
    }

    fn prepare(&self, claimed: &ClaimedBatch) -> Result<PreparedPayload, String> {
        let package_id = self.package_ids.next_id();
        let raw = self
            .serializer
            .serialize(claimed.batch(), &package_id)
            .map_err(|e| format!("failed to serialize batch: {e}"))?;
        let raw_bytes = raw.len();

        let compressed = self.compressor.compress_or_raw(raw);
        if compressed.fell_back {
            self.metrics.record_compression_fallback();
        }

        Ok(PreparedPayload {
            package_id,
            body: Bytes::from(compressed.bytes),
            codec: compressed.codec,
            raw_bytes,
        })
    }

    async fn process(&self, worker_id: usize, mut claimed: ClaimedBatch, abort: &CancellationToken) {
        let attempt = claimed.begin_attempt();
        let payload = match claimed.payload().cloned() {
            Some(payload) => payload,
            None => match self.prepare(&claimed) {
                Ok(payload) => {
                    claimed.set_payload(payload.clone());
                    payload
                }
                Err(message) => {
                    error!(batch_id = claimed.batch().id(), %message, "Dropping batch that cannot be encoded");
                    self.finish(claimed, Some((FailureKind::BadRequest, message)), None, None);
                    return;
                }
            },
        };

        let batch = Arc::clone(claimed.batch());
        let request = DeliveryRequest {
            destination: batch.destination().to_string(),
            batch_id: batch.id().to_string(),
            package_id: payload.package_id.clone(),
            body: payload.body.clone(),
            codec: payload.codec,
            format: self.serializer.format(),
            raw_bytes: payload.raw_bytes,
            record_count: batch.len(),
            attempt,
        };

        debug!(
            worker_id,
            destination = batch.destination(),
            batch_id = batch.id(),
            attempt,
            bytes = payload.body.len(),
            "Delivering batch"
        );

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            () = abort.cancelled() => None,
            result = timeout(self.send_timeout, self.sink.deliver(request)) => Some(result),
        };
        let latency = started.elapsed();

        let Some(outcome) = outcome else {
            self.abandon(claimed);
            return;
        };
        self.metrics.record_attempt(latency, payload.raw_bytes, payload.body.len());

        let error = match outcome {
            Ok(Ok(response)) => {
                info!(
                    destination = batch.destination(),
                    batch_id = batch.id(),
                    records = batch.len(),
                    bytes = payload.body.len(),
                    attempt,
                    request_id = response.request_id.as_deref().unwrap_or("-"),
                    ?latency,
                    "Batch delivered"
                );
                self.finish(claimed, None, response.status_code, response.request_id);
                return;
            }
            Ok(Err(error)) => error,
            Err(_) => SinkError::Timeout(format!(
                "attempt exceeded send timeout of {}ms",
                self.send_timeout.as_millis()
            )),
        };

        let kind = error.kind();
        match self.retry.decide(kind, attempt, claimed.last_backoff()) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    destination = batch.destination(),
                    batch_id = batch.id(),
                    attempt,
                    ?kind,
                    ?delay,
                    %error,
                    "Delivery failed, retrying"
                );
                claimed.set_last_backoff(delay);
                self.metrics.record_retry();
                self.buffer.requeue(claimed, Instant::now() + delay);
            }
            RetryDecision::GiveUp => {
                error!(
                    destination = batch.destination(),
                    batch_id = batch.id(),
                    attempt,
                    ?kind,
                    %error,
                    "Delivery failed permanently"
                );
                let status_code = error.status_code();
                let request_id = error.request_id().map(str::to_string);
                self.finish(claimed, Some((kind, error.to_string())), status_code, request_id);
            }
        }
    }
}

async fn run_worker(worker_id: usize, context: Arc<WorkerContext>, abort: CancellationToken) {
    debug!(worker_id, "Sender worker started");
    while let Some(claimed) = context.buffer.dequeue_next(&abort).await {
        context.process(worker_id, claimed, &abort).await;
    }
    debug!(worker_id, "Sender worker stopped");
}

/// Fixed set of workers draining the buffer into the sink.
pub struct SenderPool {
    workers: JoinSet<()>,
    abort: CancellationToken,
    context: Arc<WorkerContext>,
}

impl SenderPool {
    pub fn start(context: Arc<WorkerContext>, worker_count: usize) -> Self {
        let abort = CancellationToken::new();
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count.max(1) {
            workers.spawn(run_worker(worker_id, Arc::clone(&context), abort.clone()));
        }
        info!(workers = worker_count.max(1), "Sender pool started");

        Self {
            workers,
            abort,
            context,
        }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.context
    }

    /// Wait for every worker to exit. Returns `false` if `deadline` passed first.
    pub async fn join_until(&mut self, deadline: Instant) -> bool {
        timeout_at(deadline, Self::join_workers(&mut self.workers)).await.is_ok()
    }

    /// Signal workers to drop in-flight attempts and exit.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Make workers drop in-flight attempts and exit, then wait for them.
    pub async fn abort_and_join(&mut self) {
        self.abort();
        Self::join_workers(&mut self.workers).await;
    }

    async fn join_workers(workers: &mut JoinSet<()>) {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Sender worker terminated abnormally: {e}");
            }
        }
    }
}

impl std::fmt::Debug for SenderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderPool")
            .field("workers", &self.workers.len())
            .field("aborted", &self.abort.is_cancelled())
            .finish()
    }
}
