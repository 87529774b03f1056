use super::config::{ConfigError, ProducerConfig};
use crate::buffer::{BatchAssembler, BufferManager, Rejection, SealReason};
use crate::dispatch::{DeliveryCallback, ResultDispatcher};
use crate::domain::{DeliveryResult, ProducerError, Record};
use crate::reliability::RetryPolicy;
use crate::sender::{
    BatchSerializer, Compressor, DeliverySink, HttpSink, MetricsSnapshot, PackageIdGenerator,
    ProducerMetrics, SenderPool, WorkerContext,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Created,
    Running,
    Draining,
    Destroyed,
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProducerState::Created => "created",
            ProducerState::Running => "running",
            ProducerState::Draining => "draining",
            ProducerState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Outcome of a single `post`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Accepted,
    Rejected(ProducerError),
}

impl PostOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PostOutcome::Accepted)
    }
}

impl From<Result<(), ProducerError>> for PostOutcome {
    fn from(result: Result<(), ProducerError>) -> Self {
        match result {
            Ok(()) => PostOutcome::Accepted,
            Err(e) => PostOutcome::Rejected(e),
        }
    }
}

pub struct ProducerBuilder {
    config: ProducerConfig,
    sink: Option<Arc<dyn DeliverySink>>,
    callback: Option<Arc<dyn DeliveryCallback>>,
    package_prefix: Option<String>,
}

impl ProducerBuilder {
    pub fn new(config: ProducerConfig) -> Self {
        Self {
            config,
            sink: None,
            callback: None,
            package_prefix: None,
        }
    }

    /// Deliver through `sink` instead of the HTTP collector client.
    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Called once per terminal delivery result, from any sender worker.
    pub fn callback<C>(mut self, callback: C) -> Self
    where
        C: DeliveryCallback + 'static,
    {
        let callback: Arc<dyn DeliveryCallback> = Arc::new(callback);
        self.callback = Some(callback);
        self
    }

    pub fn package_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.package_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Result<Producer, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let sink: Arc<dyn DeliverySink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(HttpSink::new(config.http_sink_config()?)?),
        };

        let metrics = Arc::new(ProducerMetrics::new());
        let dispatcher = Arc::new(ResultDispatcher::new(self.callback));
        let buffer = Arc::new(BufferManager::new(
            config.max_buffer_bytes,
            config.backpressure_policy,
        ));
        let serializer = BatchSerializer::new(config.payload_format, config.resolved_source());
        let assembler = Arc::new(BatchAssembler::new(
            config.batch_limits(),
            serializer.clone(),
            Arc::clone(&buffer),
            Arc::clone(&metrics),
        ));
        let package_ids = match self.package_prefix {
            Some(prefix) => PackageIdGenerator::with_prefix(prefix),
            None => PackageIdGenerator::new(),
        };

        let context = Arc::new(WorkerContext {
            buffer: Arc::clone(&buffer),
            sink,
            serializer,
            compressor: Compressor::new(config.compression_codec),
            retry: RetryPolicy::new(config.retry_config()),
            dispatcher: Arc::clone(&dispatcher),
            metrics: Arc::clone(&metrics),
            package_ids,
            send_timeout: config.send_timeout(),
        });

        debug!(
            topic_id = %config.topic_id,
            source = context.serializer.source(),
            codec = %config.compression_codec,
            "Producer configured"
        );

        Ok(Producer {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ProducerState::Created),
                assembler,
                buffer,
                context,
                metrics,
                dispatcher,
                pool: Mutex::new(None),
            }),
        })
    }
}

struct Inner {
    config: ProducerConfig,
    state: Mutex<ProducerState>,
    assembler: Arc<BatchAssembler>,
    buffer: Arc<BufferManager>,
    context: Arc<WorkerContext>,
    metrics: Arc<ProducerMetrics>,
    dispatcher: Arc<ResultDispatcher>,
    pool: Mutex<Option<SenderPool>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Dropped without destroy: stop timers and workers without draining.
        self.assembler.close_and_seal_all();
        if let Some(pool) = self.pool.get_mut().as_ref() {
            pool.abort();
        }
    }
}

/// Handle to one configured producer. Clones share the same instance.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    pub fn builder(config: ProducerConfig) -> ProducerBuilder {
        ProducerBuilder::new(config)
    }

    /// Configure a producer that delivers over HTTP.
    pub fn new(config: ProducerConfig) -> Result<Self, ConfigError> {
        ProducerBuilder::new(config).build()
    }

    /// Spawn the sender workers. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ProducerError> {
        let mut state = self.inner.state.lock();
        match *state {
            ProducerState::Created => {}
            ProducerState::Running | ProducerState::Draining => {
                return Err(ProducerError::AlreadyStarted);
            }
            ProducerState::Destroyed => return Err(ProducerError::Destroyed),
        }

        let pool = SenderPool::start(
            Arc::clone(&self.inner.context),
            self.inner.config.send_thread_count,
        );
        *self.inner.pool.lock() = Some(pool);
        *state = ProducerState::Running;

        info!(
            topic_id = %self.inner.config.topic_id,
            workers = self.inner.config.send_thread_count,
            "Producer started"
        );
        Ok(())
    }

    pub fn state(&self) -> ProducerState {
        *self.inner.state.lock()
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.inner.config
    }

    /// Post a record to the configured topic.
    pub async fn post(&self, record: Record) -> Result<(), ProducerError> {
        self.post_to(&self.inner.config.topic_id, record).await
    }

    pub async fn post_with_outcome(&self, record: Record) -> PostOutcome {
        self.post(record).await.into()
    }

    /// Post a record to `destination`.
    ///
    /// Never waits on the network. Under the blocking backpressure policy it
    /// may wait up to the enqueue timeout for buffer space.
    pub async fn post_to(&self, destination: &str, record: Record) -> Result<(), ProducerError> {
        let result = self.append(destination, record).await;
        match &result {
            Ok(()) => self.inner.metrics.record_accepted(),
            Err(error) => {
                self.inner.metrics.record_rejected();
                debug!(destination, %error, "Record rejected");
            }
        }
        result
    }

    /// Post a record, then seal its destination's open batch right away.
    pub async fn post_with_flush(&self, destination: &str, record: Record) -> Result<(), ProducerError> {
        self.post_to(destination, record).await?;
        self.seal(destination, SealReason::Flush).await
    }

    /// Seal every open batch so it is sent without waiting for its age limit.
    pub async fn flush(&self) -> Result<(), ProducerError> {
        self.ensure_running()?;
        for destination in self.inner.assembler.destinations() {
            self.seal(&destination, SealReason::Flush).await?;
        }
        Ok(())
    }

    /// Stop accepting records and deliver what is pending, for at most `timeout`.
    ///
    /// Batches still undelivered at the deadline are reported as fatal
    /// failures. Returns once every sender worker has exited.
    pub async fn destroy(&self, timeout: Duration) -> Result<(), ProducerError> {
        let deadline = Instant::now() + timeout;
        {
            let mut state = self.inner.state.lock();
            match *state {
                ProducerState::Created | ProducerState::Running => {
                    *state = ProducerState::Draining;
                }
                ProducerState::Draining | ProducerState::Destroyed => {
                    return Err(ProducerError::Destroyed);
                }
            }
        }
        info!(topic_id = %self.inner.config.topic_id, ?timeout, "Draining producer");

        let pool = self.inner.pool.lock().take();
        let leftovers = self.inner.assembler.close_and_seal_all();
        for batch in leftovers {
            self.enqueue_before(batch, deadline, pool.is_some()).await;
        }
        self.inner.buffer.close();

        if let Some(mut pool) = pool {
            if !pool.join_until(deadline).await {
                warn!(
                    ?timeout,
                    pending = self.inner.buffer.used_bytes(),
                    "Drain deadline passed, abandoning pending batches"
                );
                pool.abort_and_join().await;
            }
        }

        for claimed in self.inner.buffer.claim_remaining() {
            self.inner.context.abandon(claimed);
        }

        *self.inner.state.lock() = ProducerState::Destroyed;
        let snapshot = self.metrics();
        info!(
            delivered = snapshot.batches_delivered,
            failed = snapshot.batches_failed,
            dropped = snapshot.buffer.dropped_batches,
            "Producer destroyed"
        );
        Ok(())
    }

    /// `destroy` with the configured drain timeout.
    pub async fn shutdown(&self) -> Result<(), ProducerError> {
        self.destroy(self.inner.config.destroy_drain_timeout()).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(self.inner.buffer.metrics())
    }

    /// Channel receiving every terminal result from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<DeliveryResult> {
        self.inner.dispatcher.subscribe()
    }

    fn ensure_running(&self) -> Result<(), ProducerError> {
        match *self.inner.state.lock() {
            ProducerState::Running => Ok(()),
            ProducerState::Destroyed => Err(ProducerError::Destroyed),
            ProducerState::Created | ProducerState::Draining => Err(ProducerError::NotRunning),
        }
    }

    /// The error for a post that raced with `destroy`.
    fn closed_error(&self) -> ProducerError {
        match self.state() {
            ProducerState::Destroyed => ProducerError::Destroyed,
            _ => ProducerError::NotRunning,
        }
    }

    fn enqueue_deadline(&self) -> Instant {
        Instant::now() + self.inner.config.enqueue_timeout()
    }

    fn buffer_timeout(&self) -> ProducerError {
        ProducerError::BufferTimeout {
            timeout_ms: self.inner.config.enqueue_timeout_ms,
        }
    }

    async fn append(&self, destination: &str, record: Record) -> Result<(), ProducerError> {
        self.ensure_running()?;
        let waits = self.inner.buffer.policy().waits_for_space();
        let deadline = self.enqueue_deadline();
        let mut record = record;

        loop {
            let Rejection { record: returned, error } =
                match self.inner.assembler.append(destination, record) {
                    Ok(()) => return Ok(()),
                    Err(rejection) => rejection,
                };

            match error {
                ProducerError::BufferFull { .. } if waits => {
                    if Instant::now() >= deadline {
                        return Err(self.buffer_timeout());
                    }
                    self.inner.buffer.wait_for_space(deadline).await;
                    record = returned;
                }
                ProducerError::NotRunning => return Err(self.closed_error()),
                other => return Err(other),
            }
        }
    }

    async fn seal(&self, destination: &str, reason: SealReason) -> Result<(), ProducerError> {
        let waits = self.inner.buffer.policy().waits_for_space();
        let deadline = self.enqueue_deadline();

        loop {
            match self.inner.assembler.seal_destination(destination, reason) {
                Ok(()) => return Ok(()),
                Err(ProducerError::BufferFull { .. }) if waits => {
                    if Instant::now() >= deadline {
                        return Err(self.buffer_timeout());
                    }
                    self.inner.buffer.wait_for_space(deadline).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Queue a batch sealed at shutdown, or report it abandoned if no space
    /// frees up before `deadline`.
    async fn enqueue_before(&self, batch: crate::buffer::Batch, deadline: Instant, draining: bool) {
        loop {
            match self.inner.buffer.reserve(batch.byte_size()) {
                Ok(reservation) => {
                    self.inner.buffer.push(batch, reservation);
                    return;
                }
                Err(_) if draining && Instant::now() < deadline => {
                    self.inner.buffer.wait_for_space(deadline).await;
                }
                Err(_) => {
                    self.inner.context.abandon_unqueued(batch);
                    return;
                }
            }
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("topic_id", &self.inner.config.topic_id)
            .field("state", &self.state())
            .field("buffer_used", &self.inner.buffer.used_bytes())
            .finish()
    }
}
