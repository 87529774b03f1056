use super::backpressure::BackpressurePolicy;
use super::batch::Batch;
use super::memory::{ByteBudget, MemoryPressure};
use crate::domain::ProducerError;
use crate::sender::PreparedPayload;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on a single wait for buffer space. Releases that race with a
/// waiter registering are picked up on the next poll.
const SPACE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Proof that bytes were reserved for a batch about to be enqueued.
#[derive(Debug)]
#[must_use = "a reservation must be handed to BufferManager::push"]
pub struct Reservation {
    bytes: usize,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// A batch owned by exactly one sender worker.
///
/// Carries delivery state across retries: the attempt count, the last backoff
/// and the encoded payload, so every attempt reuses the same package id.
#[derive(Debug)]
pub struct ClaimedBatch {
    batch: Arc<Batch>,
    attempts: u32,
    last_backoff: Option<Duration>,
    payload: Option<PreparedPayload>,
}

impl ClaimedBatch {
    pub(crate) fn new(batch: Arc<Batch>) -> Self {
        Self {
            batch,
            attempts: 0,
            last_backoff: None,
            payload: None,
        }
    }

    pub fn batch(&self) -> &Arc<Batch> {
        &self.batch
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count a new attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn last_backoff(&self) -> Option<Duration> {
        self.last_backoff
    }

    pub fn set_last_backoff(&mut self, backoff: Duration) {
        self.last_backoff = Some(backoff);
    }

    pub fn payload(&self) -> Option<&PreparedPayload> {
        self.payload.as_ref()
    }

    pub fn set_payload(&mut self, payload: PreparedPayload) {
        self.payload = Some(payload);
    }
}

#[derive(Debug)]
struct RetryEntry {
    ready_at: Instant,
    claimed: ClaimedBatch,
}

#[derive(Debug)]
struct QueueState {
    ready: VecDeque<Arc<Batch>>,
    retry: Vec<RetryEntry>,
    in_flight: usize,
    budget: ByteBudget,
    closed: bool,
    enqueued_batches: u64,
    dropped_batches: u64,
    dropped_records: u64,
}

impl QueueState {
    fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.retry.is_empty() && self.in_flight == 0
    }

    fn take_due_retry(&mut self, now: Instant) -> Option<ClaimedBatch> {
        let index = self
            .retry
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.ready_at <= now)
            .min_by_key(|(_, entry)| entry.ready_at)
            .map(|(index, _)| index)?;
        Some(self.retry.swap_remove(index).claimed)
    }

    fn next_retry_at(&self) -> Option<Instant> {
        self.retry.iter().map(|entry| entry.ready_at).min()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferMetrics {
    pub capacity: usize,
    pub used_bytes: usize,
    pub total_reserved_bytes: u64,
    pub total_released_bytes: u64,
    pub ready_batches: usize,
    pub retry_batches: usize,
    pub in_flight_batches: usize,
    pub enqueued_batches: u64,
    pub dropped_batches: u64,
    pub dropped_records: u64,
    pub pressure: MemoryPressure,
}

/// Bounded holding area for sealed batches awaiting delivery.
///
/// Bytes of a batch stay reserved from sealing until its terminal outcome,
/// including while it waits for a retry.
#[derive(Debug)]
pub struct BufferManager {
    state: Mutex<QueueState>,
    policy: BackpressurePolicy,
    work: Notify,
    space: Notify,
}

impl BufferManager {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                retry: Vec::new(),
                in_flight: 0,
                budget: ByteBudget::new(capacity),
                closed: false,
                enqueued_batches: 0,
                dropped_batches: 0,
                dropped_records: 0,
            }),
            policy,
            work: Notify::new(),
            space: Notify::new(),
        }
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Reserve room for a batch of `bytes`, applying the backpressure policy
    /// when it does not fit.
    ///
    /// Only `DropOldest` changes the queue here: it evicts queued batches that
    /// no worker has claimed yet. The blocking wait of `Block` is left to the
    /// caller via [`BufferManager::wait_for_space`].
    pub fn reserve(&self, bytes: usize) -> Result<Reservation, ProducerError> {
        let mut state = self.state.lock();

        if state.budget.try_reserve(bytes) {
            return Ok(Reservation { bytes });
        }

        if self.policy == BackpressurePolicy::DropOldest
            && Self::eviction_makes_room(&state, bytes)
        {
            while !state.budget.fits(bytes) {
                let Some(oldest) = state.ready.pop_front() else {
                    break;
                };
                state.budget.release(oldest.byte_size());
                state.dropped_batches += 1;
                state.dropped_records += oldest.len() as u64;
                warn!(
                    destination = oldest.destination(),
                    batch_id = oldest.id(),
                    records = oldest.len(),
                    bytes = oldest.byte_size(),
                    "Dropped oldest batch to make room in buffer"
                );
            }

            if state.budget.try_reserve(bytes) {
                return Ok(Reservation { bytes });
            }
        }

        Err(ProducerError::BufferFull {
            requested: bytes,
            used: state.budget.used(),
            capacity: state.budget.capacity(),
        })
    }

    /// Whether evicting every unclaimed batch would free enough room.
    ///
    /// In-flight and retrying batches keep their bytes, so when they alone
    /// crowd out `bytes` nothing is evicted.
    fn eviction_makes_room(state: &QueueState, bytes: usize) -> bool {
        let evictable: usize = state.ready.iter().map(|batch| batch.byte_size()).sum();
        let pinned = state.budget.used().saturating_sub(evictable);
        pinned
            .checked_add(bytes)
            .is_some_and(|needed| needed <= state.budget.capacity())
    }

    /// Queue a sealed batch whose bytes were reserved with [`BufferManager::reserve`].
    pub fn push(&self, batch: Batch, reservation: Reservation) {
        debug_assert_eq!(batch.byte_size(), reservation.bytes);
        let mut state = self.state.lock();
        if state.budget.pressure() == MemoryPressure::Critical {
            debug!(
                used = state.budget.used(),
                capacity = state.budget.capacity(),
                "Buffer under critical memory pressure"
            );
        }
        state.ready.push_back(Arc::new(batch));
        state.enqueued_batches += 1;
        drop(state);
        self.work.notify_waiters();
    }

    /// Wait until some bytes are released or `deadline` passes.
    ///
    /// Returns early at least every poll interval; callers re-check with
    /// [`BufferManager::reserve`].
    pub async fn wait_for_space(&self, deadline: Instant) {
        let notified = self.space.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let poll_at = (Instant::now() + SPACE_POLL_INTERVAL).min(deadline);
        tokio::select! {
            () = &mut notified => {}
            () = sleep_until(poll_at) => {}
        }
    }

    /// Claim the next batch for delivery.
    ///
    /// Due retries go first, then fresh batches in seal order. Returns `None`
    /// once `cancel` fires or the buffer is closed and fully drained.
    pub async fn dequeue_next(&self, cancel: &CancellationToken) -> Option<ClaimedBatch> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let notified = self.work.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_retry_at = {
                let mut state = self.state.lock();
                let now = Instant::now();

                if let Some(claimed) = state.take_due_retry(now) {
                    state.in_flight += 1;
                    return Some(claimed);
                }
                if let Some(batch) = state.ready.pop_front() {
                    state.in_flight += 1;
                    return Some(ClaimedBatch::new(batch));
                }
                if state.closed && state.is_drained() {
                    return None;
                }
                state.next_retry_at()
            };

            tokio::select! {
                () = cancel.cancelled() => return None,
                () = &mut notified => {}
                () = sleep_until(next_retry_at.unwrap_or_else(Instant::now)), if next_retry_at.is_some() => {}
            }
        }
    }

    /// Put a claimed batch back to be retried no earlier than `ready_at`.
    pub fn requeue(&self, claimed: ClaimedBatch, ready_at: Instant) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.retry.push(RetryEntry { ready_at, claimed });
        drop(state);
        self.work.notify_waiters();
    }

    /// Release a batch that reached its terminal outcome.
    pub fn complete(&self, claimed: ClaimedBatch) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.budget.release(claimed.batch.byte_size());
        drop(state);
        self.space.notify_waiters();
        self.work.notify_waiters();
    }

    /// Stop expecting new batches. Workers exit once everything is delivered.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.work.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Claim every batch no worker holds, due or not.
    ///
    /// Used at shutdown to report undelivered batches; each one must still be
    /// passed to [`BufferManager::complete`].
    pub fn claim_remaining(&self) -> Vec<ClaimedBatch> {
        let mut state = self.state.lock();
        let mut claimed: Vec<ClaimedBatch> = state
            .retry
            .drain(..)
            .map(|entry| entry.claimed)
            .collect();
        claimed.extend(state.ready.drain(..).map(ClaimedBatch::new));
        state.in_flight += claimed.len();
        claimed
    }

    pub fn used_bytes(&self) -> usize {
        self.state.lock().budget.used()
    }

    pub fn metrics(&self) -> BufferMetrics {
        let state = self.state.lock();
        BufferMetrics {
            capacity: state.budget.capacity(),
            used_bytes: state.budget.used(),
            total_reserved_bytes: state.budget.total_reserved(),
            total_released_bytes: state.budget.total_released(),
            ready_batches: state.ready.len(),
            retry_batches: state.retry.len(),
            in_flight_batches: state.in_flight,
            enqueued_batches: state.enqueued_batches,
            dropped_batches: state.dropped_batches,
            dropped_records: state.dropped_records,
            pressure: state.budget.pressure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{OpenBatch, SealReason};
    use crate::domain::{Field, Record};

    fn batch(destination: &str, sizes: &[usize]) -> Batch {
        let mut open = OpenBatch::new(destination, 1);
        for (n, size) in sizes.iter().enumerate() {
            let record = Record::new(n as i64 + 1, vec![Field::new("n", n.to_string())]).unwrap();
            open.push(record, *size);
        }
        open.seal(SealReason::Flush)
    }

    fn enqueue(buffer: &BufferManager, batch: Batch) -> Result<(), ProducerError> {
        let reservation = buffer.reserve(batch.byte_size())?;
        buffer.push(batch, reservation);
        Ok(())
    }

    #[tokio::test]
    async fn test_fifo_claim_and_release() {
        let buffer = BufferManager::new(1_000, BackpressurePolicy::Block);
        let first = batch("a", &[100]);
        let second = batch("a", &[200]);
        let first_id = first.id().to_string();
        enqueue(&buffer, first).unwrap();
        enqueue(&buffer, second).unwrap();

        let cancel = CancellationToken::new();
        let claimed = buffer.dequeue_next(&cancel).await.unwrap();
        assert_eq!(claimed.batch().id(), first_id);
        assert_eq!(buffer.metrics().in_flight_batches, 1);
        assert_eq!(buffer.used_bytes(), 300);

        buffer.complete(claimed);
        let metrics = buffer.metrics();
        assert_eq!(metrics.used_bytes, 200);
        assert_eq!(
            metrics.total_reserved_bytes - metrics.total_released_bytes,
            metrics.used_bytes as u64
        );
    }

    #[test]
    fn test_reject_when_full() {
        let buffer = BufferManager::new(250, BackpressurePolicy::RejectNewest);
        enqueue(&buffer, batch("a", &[200])).unwrap();

        let err = buffer.reserve(100).unwrap_err();
        assert_eq!(
            err,
            ProducerError::BufferFull {
                requested: 100,
                used: 200,
                capacity: 250
            }
        );
    }

    #[test]
    fn test_drop_oldest_evicts_and_counts() {
        let buffer = BufferManager::new(300, BackpressurePolicy::DropOldest);
        enqueue(&buffer, batch("a", &[100, 50])).unwrap();
        enqueue(&buffer, batch("a", &[100])).unwrap();

        enqueue(&buffer, batch("a", &[120])).unwrap();
        let metrics = buffer.metrics();
        assert_eq!(metrics.dropped_batches, 1);
        assert_eq!(metrics.dropped_records, 2);
        assert_eq!(metrics.ready_batches, 2);
        assert_eq!(metrics.used_bytes, 220);
    }

    #[tokio::test]
    async fn test_drop_oldest_never_evicts_claimed_batches() {
        let buffer = BufferManager::new(200, BackpressurePolicy::DropOldest);
        enqueue(&buffer, batch("a", &[150])).unwrap();
        let cancel = CancellationToken::new();
        let _claimed = buffer.dequeue_next(&cancel).await.unwrap();

        assert!(matches!(
            buffer.reserve(100),
            Err(ProducerError::BufferFull { .. })
        ));
        assert_eq!(buffer.metrics().dropped_batches, 0);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_queue_when_eviction_cannot_help() {
        let buffer = BufferManager::new(300, BackpressurePolicy::DropOldest);
        enqueue(&buffer, batch("a", &[250])).unwrap();
        let cancel = CancellationToken::new();
        let _claimed = buffer.dequeue_next(&cancel).await.unwrap();
        enqueue(&buffer, batch("a", &[40])).unwrap();

        let err = buffer.reserve(100).unwrap_err();
        assert_eq!(
            err,
            ProducerError::BufferFull {
                requested: 100,
                used: 290,
                capacity: 300
            }
        );
        let metrics = buffer.metrics();
        assert_eq!(metrics.dropped_batches, 0);
        assert_eq!(metrics.ready_batches, 1);
        assert_eq!(metrics.used_bytes, 290);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_wakes_space_waiter() {
        let buffer = Arc::new(BufferManager::new(100, BackpressurePolicy::Block));
        enqueue(&buffer, batch("a", &[100])).unwrap();
        let cancel = CancellationToken::new();
        let claimed = buffer.dequeue_next(&cancel).await.unwrap();

        let waiter = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let started = Instant::now();
                buffer.wait_for_space(started + Duration::from_secs(10)).await;
                started.elapsed()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.complete(claimed);

        let waited = waiter.await.unwrap();
        assert!(waited < SPACE_POLL_INTERVAL, "woke after {waited:?}");
        assert!(buffer.reserve(100).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_until_ready() {
        let buffer = BufferManager::new(1_000, BackpressurePolicy::Block);
        enqueue(&buffer, batch("a", &[10])).unwrap();
        let cancel = CancellationToken::new();

        let mut claimed = buffer.dequeue_next(&cancel).await.unwrap();
        claimed.begin_attempt();
        let ready_at = Instant::now() + Duration::from_millis(500);
        buffer.requeue(claimed, ready_at);
        assert_eq!(buffer.used_bytes(), 10);

        let retried = buffer.dequeue_next(&cancel).await.unwrap();
        assert!(Instant::now() >= ready_at);
        assert_eq!(retried.attempts(), 1);
    }

    #[tokio::test]
    async fn test_closed_and_drained_returns_none() {
        let buffer = BufferManager::new(1_000, BackpressurePolicy::Block);
        enqueue(&buffer, batch("a", &[10])).unwrap();
        buffer.close();

        let cancel = CancellationToken::new();
        let claimed = buffer.dequeue_next(&cancel).await.unwrap();
        buffer.complete(claimed);
        assert!(buffer.dequeue_next(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_wakes_idle_worker() {
        let buffer = BufferManager::new(1_000, BackpressurePolicy::Block);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(buffer.dequeue_next(&cancel).await.is_none());
    }

    #[test]
    fn test_claim_remaining_keeps_bytes_until_complete() {
        let buffer = BufferManager::new(1_000, BackpressurePolicy::Block);
        enqueue(&buffer, batch("a", &[10])).unwrap();
        enqueue(&buffer, batch("b", &[20])).unwrap();

        let remaining = buffer.claim_remaining();
        assert_eq!(remaining.len(), 2);
        assert_eq!(buffer.metrics().in_flight_batches, 2);
        assert_eq!(buffer.used_bytes(), 30);

        for claimed in remaining {
            buffer.complete(claimed);
        }
        let metrics = buffer.metrics();
        assert_eq!(metrics.used_bytes, 0);
        assert_eq!(metrics.in_flight_batches, 0);
        assert_eq!(metrics.total_reserved_bytes, metrics.total_released_bytes);
    }
}
