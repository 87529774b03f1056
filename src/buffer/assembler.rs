use super::batch::{Batch, BatchLimits, OpenBatch, SealReason};
use super::queue::BufferManager;
use crate::domain::{ProducerError, Record};
use crate::sender::{BatchSerializer, ProducerMetrics};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A record the assembler could not take, handed back with the reason.
#[derive(Debug)]
pub struct Rejection {
    pub record: Record,
    pub error: ProducerError,
}

#[derive(Debug, Default)]
struct Slot {
    open: Option<OpenBatch>,
    /// Age timer of `open`; cancelled once the batch leaves the slot.
    timer: Option<CancellationToken>,
}

impl Slot {
    fn take_open(&mut self) -> Option<OpenBatch> {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.open.take()
    }
}

/// Accumulates records into per-destination batches and seals them into the
/// buffer when a limit is hit, the batch ages out, or on flush/shutdown.
///
/// Lock order is slot, then buffer. A record is only ever moved into a sealed
/// batch after its bytes are reserved, so a full buffer leaves the open batch
/// untouched.
#[derive(Debug)]
pub struct BatchAssembler {
    limits: BatchLimits,
    serializer: BatchSerializer,
    buffer: Arc<BufferManager>,
    metrics: Arc<ProducerMetrics>,
    slots: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
    closed: AtomicBool,
    timers: CancellationToken,
    next_generation: AtomicU64,
}

impl BatchAssembler {
    pub fn new(
        limits: BatchLimits,
        serializer: BatchSerializer,
        buffer: Arc<BufferManager>,
        metrics: Arc<ProducerMetrics>,
    ) -> Self {
        Self {
            limits,
            serializer,
            buffer,
            metrics,
            slots: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            timers: CancellationToken::new(),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Add a record to the open batch of `destination`.
    ///
    /// Seals the open batch first when the record would overflow it. Must be
    /// called from within a tokio runtime: starting a batch arms its age timer.
    pub fn append(self: &Arc<Self>, destination: &str, record: Record) -> Result<(), Rejection> {
        let record_size = self.serializer.record_size(&record);
        if record_size > self.limits.max_bytes {
            return Err(Rejection {
                record,
                error: ProducerError::RecordTooLarge {
                    size: record_size,
                    limit: self.limits.max_bytes,
                },
            });
        }

        let slot = self.slot_or_insert(destination);
        let mut slot = slot.lock();

        if self.is_closed() {
            return Err(Rejection {
                record,
                error: ProducerError::NotRunning,
            });
        }

        let seal_reason = slot
            .open
            .as_ref()
            .and_then(|open| open.seal_needed_for(record_size, &self.limits));
        if let Some(reason) = seal_reason {
            if let Err(error) = self.seal_into_buffer(&mut slot, reason) {
                return Err(Rejection { record, error });
            }
        }

        let Slot { open, timer } = &mut *slot;
        let open = open.get_or_insert_with(|| {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
            let open = OpenBatch::new(destination, generation);
            let token = self.timers.child_token();
            self.spawn_age_timer(
                destination,
                generation,
                open.created_at() + self.limits.max_age,
                token.clone(),
            );
            *timer = Some(token);
            open
        });
        open.push(record, record_size);

        let full = open.len() >= self.limits.max_count || open.byte_size() >= self.limits.max_bytes;
        if full {
            let reason = if open.len() >= self.limits.max_count {
                SealReason::CountLimit
            } else {
                SealReason::ByteLimit
            };
            // Best effort: a full buffer leaves the batch open for the next post.
            if let Err(error) = self.seal_into_buffer(&mut slot, reason) {
                debug!(destination, %error, "Deferred sealing of full batch");
            }
        }

        Ok(())
    }

    /// Seal the open batch of `destination`, if any.
    pub fn seal_destination(&self, destination: &str, reason: SealReason) -> Result<(), ProducerError> {
        let Some(slot) = self.slot(destination) else {
            return Ok(());
        };
        let mut slot = slot.lock();
        self.seal_into_buffer(&mut slot, reason)
    }

    pub fn destinations(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Records and bytes sitting in open batches.
    pub fn open_totals(&self) -> (usize, usize) {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        slots.iter().fold((0, 0), |(records, bytes), slot| {
            let slot = slot.lock();
            match &slot.open {
                Some(open) => (records + open.len(), bytes + open.byte_size()),
                None => (records, bytes),
            }
        })
    }

    /// Stop accepting records and seal every open batch.
    ///
    /// Batches that fit are queued; the rest are returned sealed but without a
    /// reservation, for the caller to queue or abandon.
    pub fn close_and_seal_all(&self) -> Vec<Batch> {
        self.closed.store(true, Ordering::SeqCst);
        self.timers.cancel();

        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        let mut leftovers = Vec::new();
        for slot in slots {
            let mut slot = slot.lock();
            match self.seal_into_buffer(&mut slot, SealReason::Shutdown) {
                Ok(()) => {}
                Err(error) => {
                    if let Some(open) = slot.take_open() {
                        debug!(%error, "Open batch did not fit in buffer during shutdown");
                        self.metrics.record_seal(SealReason::Shutdown);
                        leftovers.push(open.seal(SealReason::Shutdown));
                    }
                }
            }
        }
        leftovers
    }

    fn slot(&self, destination: &str) -> Option<Arc<Mutex<Slot>>> {
        self.slots.read().get(destination).cloned()
    }

    fn slot_or_insert(&self, destination: &str) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slot(destination) {
            return slot;
        }
        self.slots
            .write()
            .entry(destination.to_string())
            .or_default()
            .clone()
    }

    fn seal_into_buffer(&self, slot: &mut Slot, reason: SealReason) -> Result<(), ProducerError> {
        let Some(bytes) = slot
            .open
            .as_ref()
            .filter(|open| !open.is_empty())
            .map(OpenBatch::byte_size)
        else {
            slot.take_open();
            return Ok(());
        };

        let reservation = self.buffer.reserve(bytes)?;
        if let Some(open) = slot.take_open() {
            let batch = open.seal(reason);
            debug!(
                destination = batch.destination(),
                batch_id = batch.id(),
                records = batch.len(),
                bytes = batch.byte_size(),
                ?reason,
                "Sealed batch"
            );
            self.metrics.record_seal(reason);
            self.buffer.push(batch, reservation);
        }
        Ok(())
    }

    fn spawn_age_timer(
        self: &Arc<Self>,
        destination: &str,
        generation: u64,
        deadline: Instant,
        cancel: CancellationToken,
    ) {
        let assembler = Arc::clone(self);
        let destination = destination.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = sleep_until(deadline) => assembler.seal_expired(&destination, generation, &cancel).await,
            }
        });
    }

    /// Age-timer expiry. Keeps retrying while the buffer is full so a quiet
    /// destination still gets its batch out once space frees up.
    async fn seal_expired(&self, destination: &str, generation: u64, cancel: &CancellationToken) {
        let Some(slot) = self.slot(destination) else {
            return;
        };

        loop {
            {
                let mut slot = slot.lock();
                if self.is_closed() {
                    return;
                }
                match &slot.open {
                    Some(open) if open.generation() == generation => {}
                    _ => return,
                }
                match self.seal_into_buffer(&mut slot, SealReason::Age) {
                    Ok(()) => return,
                    Err(error) => debug!(destination, %error, "Aged batch waiting for buffer space"),
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = self.buffer.wait_for_space(Instant::now() + self.limits.max_age) => {}
            }
        }
    }
}
