use crate::buffer::{BufferMetrics, SealReason};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Nearest-rank percentile over sorted samples.
fn calculate_percentile(sorted_samples: &[Duration], percentile: f64) -> Duration {
    if sorted_samples.is_empty() {
        return Duration::ZERO;
    }

    let percentile = percentile.clamp(0.0, 1.0);
    let last = sorted_samples.len() - 1;
    let index = ((percentile * last as f64).floor() as usize).min(last);

    sorted_samples[index]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SealCounts {
    pub byte_limit: u64,
    pub count_limit: u64,
    pub age: u64,
    pub flush: u64,
    pub shutdown: u64,
}

impl SealCounts {
    pub fn total(&self) -> u64 {
        self.byte_limit + self.count_limit + self.age + self.flush + self.shutdown
    }
}

/// Point-in-time view of producer activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub batches_sealed: SealCounts,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub records_delivered: u64,
    pub attempts: u64,
    pub retries: u64,
    pub compression_fallbacks: u64,
    pub raw_bytes_sent: u64,
    pub compressed_bytes_sent: u64,
    pub average_latency: Duration,
    pub p95_latency: Duration,
    pub p99_latency: Duration,
    pub buffer: BufferMetrics,
}

impl MetricsSnapshot {
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_bytes_sent == 0 {
            1.0
        } else {
            self.compressed_bytes_sent as f64 / self.raw_bytes_sent as f64
        }
    }
}

/// Lock-free counters shared by the assembler, the workers and the producer.
#[derive(Debug, Default)]
pub struct ProducerMetrics {
    records_accepted: AtomicU64,
    records_rejected: AtomicU64,
    sealed_byte_limit: AtomicU64,
    sealed_count_limit: AtomicU64,
    sealed_age: AtomicU64,
    sealed_flush: AtomicU64,
    sealed_shutdown: AtomicU64,
    batches_delivered: AtomicU64,
    batches_failed: AtomicU64,
    records_delivered: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    compression_fallbacks: AtomicU64,
    raw_bytes_sent: AtomicU64,
    compressed_bytes_sent: AtomicU64,
    latency_samples: Mutex<VecDeque<Duration>>,
}

impl ProducerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.records_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_seal(&self, reason: SealReason) {
        let counter = match reason {
            SealReason::ByteLimit => &self.sealed_byte_limit,
            SealReason::CountLimit => &self.sealed_count_limit,
            SealReason::Age => &self.sealed_age,
            SealReason::Flush => &self.sealed_flush,
            SealReason::Shutdown => &self.sealed_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression_fallback(&self) {
        self.compression_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// One delivery attempt finished, successfully or not.
    pub fn record_attempt(&self, latency: Duration, raw_bytes: usize, compressed_bytes: usize) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.raw_bytes_sent
            .fetch_add(raw_bytes as u64, Ordering::Relaxed);
        self.compressed_bytes_sent
            .fetch_add(compressed_bytes as u64, Ordering::Relaxed);

        let mut samples = self.latency_samples.lock();
        samples.push_back(latency);
        if samples.len() > MAX_LATENCY_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, records: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, buffer: BufferMetrics) -> MetricsSnapshot {
        let (average_latency, p95_latency, p99_latency) = {
            let samples = self.latency_samples.lock();
            let mut sorted: Vec<Duration> = samples.iter().copied().collect();
            drop(samples);
            sorted.sort();

            let average = if sorted.is_empty() {
                Duration::ZERO
            } else {
                let total: Duration = sorted.iter().sum();
                total / sorted.len() as u32
            };
            (
                average,
                calculate_percentile(&sorted, 0.95),
                calculate_percentile(&sorted, 0.99),
            )
        };

        MetricsSnapshot {
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            batches_sealed: SealCounts {
                byte_limit: self.sealed_byte_limit.load(Ordering::Relaxed),
                count_limit: self.sealed_count_limit.load(Ordering::Relaxed),
                age: self.sealed_age.load(Ordering::Relaxed),
                flush: self.sealed_flush.load(Ordering::Relaxed),
                shutdown: self.sealed_shutdown.load(Ordering::Relaxed),
            },
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            compression_fallbacks: self.compression_fallbacks.load(Ordering::Relaxed),
            raw_bytes_sent: self.raw_bytes_sent.load(Ordering::Relaxed),
            compressed_bytes_sent: self.compressed_bytes_sent.load(Ordering::Relaxed),
            average_latency,
            p95_latency,
            p99_latency,
            buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BackpressurePolicy, BufferManager};

    #[test]
    fn test_percentile_bounds() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(calculate_percentile(&samples, 0.0), Duration::from_millis(1));
        assert_eq!(calculate_percentile(&samples, 0.95), Duration::from_millis(95));
        assert_eq!(calculate_percentile(&samples, 1.5), Duration::from_millis(100));
        assert_eq!(calculate_percentile(&[], 0.5), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_counts() {
        let metrics = ProducerMetrics::new();
        metrics.record_accepted();
        metrics.record_accepted();
        metrics.record_rejected();
        metrics.record_seal(SealReason::Age);
        metrics.record_seal(SealReason::CountLimit);
        metrics.record_attempt(Duration::from_millis(10), 1000, 250);
        metrics.record_attempt(Duration::from_millis(30), 1000, 250);
        metrics.record_retry();
        metrics.record_delivered(5);

        let buffer = BufferManager::new(1024, BackpressurePolicy::Block);
        let snapshot = metrics.snapshot(buffer.metrics());
        assert_eq!(snapshot.records_accepted, 2);
        assert_eq!(snapshot.records_rejected, 1);
        assert_eq!(snapshot.batches_sealed.total(), 2);
        assert_eq!(snapshot.batches_sealed.age, 1);
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.records_delivered, 5);
        assert_eq!(snapshot.average_latency, Duration::from_millis(20));
        assert!((snapshot.compression_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(snapshot.buffer.capacity, 1024);
    }

    #[test]
    fn test_latency_samples_are_capped() {
        let metrics = ProducerMetrics::new();
        for _ in 0..(MAX_LATENCY_SAMPLES + 10) {
            metrics.record_attempt(Duration::from_millis(1), 1, 1);
        }
        assert_eq!(metrics.latency_samples.lock().len(), MAX_LATENCY_SAMPLES);
    }
}
