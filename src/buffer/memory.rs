use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemoryPressure {
    None,
    Warning,
    Critical,
}

const WARNING_THRESHOLD: f64 = 0.8;
const CRITICAL_THRESHOLD: f64 = 0.95;

/// Byte accounting for the pending buffer.
///
/// Lives inside the buffer's lock; `total_reserved - total_released == used`
/// holds whenever the lock is not held.
#[derive(Debug)]
pub struct ByteBudget {
    capacity: usize,
    used: usize,
    total_reserved: u64,
    total_released: u64,
}

impl ByteBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            total_reserved: 0,
            total_released: 0,
        }
    }

    pub fn fits(&self, bytes: usize) -> bool {
        self.used.saturating_add(bytes) <= self.capacity
    }

    /// Reserve `bytes` if they fit. Returns whether the reservation was made.
    pub fn try_reserve(&mut self, bytes: usize) -> bool {
        if !self.fits(bytes) {
            return false;
        }
        self.used += bytes;
        self.total_reserved += bytes as u64;
        true
    }

    pub fn release(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.used, "released more bytes than reserved");
        let bytes = bytes.min(self.used);
        self.used -= bytes;
        self.total_released += bytes as u64;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }

    pub fn total_reserved(&self) -> u64 {
        self.total_reserved
    }

    pub fn total_released(&self) -> u64 {
        self.total_released
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.used as f64 / self.capacity as f64
    }

    pub fn pressure(&self) -> MemoryPressure {
        let ratio = self.usage_ratio();
        if ratio >= CRITICAL_THRESHOLD {
            MemoryPressure::Critical
        } else if ratio >= WARNING_THRESHOLD {
            MemoryPressure::Warning
        } else {
            MemoryPressure::None
        }
    }
}
