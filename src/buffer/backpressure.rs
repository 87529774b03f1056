use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What happens when a sealed batch does not fit in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Suspend the caller until space frees up, bounded by the enqueue timeout.
    #[default]
    Block,
    /// Fail the post immediately with `BufferFull`.
    RejectNewest,
    /// Evict the oldest queued batches to make room; evictions are counted.
    DropOldest,
}

impl BackpressurePolicy {
    pub fn waits_for_space(self) -> bool {
        matches!(self, BackpressurePolicy::Block)
    }
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpressurePolicy::Block => write!(f, "block"),
            BackpressurePolicy::RejectNewest => write!(f, "reject_newest"),
            BackpressurePolicy::DropOldest => write!(f, "drop_oldest"),
        }
    }
}

impl FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "block" => Ok(BackpressurePolicy::Block),
            "reject_newest" | "reject" => Ok(BackpressurePolicy::RejectNewest),
            "drop_oldest" | "drop" => Ok(BackpressurePolicy::DropOldest),
            other => Err(format!("unknown backpressure policy '{other}'")),
        }
    }
}
