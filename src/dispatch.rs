//! Hands terminal delivery results to the caller.
//!
//! Results are dispatched from sender worker tasks, possibly several at once,
//! so callbacks must be `Send + Sync` and cheap. Callers that prefer to consume
//! results on their own task can [`ResultDispatcher::subscribe`] instead.

use crate::domain::DeliveryResult;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::error;

/// Receives every terminal result exactly once.
pub trait DeliveryCallback: Send + Sync {
    fn on_result(&self, result: &DeliveryResult);
}

impl<F> DeliveryCallback for F
where
    F: Fn(&DeliveryResult) + Send + Sync,
{
    fn on_result(&self, result: &DeliveryResult) {
        self(result);
    }
}

#[derive(Default)]
pub struct ResultDispatcher {
    callback: Option<Arc<dyn DeliveryCallback>>,
    subscribers: Mutex<Vec<UnboundedSender<DeliveryResult>>>,
    dispatched: AtomicU64,
    callback_panics: AtomicU64,
}

impl std::fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("has_callback", &self.callback.is_some())
            .field("subscribers", &self.subscribers.lock().len())
            .field("dispatched", &self.dispatched.load(Ordering::Relaxed))
            .finish()
    }
}

impl ResultDispatcher {
    pub fn new(callback: Option<Arc<dyn DeliveryCallback>>) -> Self {
        Self {
            callback,
            ..Self::default()
        }
    }

    /// Open a channel that receives every result dispatched from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<DeliveryResult> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn dispatch(&self, result: DeliveryResult) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        if let Some(callback) = &self.callback {
            // A panicking callback must not take the worker down with it.
            if catch_unwind(AssertUnwindSafe(|| callback.on_result(&result))).is_err() {
                self.callback_panics.fetch_add(1, Ordering::Relaxed);
                error!(
                    destination = %result.destination,
                    batch_id = %result.batch_id,
                    "Delivery callback panicked"
                );
            }
        }

        let mut subscribers = self.subscribers.lock();
        if !subscribers.is_empty() {
            subscribers.retain(|tx| tx.send(result.clone()).is_ok());
        }
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn callback_panics(&self) -> u64 {
        self.callback_panics.load(Ordering::Relaxed)
    }
}
