use super::producer::Producer;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Caller-owned set of named producers.
#[derive(Debug, Default)]
pub struct ProducerRegistry {
    producers: RwLock<HashMap<String, Producer>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `producer` under `name`, returning the one it replaces.
    pub fn insert(&self, name: impl Into<String>, producer: Producer) -> Option<Producer> {
        self.producers.write().insert(name.into(), producer)
    }

    pub fn get(&self, name: &str) -> Option<Producer> {
        self.producers.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Producer> {
        self.producers.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.producers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.producers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.read().is_empty()
    }

    /// Destroy and remove every producer, each with its own `timeout`.
    pub async fn destroy_all(&self, timeout: Duration) {
        let producers: Vec<(String, Producer)> = self.producers.write().drain().collect();
        info!(count = producers.len(), "Destroying registered producers");

        let mut destroys = tokio::task::JoinSet::new();
        for (name, producer) in producers {
            destroys.spawn(async move {
                if let Err(e) = producer.destroy(timeout).await {
                    warn!(producer = %name, "Destroy skipped: {e}");
                }
            });
        }
        while let Some(joined) = destroys.join_next().await {
            if let Err(e) = joined {
                warn!("Producer destroy task failed: {e}");
            }
        }
    }
}
