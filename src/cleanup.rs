//! Failed-peer cleanup loop (spec.md §4.7): the only consumer of the Topic
//! Manager's failed-peer channel. Counts are private to this loop and never
//! decremented except by eviction.

use crate::manager::TopicManager;
use crate::session_registry::SessionRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

/// How often the counter map is swept for sessions at/above the threshold.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default failure count at which a session is evicted.
pub const DEFAULT_EVICTION_THRESHOLD: u32 = 3;

pub struct CleanupLoop {
    manager: Arc<TopicManager>,
    registry: Arc<SessionRegistry>,
    threshold: u32,
}

impl CleanupLoop {
    pub fn new(manager: Arc<TopicManager>, registry: Arc<SessionRegistry>) -> Self {
        Self::with_threshold(manager, registry, DEFAULT_EVICTION_THRESHOLD)
    }

    pub fn with_threshold(manager: Arc<TopicManager>, registry: Arc<SessionRegistry>, threshold: u32) -> Self {
        Self {
            manager,
            registry,
            threshold,
        }
    }

    /// Consumes `failed_peers` on a dedicated task until the channel closes
    /// (i.e. the Topic Manager and the broker server both dropped their
    /// senders during shutdown).
    pub fn spawn(self, mut failed_peers: mpsc::Receiver<String>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut counters: HashMap<String, u32> = HashMap::new();
            let mut sweep = interval(SWEEP_INTERVAL);
            // The first tick fires immediately; skip it so the loop's first
            // real sweep happens a full interval after startup.
            sweep.tick().await;

            loop {
                tokio::select! {
                    maybe_id = failed_peers.recv() => {
                        match maybe_id {
                            Some(id) => {
                                *counters.entry(id).or_insert(0) += 1;
                            }
                            None => break,
                        }
                    }
                    _ = sweep.tick() => {
                        self.evict_above_threshold(&mut counters).await;
                    }
                }
            }
        })
    }

    async fn evict_above_threshold(&self, counters: &mut HashMap<String, u32>) {
        let evicted: Vec<String> = counters
            .iter()
            .filter(|&(_, &count)| count >= self.threshold)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &evicted {
            self.manager.unsubscribe_all(id).await;
            let session = self.registry.remove(id).await;
            if let Some(session) = session {
                session.close().await;
            }
            counters.remove(id);
            tracing::warn!(client_id = %id, "evicted session after repeated failed sends");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NoopStorage;

    #[tokio::test]
    async fn counters_below_threshold_are_not_evicted() {
        let (manager, _failed_peers_rx) = TopicManager::new(Arc::new(NoopStorage::open()));
        let manager = Arc::new(manager);
        let registry = Arc::new(SessionRegistry::new());
        let cleanup = CleanupLoop::with_threshold(manager, registry, 3);

        let mut counters = HashMap::new();
        counters.insert("s1".to_owned(), 2);
        cleanup.evict_above_threshold(&mut counters).await;
        assert_eq!(counters.get("s1"), Some(&2));
    }

    #[tokio::test]
    async fn counters_at_threshold_are_evicted_and_cleared() {
        let (manager, _failed_peers_rx) = TopicManager::new(Arc::new(NoopStorage::open()));
        let manager = Arc::new(manager);
        let registry = Arc::new(SessionRegistry::new());
        let cleanup = CleanupLoop::with_threshold(manager, registry, 3);

        let mut counters = HashMap::new();
        counters.insert("s1".to_owned(), 3);
        counters.insert("s2".to_owned(), 1);
        cleanup.evict_above_threshold(&mut counters).await;
        assert!(!counters.contains_key("s1"));
        assert_eq!(counters.get("s2"), Some(&1));
    }
}
