//! Topic Manager (spec.md §4.5): owns the topic registry and the
//! failed-peer outbound channel, mediates every subscribe/publish/register
//! operation, and drives the persist-watcher side channel.

use crate::error::{BrokerError, StorageError};
use crate::session::ClientSession;
use crate::storage::{StorageBackend, StoredValue};
use crate::topic::{shapes_match, Topic};
use crate::wire::{Delivery, PersistError, SchemaDescriptor, TopicDescriptor};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{Duration, Instant};

/// Capacity of the failed-peer channel (spec.md §4.5); a full channel drops
/// the event with a warning rather than blocking the fan-out path.
pub const FAILED_PEER_CHANNEL_CAPACITY: usize = 100;

/// Per-publish persistence deadline (spec.md §4.6/§9).
pub const PERSIST_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a successful `registerTopic`, or one of the two failure modes
/// the broker server maps to an HTTP-style error (spec.md §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregisterTopicError {
    TopicNotFound(String),
    StoragePartial(String),
}

impl UnregisterTopicError {
    pub fn message(&self) -> String {
        match self {
            Self::TopicNotFound(name) => format!("topic not found: {name}"),
            Self::StoragePartial(detail) => {
                format!("in-memory state was updated but storage delete failed: {detail}")
            }
        }
    }
}

/// Result of a publish/sendWithoutSave call: the frame already fanned out,
/// and how many recipients were observed to have a closed socket.
pub struct PublishOutcome {
    pub delivery: Delivery,
    pub failed_peers: usize,
}

pub struct TopicManager {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    storage: Arc<dyn StorageBackend>,
    failed_peers_tx: mpsc::Sender<String>,
    /// Count of failed-peer events dropped because the channel was full or
    /// closed (spec.md §4.5). Logging-only; no wire surface exposes it.
    dropped_failed_peer_events: AtomicU64,
}

impl TopicManager {
    pub fn new(storage: Arc<dyn StorageBackend>) -> (Self, mpsc::Receiver<String>) {
        let (failed_peers_tx, failed_peers_rx) = mpsc::channel(FAILED_PEER_CHANNEL_CAPACITY);
        (
            Self {
                topics: RwLock::new(HashMap::new()),
                storage,
                failed_peers_tx,
                dropped_failed_peer_events: AtomicU64::new(0),
            },
            failed_peers_rx,
        )
    }

    /// Number of failed-peer events dropped so far because the channel was
    /// full or closed. Logging/diagnostics only.
    pub fn dropped_failed_peer_events(&self) -> u64 {
        self.dropped_failed_peer_events.load(Ordering::Relaxed)
    }

    /// Create-or-reconcile (spec.md §4.5). A brand-new topic is just the
    /// idempotent case of the create: version 0 stored under `name` always
    /// matches itself.
    pub async fn register_topic(&self, name: &str, shape: Value) -> Result<TopicDescriptor, BrokerError> {
        let existing = self.topics.read().await.get(name).cloned();
        let topic = match existing {
            Some(topic) => topic,
            None => {
                let candidate = Arc::new(Topic::new(name.to_owned(), shape.clone()));
                let mut topics = self.topics.write().await;
                topics.entry(name.to_owned()).or_insert(candidate).clone()
            }
        };
        self.reconcile_schema(&topic, name, shape).await
    }

    async fn reconcile_schema(
        &self,
        topic: &Arc<Topic>,
        name: &str,
        shape: Value,
    ) -> Result<TopicDescriptor, BrokerError> {
        match topic.get_latest_schema().await {
            Ok(latest) if shapes_match(&latest.schema, &shape) => Ok(TopicDescriptor {
                name: name.to_owned(),
                schema: latest,
            }),
            Ok(_) => Err(BrokerError::TopicAlreadyExistsWithDifferentSchema(name.to_owned())),
            Err(_) => {
                let version = topic.update_schema(shape.clone()).await;
                Ok(TopicDescriptor {
                    name: name.to_owned(),
                    schema: SchemaDescriptor { version, schema: shape },
                })
            }
        }
    }

    async fn lookup(&self, name: &str) -> Result<Arc<Topic>, BrokerError> {
        self.topics
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_owned()))
    }

    pub async fn subscribe(&self, name: &str, session: Arc<ClientSession>) -> Result<(), BrokerError> {
        self.lookup(name).await?.subscribe(session).await;
        Ok(())
    }

    pub async fn unsubscribe(&self, name: &str, session_id: &str) -> Result<(), BrokerError> {
        self.lookup(name).await?.unsubscribe(session_id).await
    }

    /// Snapshots the topic list under the registry lock, then releases it
    /// before touching any topic lock (spec.md §5 L3).
    pub async fn unsubscribe_all(&self, session_id: &str) {
        let topics: Vec<Arc<Topic>> = self.topics.read().await.values().cloned().collect();
        for topic in topics {
            let _ = topic.unsubscribe(session_id).await;
        }
    }

    pub async fn list_topics(&self) -> Vec<TopicDescriptor> {
        let topics: Vec<Arc<Topic>> = self.topics.read().await.values().cloned().collect();
        let mut descriptors = Vec::with_capacity(topics.len());
        for topic in topics {
            if let Ok(schema) = topic.get_latest_schema().await {
                descriptors.push(TopicDescriptor {
                    name: topic.name.clone(),
                    schema,
                });
            }
        }
        descriptors
    }

    pub async fn update_schema(&self, name: &str, shape: Value) -> Result<u64, BrokerError> {
        Ok(self.lookup(name).await?.update_schema(shape).await)
    }

    pub async fn is_schema_match(&self, name: &str, value: &Value) -> Result<bool, BrokerError> {
        let topic = self.lookup(name).await?;
        let latest = topic.get_latest_schema().await?;
        Ok(shapes_match(&latest.schema, value))
    }

    pub async fn get(&self, name: &str) -> Result<Option<StoredValue>, StorageError> {
        self.storage.get(name).await
    }

    /// Removes the topic entry under the registry lock first; the storage
    /// delete happens outside it, so a delete failure still leaves the
    /// in-memory removal standing (spec.md §4.5).
    pub async fn unregister_topic(&self, name: &str) -> Result<(), UnregisterTopicError> {
        let removed = self.topics.write().await.remove(name);
        if removed.is_none() {
            return Err(UnregisterTopicError::TopicNotFound(name.to_owned()));
        }
        self.storage
            .delete(name)
            .await
            .map_err(|e| UnregisterTopicError::StoragePartial(e.to_string()))
    }

    /// Shared core behind `publish` and `sendWithoutSave`: `persist` selects
    /// whether the value is written through to storage (spec.md §4.5).
    #[allow(clippy::too_many_arguments)]
    pub async fn publish(
        &self,
        request_id: &str,
        action: &str,
        topic_name: &str,
        sender: &Arc<ClientSession>,
        value: Value,
        self_deliver: bool,
        persist: bool,
    ) -> Result<PublishOutcome, BrokerError> {
        let topic = self.lookup(topic_name).await?;

        let persist_rx = if persist {
            let timestamp_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
            let deadline = Instant::now() + PERSIST_TIMEOUT;
            Some(
                self.storage
                    .async_put(topic_name.to_owned(), value.clone(), timestamp_ns, deadline)
                    .await,
            )
        } else {
            None
        };

        let delivery = Delivery {
            id: request_id.to_owned(),
            action: action.to_owned(),
            topic: topic_name.to_owned(),
            data: value,
        };

        let exclude = if self_deliver { None } else { Some(sender.id.as_str()) };
        let failed = topic.publish(&delivery, exclude).await;
        for session_id in &failed {
            self.report_failed_peer(session_id.clone()).await;
        }

        if let Some(rx) = persist_rx {
            self.spawn_persist_watcher(request_id.to_owned(), action.to_owned(), sender.clone(), rx);
        }

        Ok(PublishOutcome {
            delivery,
            failed_peers: failed.len(),
        })
    }

    /// A clone of the failed-peer sender, for the broker server to post its
    /// own direct-send failures onto the same channel the cleanup loop
    /// drains (spec.md §4.7).
    pub fn failed_peer_sender(&self) -> mpsc::Sender<String> {
        self.failed_peers_tx.clone()
    }

    async fn report_failed_peer(&self, session_id: String) {
        if self.failed_peers_tx.try_send(session_id).is_err() {
            let dropped = self.dropped_failed_peer_events.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped_total = dropped, "failed-peer channel full or closed; dropping event");
        }
    }

    /// Races the storage ack against an independent 2-second timer, so a
    /// write that finally lands after the deadline is logged, not delivered
    /// (spec.md §7).
    fn spawn_persist_watcher(
        &self,
        id: String,
        action: String,
        sender: Arc<ClientSession>,
        rx: oneshot::Receiver<Result<(), StorageError>>,
    ) {
        tokio::spawn(async move {
            let message = match tokio::time::timeout(PERSIST_TIMEOUT, rx).await {
                Ok(Ok(Ok(()))) => return,
                Ok(Ok(Err(e))) => e.to_string(),
                Ok(Err(_)) => {
                    tracing::warn!(request_id = %id, "persist watcher's reply channel dropped");
                    return;
                }
                Err(_) => {
                    tracing::warn!(request_id = %id, "persistence ack arrived after the watcher deadline");
                    StorageError::PersistTimeout.to_string()
                }
            };
            let frame = PersistError::new(id, action, message);
            let _ = sender.send_json(&frame).await;
        });
    }
}
