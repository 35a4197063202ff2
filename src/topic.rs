//! Topic + Schema Store (spec.md §4.4): per-topic name, versioned schemas,
//! and subscriber set, each guarded by its own lock so that publishing to
//! one topic never blocks registry operations on another.

use crate::error::BrokerError;
use crate::session::ClientSession;
use crate::wire::{Delivery, SchemaDescriptor};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

struct TopicState {
    schemas: BTreeMap<u64, Value>,
    latest_version: u64,
    subscribers: HashSet<String>,
    sessions: std::collections::HashMap<String, Arc<ClientSession>>,
}

/// A named channel with a schema history and a subscriber set.
pub struct Topic {
    pub name: String,
    state: RwLock<TopicState>,
}

impl Topic {
    /// Creates a topic already carrying version 0 of `shape`.
    pub fn new(name: String, shape: Value) -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert(0, shape);
        Self {
            name,
            state: RwLock::new(TopicState {
                schemas,
                latest_version: 0,
                subscribers: HashSet::new(),
                sessions: std::collections::HashMap::new(),
            }),
        }
    }

    /// Idempotent add. Returns `true` if the session was newly subscribed.
    pub async fn subscribe(&self, session: Arc<ClientSession>) -> bool {
        let mut state = self.state.write().await;
        let newly = state.subscribers.insert(session.id.clone());
        state.sessions.insert(session.id.clone(), session);
        newly
    }

    pub async fn unsubscribe(&self, session_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        if !state.subscribers.remove(session_id) {
            return Err(BrokerError::NotSubscribed);
        }
        state.sessions.remove(session_id);
        Ok(())
    }

    pub async fn list_subscribers(&self) -> Vec<String> {
        self.state.read().await.subscribers.iter().cloned().collect()
    }

    pub async fn update_schema(&self, shape: Value) -> u64 {
        let mut state = self.state.write().await;
        let next = state.latest_version + 1;
        state.schemas.insert(next, shape);
        state.latest_version = next;
        next
    }

    /// Self-healing: if `latest_version` points at a missing entry but the
    /// map is non-empty, reseats it to the true maximum key first.
    pub async fn get_latest_schema(&self) -> Result<SchemaDescriptor, BrokerError> {
        {
            let state = self.state.read().await;
            if let Some(shape) = state.schemas.get(&state.latest_version) {
                return Ok(SchemaDescriptor {
                    version: state.latest_version,
                    schema: shape.clone(),
                });
            }
            if state.schemas.is_empty() {
                return Err(BrokerError::NoSchema);
            }
        }
        let mut state = self.state.write().await;
        if let Some(shape) = state.schemas.get(&state.latest_version) {
            return Ok(SchemaDescriptor {
                version: state.latest_version,
                schema: shape.clone(),
            });
        }
        let Some((&max_version, shape)) = state.schemas.iter().next_back() else {
            return Err(BrokerError::NoSchema);
        };
        let shape = shape.clone();
        state.latest_version = max_version;
        Ok(SchemaDescriptor {
            version: max_version,
            schema: shape,
        })
    }

    pub async fn get_schema_by_version(&self, version: u64) -> Result<SchemaDescriptor, BrokerError> {
        let state = self.state.read().await;
        state
            .schemas
            .get(&version)
            .cloned()
            .map(|schema| SchemaDescriptor { version, schema })
            .ok_or(BrokerError::NoSuchVersion(version))
    }

    /// Fans `delivery` out to every subscriber except `exclude` (the
    /// publisher, unless self-delivery was requested). Returns the ids of
    /// sessions whose send reported a closed socket.
    pub async fn publish(&self, delivery: &Delivery, exclude: Option<&str>) -> Vec<String> {
        let recipients: Vec<Arc<ClientSession>> = {
            let state = self.state.read().await;
            state
                .subscribers
                .iter()
                .filter(|id| exclude != Some(id.as_str()))
                .filter_map(|id| state.sessions.get(id).cloned())
                .collect()
        };

        let mut failed = Vec::new();
        for session in recipients {
            if session.send_json(delivery).await.is_err() {
                failed.push(session.id.clone());
            }
        }
        failed
    }
}

/// Compares two JSON values' structural skeletons (spec.md §4.5): same
/// property-name sets, and any property whose stored value is an object
/// must recursively match on the other side too. Arrays and scalars match
/// by presence only.
pub fn shapes_match(stored: &Value, candidate: &Value) -> bool {
    match (stored, candidate) {
        (Value::Object(stored_map), Value::Object(candidate_map)) => {
            if stored_map.len() != candidate_map.len() {
                return false;
            }
            for (key, stored_value) in stored_map {
                let Some(candidate_value) = candidate_map.get(key) else {
                    return false;
                };
                if stored_value.is_object() {
                    if !candidate_value.is_object() || !shapes_match(stored_value, candidate_value) {
                        return false;
                    }
                }
            }
            true
        }
        _ => true,
    }
}
