//! Registry of connected sessions, keyed by client id (spec.md §4.3). Shape
//! follows the teacher's `AppState` registries: an `RwLock<HashMap<..>>`
//! behind a small typed wrapper, read-mostly in the hot publish/fan-out path.

use crate::session::ClientSession;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `id` was free and the session was registered.
    pub async fn add(&self, session: Arc<ClientSession>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return false;
        }
        sessions.insert(session.id.clone(), session);
        true
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
