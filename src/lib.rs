//! WebSocket publish/subscribe message broker with optional single-latest
//! value persistence and per-topic structural schema validation.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod server;
pub mod session;
pub mod session_registry;
pub mod storage;
pub mod topic;
pub mod wire;

use config::{Config, StorageType};
use error::StorageError;
use manager::TopicManager;
use server::AppState;
use session_registry::SessionRegistry;
use std::sync::Arc;

/// Everything `main` needs to run the broker, plus the pieces it must shut
/// down in order on exit.
pub struct Broker {
    pub router: axum::Router,
    pub storage: Arc<dyn storage::StorageBackend>,
    pub cleanup_handle: tokio::task::JoinHandle<()>,
}

/// Builds the storage backend named by `config.storage_type`, wires the
/// Topic Manager, Session Registry, and failed-peer cleanup loop, and
/// returns the assembled router ready for `axum::serve` (spec.md §2).
pub async fn build(config: Config) -> Result<Broker, StorageError> {
    let storage: Arc<dyn storage::StorageBackend> = match config.storage_type {
        StorageType::Badger => Arc::new(storage::KvStorage::open(&config.storage_path)?),
        StorageType::Sqlite => Arc::new(storage::SqlStorage::open(&config.storage_path)?),
        StorageType::None => Arc::new(storage::NoopStorage::open()),
    };

    let (manager, failed_peers_rx) = TopicManager::new(storage.clone());
    let manager = Arc::new(manager);
    let registry = Arc::new(SessionRegistry::new());

    let cleanup_handle = cleanup::CleanupLoop::new(manager.clone(), registry.clone()).spawn(failed_peers_rx);

    let state = AppState {
        config: Arc::new(config),
        manager,
        registry,
    };
    let router = server::build_router(state);

    Ok(Broker {
        router,
        storage,
        cleanup_handle,
    })
}
