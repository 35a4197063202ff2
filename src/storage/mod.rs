//! Storage Port (spec.md §4.1): a narrow async key->value interface the
//! Topic Manager consumes without knowing which concrete backend is behind
//! it. Grounded in the same shape as the pack's MQTT `Storage` trait
//! (rocksdb-backed) and `tacd`'s retained-topic store: a single
//! background writer per instance, draining a bounded FIFO queue, with the
//! blocking backend calls (`rusqlite`, `rocksdb`) pushed onto
//! `spawn_blocking` so the async writer loop never stalls the runtime.

pub mod kv;
pub mod noop;
pub mod sql;

use crate::error::StorageError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub use kv::KvStorage;
pub use noop::NoopStorage;
pub use sql::SqlStorage;

/// Default bounded queue capacity for the background writer (spec.md §4.1).
pub const DEFAULT_QUEUE_CAPACITY: usize = 5_000;

/// A value as it comes back out of storage: the canonical JSON payload and
/// the nanosecond UTC timestamp it was written with (spec.md §6).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub value: Value,
    pub timestamp_ns: i64,
}

/// One queued write, carrying its own deadline so the writer can fail fast
/// on an already-expired request instead of performing a useless write.
pub(crate) struct WriteCommand {
    pub key: String,
    pub value: Value,
    pub timestamp_ns: i64,
    pub deadline: Instant,
    pub reply: oneshot::Sender<Result<(), StorageError>>,
}

/// The capability set the Topic Manager holds: open is backend-specific
/// (it returns a concrete `Self`, not a trait object), everything else is
/// dispatched dynamically through `Arc<dyn StorageBackend>`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Enqueues a write and returns a receiver that resolves exactly once,
    /// either with the write outcome or with `QueueFull`/`StorageClosed` if
    /// the enqueue itself could not happen. Never blocks.
    async fn async_put(
        &self,
        key: String,
        value: Value,
        timestamp_ns: i64,
        deadline: Instant,
    ) -> oneshot::Receiver<Result<(), StorageError>>;

    /// Most recent value for `key`, or `None` if never written / deleted.
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError>;

    /// Removes `key`; absence is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Idempotent: stops accepting new writes, waits for the writer to
    /// drain in-flight acknowledgements, then closes the backing store.
    async fn close(&self);
}

#[cfg(test)]
pub(crate) fn deadline_in(ms: u64) -> Instant {
    Instant::now() + tokio::time::Duration::from_millis(ms)
}
