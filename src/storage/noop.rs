//! No-op storage sink: always succeeds, never retains anything. Used when
//! `STORAGE_TYPE` is unset/`none` (spec.md §6).

use super::{StorageBackend, StoredValue};
use crate::error::StorageError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tokio::time::Instant;

#[derive(Default)]
pub struct NoopStorage {
    closed: AtomicBool,
}

impl NoopStorage {
    pub fn open() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for NoopStorage {
    async fn async_put(
        &self,
        _key: String,
        _value: Value,
        _timestamp_ns: i64,
        _deadline: Instant,
    ) -> oneshot::Receiver<Result<(), StorageError>> {
        let (tx, rx) = oneshot::channel();
        let result = if self.closed.load(Ordering::Acquire) {
            Err(StorageError::StorageClosed)
        } else {
            Ok(())
        };
        let _ = tx.send(result);
        rx
    }

    async fn get(&self, _key: &str) -> Result<Option<StoredValue>, StorageError> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::deadline_in;

    #[tokio::test]
    async fn put_always_succeeds_until_closed() {
        let store = NoopStorage::open();
        let rx = store
            .async_put("topic".into(), serde_json::json!({"x": 1}), 0, deadline_in(2000))
            .await;
        assert_eq!(rx.await.unwrap(), Ok(()));

        store.close().await;
        let rx = store
            .async_put("topic".into(), serde_json::json!({"x": 1}), 0, deadline_in(2000))
            .await;
        assert_eq!(rx.await.unwrap(), Err(StorageError::StorageClosed));
    }

    #[tokio::test]
    async fn get_is_always_empty() {
        let store = NoopStorage::open();
        assert_eq!(store.get("topic").await.unwrap(), None);
    }
}
