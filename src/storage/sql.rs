//! Embedded SQL storage provider, backed by `rusqlite` (the same embedded
//! SQLite the teacher's `services/receiver` uses for on-device state). One
//! logical record per topic: canonical JSON bytes plus a nanosecond UTC
//! timestamp (spec.md §6).

use super::{StorageBackend, StoredValue, WriteCommand, DEFAULT_QUEUE_CAPACITY};
use crate::error::StorageError;
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS topic_values (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    timestamp_ns INTEGER NOT NULL
)";

pub struct SqlStorage {
    conn: Arc<StdMutex<Connection>>,
    queue_tx: StdMutex<Option<mpsc::Sender<WriteCommand>>>,
    closed: Arc<AtomicBool>,
    writer: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SqlStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_capacity(path, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn open_with_capacity(path: &Path, capacity: usize) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::StorageOpen(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| StorageError::StorageOpen(e.to_string()))?;
        conn.execute(CREATE_TABLE_SQL, [])
            .map_err(|e| StorageError::StorageOpen(e.to_string()))?;
        let conn = Arc::new(StdMutex::new(conn));

        let (queue_tx, mut queue_rx) = mpsc::channel::<WriteCommand>(capacity);
        let writer_conn = conn.clone();
        let handle = tokio::spawn(async move {
            while let Some(cmd) = queue_rx.recv().await {
                if Instant::now() > cmd.deadline {
                    let _ = cmd.reply.send(Err(StorageError::Cancelled));
                    continue;
                }
                let conn = writer_conn.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
                    guard
                        .execute(
                            "INSERT INTO topic_values (key, value, timestamp_ns) VALUES (?1, ?2, ?3)
                             ON CONFLICT(key) DO UPDATE SET value = excluded.value, timestamp_ns = excluded.timestamp_ns",
                            rusqlite::params![cmd.key, cmd.value.to_string(), cmd.timestamp_ns],
                        )
                        .map(|_| ())
                        .map_err(|e| StorageError::WriteError(e.to_string()))
                })
                .await
                .unwrap_or_else(|e| Err(StorageError::WriteError(e.to_string())));
                let _ = cmd.reply.send(result);
            }
        });

        Ok(Self {
            conn,
            queue_tx: StdMutex::new(Some(queue_tx)),
            closed: Arc::new(AtomicBool::new(false)),
            writer: AsyncMutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl StorageBackend for SqlStorage {
    async fn async_put(
        &self,
        key: String,
        value: Value,
        timestamp_ns: i64,
        deadline: Instant,
    ) -> oneshot::Receiver<Result<(), StorageError>> {
        let (tx, rx) = oneshot::channel();
        if self.closed.load(Ordering::Acquire) {
            let _ = tx.send(Err(StorageError::StorageClosed));
            return rx;
        }
        let cmd = WriteCommand {
            key,
            value,
            timestamp_ns,
            deadline,
            reply: tx,
        };
        let sender = self.queue_tx.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match sender {
            Some(sender) => match sender.try_send(cmd) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(cmd)) => {
                    let _ = cmd.reply.send(Err(StorageError::QueueFull));
                }
                Err(mpsc::error::TrySendError::Closed(cmd)) => {
                    let _ = cmd.reply.send(Err(StorageError::StorageClosed));
                }
            },
            None => {
                let _ = cmd.reply.send(Err(StorageError::StorageClosed));
            }
        }
        rx
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        let conn = self.conn.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            let result = guard.query_row(
                "SELECT value, timestamp_ns FROM topic_values WHERE key = ?1",
                rusqlite::params![key],
                |row| {
                    let raw: String = row.get(0)?;
                    let ts: i64 = row.get(1)?;
                    Ok((raw, ts))
                },
            );
            match result {
                Ok((raw, ts)) => serde_json::from_str(&raw)
                    .map(|value| Some(StoredValue { value, timestamp_ns: ts }))
                    .map_err(|e| StorageError::WriteError(e.to_string())),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(StorageError::WriteError(e.to_string())),
            }
        })
        .await
        .unwrap_or_else(|e| Err(StorageError::WriteError(e.to_string())))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .execute("DELETE FROM topic_values WHERE key = ?1", rusqlite::params![key])
                .map(|_| ())
                .map_err(|e| StorageError::WriteError(e.to_string()))
        })
        .await
        .unwrap_or_else(|e| Err(StorageError::WriteError(e.to_string())))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let sender = self.queue_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(sender);
        if let Some(handle) = self.writer.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::deadline_in;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = SqlStorage::open(&dir.path().join("data.sqlite3")).unwrap();

        let rx = store
            .async_put("T".into(), serde_json::json!({"x": 1}), 42, deadline_in(2000))
            .await;
        assert_eq!(rx.await.unwrap(), Ok(()));

        let stored = store.get("T").await.unwrap().expect("value present");
        assert_eq!(stored.value, serde_json::json!({"x": 1}));
        assert_eq!(stored.timestamp_ns, 42);

        store.close().await;
    }

    #[tokio::test]
    async fn get_on_missing_key_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let store = SqlStorage::open(&dir.path().join("data.sqlite3")).unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);
        store.close().await;
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_not_an_error() {
        let dir = tempdir().unwrap();
        let store = SqlStorage::open(&dir.path().join("data.sqlite3")).unwrap();
        assert!(store.delete("missing").await.is_ok());
        store.close().await;
    }

    #[tokio::test]
    async fn put_after_close_reports_storage_closed() {
        let dir = tempdir().unwrap();
        let store = SqlStorage::open(&dir.path().join("data.sqlite3")).unwrap();
        store.close().await;
        let rx = store
            .async_put("T".into(), serde_json::json!({"x": 1}), 0, deadline_in(2000))
            .await;
        assert_eq!(rx.await.unwrap(), Err(StorageError::StorageClosed));
    }

    #[tokio::test]
    async fn full_queue_reports_queue_full_immediately() {
        let dir = tempdir().unwrap();
        let store = SqlStorage::open_with_capacity(&dir.path().join("data.sqlite3"), 0).unwrap();
        // capacity 0: the channel has no buffer slots, so an enqueue racing
        // ahead of the writer's first recv() can observe it as full.
        let mut saw_queue_full = false;
        for i in 0..50 {
            let rx = store
                .async_put(format!("T{i}"), serde_json::json!({"x": i}), 0, deadline_in(2000))
                .await;
            if rx.await.unwrap() == Err(StorageError::QueueFull) {
                saw_queue_full = true;
                break;
            }
        }
        assert!(saw_queue_full, "expected at least one QueueFull under a zero-capacity queue");
        store.close().await;
    }
}
