//! Embedded KV storage provider, backed by `rocksdb`. Mirrors the pack's
//! MQTT `RocksdbStorage` shape (an `async_trait` wrapper around a blocking
//! `rocksdb::DB`), generalized to the single-value-per-topic model this
//! broker needs (spec.md §6).

use super::{StorageBackend, StoredValue, WriteCommand, DEFAULT_QUEUE_CAPACITY};
use crate::error::StorageError;
use async_trait::async_trait;
use rocksdb::DB;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(serde::Serialize, serde::Deserialize)]
struct Record {
    value: Value,
    timestamp_ns: i64,
}

pub struct KvStorage {
    db: Arc<DB>,
    queue_tx: StdMutex<Option<mpsc::Sender<WriteCommand>>>,
    closed: Arc<AtomicBool>,
    writer: AsyncMutex<Option<JoinHandle<()>>>,
}

impl KvStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_capacity(path, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn open_with_capacity(path: &Path, capacity: usize) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::StorageOpen(e.to_string()))?;
        }
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = Arc::new(DB::open(&opts, path).map_err(|e| StorageError::StorageOpen(e.to_string()))?);

        let (queue_tx, mut queue_rx) = mpsc::channel::<WriteCommand>(capacity);
        let writer_db = db.clone();
        let handle = tokio::spawn(async move {
            while let Some(cmd) = queue_rx.recv().await {
                if Instant::now() > cmd.deadline {
                    let _ = cmd.reply.send(Err(StorageError::Cancelled));
                    continue;
                }
                let db = writer_db.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let record = Record {
                        value: cmd.value,
                        timestamp_ns: cmd.timestamp_ns,
                    };
                    let bytes = serde_json::to_vec(&record)
                        .map_err(|e| StorageError::WriteError(e.to_string()))?;
                    db.put(cmd.key.as_bytes(), bytes)
                        .map_err(|e| StorageError::WriteError(e.to_string()))
                })
                .await
                .unwrap_or_else(|e| Err(StorageError::WriteError(e.to_string())));
                let _ = cmd.reply.send(result);
            }
        });

        Ok(Self {
            db,
            queue_tx: StdMutex::new(Some(queue_tx)),
            closed: Arc::new(AtomicBool::new(false)),
            writer: AsyncMutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl StorageBackend for KvStorage {
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
        let db = self.db.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            match db.get(key.as_bytes()) {
                Ok(Some(bytes)) => {
                    let record: Record = serde_json::from_slice(&bytes)
                        .map_err(|e| StorageError::WriteError(e.to_string()))?;
                    Ok(Some(StoredValue {
                        value: record.value,
                        timestamp_ns: record.timestamp_ns,
                    }))
                }
                Ok(None) => Ok(None),
                Err(e) => Err(StorageError::WriteError(e.to_string())),
            }
        })
        .await
        .unwrap_or_else(|e| Err(StorageError::WriteError(e.to_string())))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let db = self.db.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            db.delete(key.as_bytes())
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
