//! Per-target writer state shared by the replicated and EC write
//! pipelines.
//!
//! Each writer owns a bounded frame queue and a sender task. The main
//! loop enqueues payload blocks (back-pressure comes from the queue
//! depth); the sender frames and writes them. A write fault flips the
//! `failed` flag and records the message — it never touches siblings.
//! The queue keeps draining after a fault so the producer never blocks
//! on a dead writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::common::errors::StoreError;
use crate::config::Config;
use crate::content::ChunkTarget;
use crate::transport::put::PutConnection;

pub(crate) struct ChunkWriter {
    pub target: ChunkTarget,
    /// MD5 of the payload handed to this writer (fragment checksum on
    /// the EC path). Updated by the dispatch loop, not the sender.
    pub checksum: Md5,
    pub bytes_transferred: u64,
    tx: Option<flume::Sender<Bytes>>,
    failed: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
    task: JoinHandle<PutConnection>,
}

/// What one writer ended up with once its queue drained and the
/// response was read (or not).
pub(crate) struct WriterOutcome {
    pub target: ChunkTarget,
    pub bytes_transferred: u64,
    pub checksum: Md5,
    /// `Ok(status)` when a response was read, `Err(message)` when the
    /// writer failed before or while reading it.
    pub result: Result<u16, String>,
}

impl ChunkWriter {
    pub async fn connect(
        target: &ChunkTarget,
        headers: &[(&'static str, String)],
        config: &Config,
    ) -> Result<Self, StoreError> {
        let conn = PutConnection::open(&target.url, headers, &config.timeouts).await?;
        let (tx, rx) = flume::bounded(config.io.put_queue_depth);
        let failed = Arc::new(AtomicBool::new(false));
        let error = Arc::new(Mutex::new(None));
        let task = tokio::spawn(Self::pump(conn, rx, failed.clone(), error.clone()));
        Ok(Self {
            target: target.clone(),
            checksum: Md5::new(),
            bytes_transferred: 0,
            tx: Some(tx),
            failed,
            error,
            task,
        })
    }

    async fn pump(
        mut conn: PutConnection,
        rx: flume::Receiver<Bytes>,
        failed: Arc<AtomicBool>,
        error: Arc<Mutex<Option<String>>>,
    ) -> PutConnection {
        while let Ok(data) = rx.recv_async().await {
            if failed.load(Ordering::Relaxed) {
                continue;
            }
            let result = if data.is_empty() {
                conn.finish().await
            } else {
                conn.send_frame(&data).await
            };
            if let Err(e) = result {
                failed.store(true, Ordering::Relaxed);
                *error.lock() = Some(e.target_message());
            }
        }
        conn
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn error_message(&self) -> String {
        self.error
            .lock()
            .clone()
            .unwrap_or_else(|| "write failed".to_string())
    }

    /// Enqueues one payload block. FIFO per writer.
    pub async fn send(&mut self, data: Bytes) {
        self.bytes_transferred += data.len() as u64;
        if let Some(tx) = &self.tx {
            if tx.send_async(data).await.is_err() {
                self.failed.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Enqueues the end-of-body marker.
    pub async fn finalize(&mut self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send_async(Bytes::new()).await;
        }
    }

    /// Waits for the queue to drain, then reads the target's response.
    pub async fn finish(mut self) -> WriterOutcome {
        drop(self.tx.take());
        let result = match self.task.await {
            Err(e) => {
                warn!("writer task for {} died: {}", self.target.url, e);
                Err("writer task failed".to_string())
            }
            Ok(mut conn) => {
                if let Some(message) = self.error.lock().clone() {
                    Err(message)
                } else {
                    match conn.read_response().await {
                        Ok(status) => Ok(status),
                        Err(e) => Err(e.target_message()),
                    }
                }
            }
        };
        WriterOutcome {
            target: self.target,
            bytes_transferred: self.bytes_transferred,
            checksum: self.checksum,
            result,
        }
    }
}
