//! Replicated write pipeline: fan one meta-chunk out to its n replica
//! targets under a majority quorum.
//!
//! ```text
//!  source ──► dispatch loop ──► queue ──► sender task ──► replica 0
//!                │ md5          queue ──► sender task ──► replica 1
//!                └─ quorum      queue ──► sender task ──► replica 2
//! ```
//!
//! A faulted writer is dropped from the dispatch set and reported as a
//! failed chunk; the meta-chunk only fails when the survivors drop
//! below quorum. Source faults abort everything.

use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::common::errors::{Seconds, StoreError};
use crate::config::Config;
use crate::content::source::DataSource;
use crate::content::{ChunkInfo, ChunkTarget, ContentDescriptor, MetaChunkWriteResult};
use crate::storage::method::ReplicatedMethod;
use crate::transport::headers::put_headers;
use crate::transport::writer::ChunkWriter;

pub struct ReplicatedMetaChunkWriter<'a> {
    sysmeta: &'a ContentDescriptor,
    meta_chunk: &'a [ChunkTarget],
    method: ReplicatedMethod,
    chunks_count: usize,
    config: &'a Config,
}

impl<'a> ReplicatedMetaChunkWriter<'a> {
    pub fn new(
        sysmeta: &'a ContentDescriptor,
        meta_chunk: &'a [ChunkTarget],
        method: ReplicatedMethod,
        chunks_count: usize,
        config: &'a Config,
    ) -> Self {
        Self {
            sysmeta,
            meta_chunk,
            method,
            chunks_count,
            config,
        }
    }

    /// Streams up to `size` bytes from `source` to every replica.
    /// `checksum` is the running content-wide digest.
    pub async fn stream(
        &self,
        source: &mut dyn DataSource,
        size: u64,
        checksum: &mut Md5,
    ) -> Result<MetaChunkWriteResult, StoreError> {
        let quorum = self.method.quorum(self.meta_chunk.len());

        // fan-out connect
        let connects = self.meta_chunk.iter().map(|target| async move {
            let headers = put_headers(self.sysmeta, target, self.chunks_count);
            (target, ChunkWriter::connect(target, &headers, self.config).await)
        });
        let mut writers = Vec::new();
        let mut failed_chunks = Vec::new();
        for (target, connected) in futures::future::join_all(connects).await {
            match connected {
                Ok(writer) => writers.push(writer),
                Err(e) => {
                    warn!("failed to connect to {}: {}", target.url, e);
                    failed_chunks.push(ChunkInfo::failed(target, e.target_message()));
                }
            }
        }
        if writers.len() < quorum {
            return Err(StoreError::WriteQuorum {
                successes: writers.len(),
                required: quorum,
                chunks: failed_chunks,
            });
        }

        let mut bytes_transferred = 0u64;
        loop {
            let read_size = (self.config.io.write_chunk_size as u64)
                .min(size - bytes_transferred) as usize;
            let data = match timeout(self.config.timeouts.client_timeout(), source.read(read_size))
                .await
            {
                Err(_) => {
                    return Err(StoreError::SourceReadTimeout(Seconds(
                        self.config.timeouts.client,
                    )));
                }
                Ok(Err(e)) => return Err(StoreError::SourceReadError(e.to_string())),
                Ok(Ok(data)) => data,
            };
            if data.is_empty() {
                break;
            }

            checksum.update(&data);
            bytes_transferred += data.len() as u64;
            self.dispatch(&mut writers, &mut failed_chunks, data).await;

            if writers.len() < quorum {
                return Err(StoreError::WriteQuorum {
                    successes: writers.len(),
                    required: quorum,
                    chunks: failed_chunks,
                });
            }
        }

        for writer in writers.iter_mut() {
            writer.finalize().await;
        }

        // drain the queues and collect responses
        let outcomes =
            futures::future::join_all(writers.into_iter().map(ChunkWriter::finish)).await;

        let meta_checksum = hex::encode(checksum.clone().finalize());
        let mut chunks = Vec::new();
        let mut successes = 0usize;
        for outcome in outcomes {
            match outcome.result {
                Ok(201) => {
                    successes += 1;
                    chunks.push(ChunkInfo::succeeded(
                        &outcome.target,
                        bytes_transferred,
                        meta_checksum.clone(),
                    ));
                }
                Ok(status) => {
                    warn!("wrong status from {}: {}", outcome.target.url, status);
                    chunks.push(ChunkInfo::failed(&outcome.target, format!("HTTP {}", status)));
                }
                Err(message) => {
                    warn!("no response from {}: {}", outcome.target.url, message);
                    chunks.push(ChunkInfo::failed(&outcome.target, message));
                }
            }
        }
        chunks.append(&mut failed_chunks);

        if successes < quorum {
            return Err(StoreError::WriteQuorum {
                successes,
                required: quorum,
                chunks,
            });
        }

        debug!(
            "meta-chunk written to {}/{} replicas, {} bytes",
            successes,
            self.meta_chunk.len(),
            bytes_transferred
        );
        Ok(MetaChunkWriteResult {
            bytes_transferred,
            checksum: meta_checksum,
            chunks,
        })
    }

    /// Enqueues one block on every live writer; writers seen failed are
    /// moved to the failed list.
    async fn dispatch(
        &self,
        writers: &mut Vec<ChunkWriter>,
        failed_chunks: &mut Vec<ChunkInfo>,
        data: Bytes,
    ) {
        let mut i = 0;
        while i < writers.len() {
            if writers[i].is_failed() {
                let writer = writers.remove(i);
                failed_chunks.push(ChunkInfo::failed(&writer.target, writer.error_message()));
            } else {
                writers[i].send(data.clone()).await;
                i += 1;
            }
        }
    }
}
