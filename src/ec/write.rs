//! EC write pipeline: segment the stream, encode every segment into
//! k+m fragments, fan the fragments out to one writer per fragment
//! slot.

use md5::{Digest, Md5};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::common::errors::{Seconds, StoreError};
use crate::config::Config;
use crate::content::source::DataSource;
use crate::content::{ChunkInfo, ChunkTarget, ContentDescriptor, MetaChunkWriteResult};
use crate::ec::encode::{EcSegmenter, FragmentSet};
use crate::storage::method::EcMethod;
use crate::transport::headers::put_headers;
use crate::transport::writer::ChunkWriter;

struct FragmentWriter {
    writer: ChunkWriter,
    slot: usize,
}

pub struct EcMetaChunkWriter<'a> {
    sysmeta: &'a ContentDescriptor,
    meta_chunk: &'a [ChunkTarget],
    method: EcMethod,
    chunks_count: usize,
    config: &'a Config,
}

impl<'a> EcMetaChunkWriter<'a> {
    pub fn new(
        sysmeta: &'a ContentDescriptor,
        meta_chunk: &'a [ChunkTarget],
        method: EcMethod,
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

    /// Streams up to `size` bytes (the meta-chunk payload capacity)
    /// from `source`, erasure-coded across the fragment targets.
    pub async fn stream(
        &self,
        source: &mut dyn DataSource,
        size: u64,
        checksum: &mut Md5,
    ) -> Result<MetaChunkWriteResult, StoreError> {
        let quorum = self.method.quorum();

        let connects = self.meta_chunk.iter().map(|target| async move {
            let headers = put_headers(self.sysmeta, target, self.chunks_count);
            (target, ChunkWriter::connect(target, &headers, self.config).await)
        });
        let mut writers = Vec::new();
        let mut failed_chunks = Vec::new();
        for (target, connected) in futures::future::join_all(connects).await {
            match connected {
                Ok(writer) => {
                    let Some(slot) = target.pos.fragment_slot(self.method.k) else {
                        return Err(StoreError::InvalidStorageMethod(format!(
                            "chunk {} has no fragment position",
                            target.url
                        )));
                    };
                    writers.push(FragmentWriter { writer, slot });
                }
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

        let mut segmenter = EcSegmenter::new(self.method.codec().clone(), self.method.segment_size);
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

            for fragments in segmenter.push(&data)? {
                self.dispatch(&mut writers, &mut failed_chunks, fragments).await;
                if writers.len() < quorum {
                    return Err(StoreError::WriteQuorum {
                        successes: writers.len(),
                        required: quorum,
                        chunks: failed_chunks,
                    });
                }
            }
        }

        // tail segment, then the end-of-body marker for every writer
        let tail = segmenter.finish()?;
        if tail.iter().any(|fragment| !fragment.is_empty()) {
            self.dispatch(&mut writers, &mut failed_chunks, tail).await;
            if writers.len() < quorum {
                return Err(StoreError::WriteQuorum {
                    successes: writers.len(),
                    required: quorum,
                    chunks: failed_chunks,
                });
            }
        }
        for fw in writers.iter_mut() {
            fw.writer.finalize().await;
        }

        let outcomes = futures::future::join_all(
            writers.into_iter().map(|fw| fw.writer.finish()),
        )
        .await;

        let mut chunks = Vec::new();
        let mut successes = 0usize;
        for outcome in outcomes {
            match outcome.result {
                Ok(201) => {
                    successes += 1;
                    let fragment_hash = hex::encode(outcome.checksum.finalize());
                    chunks.push(ChunkInfo::succeeded(
                        &outcome.target,
                        outcome.bytes_transferred,
                        fragment_hash,
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
            "EC meta-chunk written to {}/{} fragments, {} bytes",
            successes,
            self.meta_chunk.len(),
            bytes_transferred
        );
        Ok(MetaChunkWriteResult {
            bytes_transferred,
            checksum: hex::encode(checksum.clone().finalize()),
            chunks,
        })
    }

    /// Routes fragment `slot` of one encoded segment to the writer
    /// holding that slot.
    async fn dispatch(
        &self,
        writers: &mut Vec<FragmentWriter>,
        failed_chunks: &mut Vec<ChunkInfo>,
        fragments: FragmentSet,
    ) {
        let mut i = 0;
        while i < writers.len() {
            if writers[i].writer.is_failed() {
                let fw = writers.remove(i);
                failed_chunks.push(ChunkInfo::failed(
                    &fw.writer.target,
                    fw.writer.error_message(),
                ));
            } else {
                let fragment = fragments[writers[i].slot].clone();
                writers[i].writer.checksum.update(&fragment);
                writers[i].writer.send(fragment).await;
                i += 1;
            }
        }
    }
}
