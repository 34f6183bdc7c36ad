//! EC read pipeline: one reader per fragment stream, lock-step decode.
//!
//! ```text
//!  fragment GET ──► pump ──► queue(1) ─┐
//!  fragment GET ──► pump ──► queue(1) ─┼─► decode ──► trim ──► ByteStream
//!  fragment GET ──► pump ──► queue(1) ─┘
//! ```
//!
//! Exactly `k` readers are opened (rotating to spare targets on connect
//! failures). The capacity-1 queues keep every reader at most one
//! fragment ahead of the decoder. A reader that ends simply closes its
//! queue; the decoder stops cleanly when all of them are done, and
//! fails the stream when only part of them are.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::common::errors::StoreError;
use crate::common::stream::ByteStream;
use crate::config::{Config, TimeoutConfig};
use crate::content::ChunkTarget;
use crate::storage::codec::EcCodec;
use crate::storage::method::EcMethod;
use crate::storage::range::{
    RangeBound, meta_chunk_range_to_segment_range, resolve_ranges, segment_range_to_fragment_range,
};
use crate::transport::get::{get_chunk, read_body_chunk};

pub struct EcMetaChunkReader {
    targets: Vec<ChunkTarget>,
    method: EcMethod,
    /// Actual payload length of the meta-chunk, from the directory.
    meta_length: u64,
    client: Client,
    config: Config,
}

/// Resolved geometry of one requested range: the exact meta bytes to
/// deliver, the aligned segment window being decoded, and the fragment
/// range to request from every target.
struct RangeInfo {
    meta_start: u64,
    meta_end: u64,
    segment_start: u64,
    /// Clamped to the last real meta byte; the overshoot past
    /// `meta_end` is what gets trimmed from the final segment.
    segment_end: u64,
    request_range: Option<(u64, u64)>,
}

impl EcMetaChunkReader {
    pub fn new(
        targets: Vec<ChunkTarget>,
        method: EcMethod,
        meta_length: u64,
        client: Client,
        config: Config,
    ) -> Self {
        Self {
            targets,
            method,
            meta_length,
            client,
            config,
        }
    }

    /// Opens the fragment readers and returns the decoded, trimmed byte
    /// stream for `(meta_start, meta_end)` (both `None` = whole
    /// meta-chunk).
    pub async fn stream(
        self,
        meta_start: RangeBound,
        meta_end: RangeBound,
    ) -> Result<ByteStream, StoreError> {
        let k = self.method.k;

        let Some(info) = self.range_info(meta_start, meta_end) else {
            // nothing satisfiable to deliver
            let (_tx, stream) = ByteStream::channel();
            return Ok(stream);
        };

        // open k readers, rotating through spare targets on failure
        let range = info.request_range.map(|(a, b)| (Some(a), Some(b)));
        let client = &self.client;
        let timeouts = &self.config.timeouts;
        let mut readers: Vec<(usize, Response)> = Vec::new();
        let mut cursor = 0;
        while readers.len() < k && cursor < self.targets.len() {
            let need = k - readers.len();
            let batch = &self.targets[cursor..(cursor + need).min(self.targets.len())];
            cursor += batch.len();

            let attempts = batch.iter().map(|target| async move {
                let attempt = get_chunk(client, &target.url, range, &[], timeouts).await;
                (target, attempt)
            });
            for (target, attempt) in futures::future::join_all(attempts).await {
                match attempt {
                    Ok(response) => match target.pos.fragment_slot(k) {
                        Some(slot) => readers.push((slot, response)),
                        None => warn!("chunk {} has no fragment position", target.url),
                    },
                    Err(e) => warn!("fragment source {} failed: {}", target.url, e),
                }
            }
        }
        if readers.len() < k {
            return Err(StoreError::NotEnoughSources {
                found: readers.len(),
                required: k,
            });
        }
        debug!(
            "EC read: {} readers over segments {}..{}",
            readers.len(),
            info.segment_start,
            info.segment_end
        );

        // one pump per reader, one slot of look-ahead each
        let fragment_size = self.method.fragment_size() as usize;
        let mut queues = Vec::with_capacity(readers.len());
        for (slot, response) in readers {
            let (queue_tx, queue_rx) = flume::bounded(1);
            tokio::spawn(pump_fragments(
                response,
                fragment_size,
                self.config.timeouts,
                queue_tx,
            ));
            queues.push((slot, queue_rx));
        }

        let (tx, stream) = ByteStream::channel();
        tokio::spawn(decode_loop(
            queues,
            self.method.codec().clone(),
            k,
            self.method.m,
            self.method.segment_size,
            info,
            self.config.io.read_chunk_size,
            tx,
        ));
        Ok(stream)
    }

    fn range_info(&self, meta_start: RangeBound, meta_end: RangeBound) -> Option<RangeInfo> {
        let segment_size = self.method.segment_size;
        let fragment_size = self.method.fragment_size();
        if self.meta_length == 0 {
            return None;
        }

        if meta_start.is_none() && meta_end.is_none() {
            // whole meta-chunk
            return Some(RangeInfo {
                meta_start: 0,
                meta_end: self.meta_length - 1,
                segment_start: 0,
                segment_end: self.meta_length - 1,
                request_range: None,
            });
        }

        // resolve the requested meta range against the true length first,
        // so segment and fragment ranges are always absolute and aligned
        let (ms, me) = resolve_ranges(&[(meta_start, meta_end)], self.meta_length)
            .first()
            .copied()?;
        let me = me.min(self.meta_length - 1);
        if ms > me {
            return None;
        }

        let (seg_start, seg_end) =
            meta_chunk_range_to_segment_range(Some(ms), Some(me), segment_size);
        let (seg_start, seg_end) = (seg_start?, seg_end?);
        let (frag_start, frag_end) =
            segment_range_to_fragment_range(Some(seg_start), Some(seg_end), segment_size, fragment_size);

        Some(RangeInfo {
            meta_start: ms,
            meta_end: me,
            segment_start: seg_start,
            segment_end: seg_end.min(self.meta_length - 1),
            request_range: Some((frag_start?, frag_end?)),
        })
    }
}

/// Reads one fragment stream, re-framing the body into fragment-sized
/// blocks. The queue disconnecting (either side) ends the task.
async fn pump_fragments(
    mut response: Response,
    fragment_size: usize,
    timeouts: TimeoutConfig,
    queue: flume::Sender<Bytes>,
) {
    let mut buf = BytesMut::new();
    loop {
        match read_body_chunk(&mut response, &timeouts).await {
            Ok(Some(block)) => {
                buf.extend_from_slice(&block);
                while buf.len() >= fragment_size {
                    let fragment = buf.split_to(fragment_size).freeze();
                    if queue.send_async(fragment).await.is_err() {
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("fragment stream fault: {}", e);
                return;
            }
        }
    }
    // short trailing fragment of the undersized tail segment
    if !buf.is_empty() {
        let _ = queue.send_async(buf.freeze()).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn decode_loop(
    queues: Vec<(usize, flume::Receiver<Bytes>)>,
    codec: Arc<dyn EcCodec>,
    k: usize,
    m: usize,
    segment_size: u64,
    info: RangeInfo,
    read_chunk_size: usize,
    tx: flume::Sender<Result<Bytes, StoreError>>,
) {
    let num_segments = (info.segment_end + 1 - info.segment_start).div_ceil(segment_size);
    let mut start_over = info.meta_start - info.segment_start;
    let end_over = info.segment_end - info.meta_end;
    let mut index = 0u64;

    loop {
        // one fragment from every live reader; a closed queue means that
        // reader is done
        let mut slots: Vec<Option<Bytes>> = vec![None; k + m];
        let mut live = 0;
        for (slot, rx) in &queues {
            if let Ok(fragment) = rx.recv_async().await {
                slots[*slot] = Some(fragment);
                live += 1;
            }
        }
        if live == 0 {
            break;
        }
        if live < k {
            let _ = tx
                .send_async(Err(StoreError::UnrecoverableRead(format!(
                    "only {} of {} fragment streams still alive",
                    live, k
                ))))
                .await;
            return;
        }

        let mut segment = match codec.decode(&slots) {
            Ok(segment) => segment,
            Err(e) => {
                let _ = tx.send_async(Err(e)).await;
                return;
            }
        };
        index += 1;

        // trim the alignment slack off the requested range
        if start_over > 0 {
            if (segment.len() as u64) <= start_over {
                start_over -= segment.len() as u64;
                segment = Bytes::new();
            } else {
                segment = segment.slice(start_over as usize..);
                start_over = 0;
            }
        }
        if index == num_segments && end_over > 0 {
            if (end_over as usize) < segment.len() {
                segment = segment.slice(..segment.len() - end_over as usize);
            } else {
                segment = Bytes::new();
            }
        }

        while !segment.is_empty() {
            let piece = segment.split_to(read_chunk_size.min(segment.len()));
            if tx.send_async(Ok(piece)).await.is_err() {
                // caller dropped the stream: tear down the readers
                return;
            }
        }

        if index >= num_segments {
            break;
        }
    }
}
