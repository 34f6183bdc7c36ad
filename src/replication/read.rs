//! Replicated read pipeline: stream one meta-chunk from whichever
//! replica answers, failing over mid-stream with `Range` resumption.

use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};

use crate::common::errors::StoreError;
use crate::common::stream::ByteStream;
use crate::config::Config;
use crate::content::ChunkTarget;
use crate::transport::get::{get_chunk, parse_content_range, read_body_chunk};

pub struct ReplicatedMetaChunkReader {
    targets: Vec<ChunkTarget>,
    client: Client,
    config: Config,
    extra_headers: Vec<(String, String)>,
}

impl ReplicatedMetaChunkReader {
    pub fn new(targets: Vec<ChunkTarget>, client: Client, config: Config) -> Self {
        Self {
            targets,
            client,
            config,
            extra_headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers = headers;
        self
    }

    /// Streams `size` bytes starting at `offset` on the meta-chunk
    /// (`None` size = to the end). Replicas are tried in list order; a
    /// mid-stream fault resumes on the next one with
    /// `Range: bytes=<already-read>-`.
    pub fn stream(self, offset: u64, size: Option<u64>) -> ByteStream {
        let (tx, stream) = ByteStream::channel();
        tokio::spawn(self.run(offset, size, tx));
        stream
    }

    async fn run(
        self,
        offset: u64,
        size: Option<u64>,
        tx: flume::Sender<Result<Bytes, StoreError>>,
    ) {
        if size == Some(0) {
            return;
        }
        let mut begin = offset;
        let end = size.map(|s| offset + s - 1);
        let read_chunk_size = self.config.io.read_chunk_size;

        let mut cursor = 0;
        'targets: while cursor < self.targets.len() {
            let target = &self.targets[cursor];
            cursor += 1;

            let range = if begin == 0 && end.is_none() {
                None
            } else {
                Some((Some(begin), end))
            };
            let mut response = match get_chunk(
                &self.client,
                &target.url,
                range,
                &self.extra_headers,
                &self.config.timeouts,
            )
            .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("replica {} failed: {}", target.url, e);
                    continue;
                }
            };

            // a ranged response must start where we asked
            if range.is_some() {
                let starts_ok = match response
                    .headers()
                    .get(reqwest::header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                {
                    None => true,
                    Some(raw) => {
                        matches!(parse_content_range(raw), Ok((start, _, _)) if start == begin)
                    }
                };
                if !starts_ok {
                    warn!("replica {} answered the wrong range", target.url);
                    continue;
                }
            }

            loop {
                match read_body_chunk(&mut response, &self.config.timeouts).await {
                    Ok(Some(mut block)) => {
                        if let Some(end) = end {
                            let remaining = end - begin + 1;
                            if block.len() as u64 > remaining {
                                block.truncate(remaining as usize);
                            }
                        }
                        while !block.is_empty() {
                            let piece = block.split_to(read_chunk_size.min(block.len()));
                            begin += piece.len() as u64;
                            if tx.send_async(Ok(piece)).await.is_err() {
                                // caller went away: not an error
                                return;
                            }
                        }
                        if let Some(end) = end {
                            if begin > end {
                                return;
                            }
                        }
                    }
                    Ok(None) => match end {
                        None => return,
                        Some(end) if begin > end => return,
                        Some(_) => {
                            warn!("replica {} ended early, failing over", target.url);
                            continue 'targets;
                        }
                    },
                    Err(e) => {
                        debug!("replica {} fault after {} bytes: {}", target.url, begin, e);
                        continue 'targets;
                    }
                }
            }
        }

        let _ = tx
            .send_async(Err(StoreError::UnrecoverableRead(format!(
                "all {} replicas failed",
                self.targets.len()
            ))))
            .await;
    }
}
