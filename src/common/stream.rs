//! `ByteStream` — the caller-visible side of a read pipeline.
//!
//! Producer tasks push blocks into a bounded flume channel; the consumer
//! pulls them here. Dropping the stream closes the channel, which makes
//! every producer `send` fail and tears the pipeline down — that is the
//! cancellation path, and it is idempotent.

use bytes::Bytes;
use futures::Stream;

use crate::common::errors::StoreError;

type Item = Result<Bytes, StoreError>;

#[derive(Debug)]
pub struct ByteStream {
    rx: flume::Receiver<Item>,
}

impl ByteStream {
    /// Bounded producer/consumer pair. Capacity 1 keeps producers in
    /// lock-step with the consumer.
    pub(crate) fn channel() -> (flume::Sender<Item>, ByteStream) {
        let (tx, rx) = flume::bounded(1);
        (tx, ByteStream { rx })
    }

    /// Next block of bytes, `None` on end of stream.
    pub async fn next(&mut self) -> Option<Item> {
        self.rx.recv_async().await.ok()
    }

    /// Drain the stream into one buffer. Convenience for small reads.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.extend_from_slice(&item?);
        }
        Ok(out)
    }

    /// Adapter for `futures` combinators.
    pub fn into_stream(self) -> impl Stream<Item = Item> {
        self.rx.into_stream()
    }
}
