//! Caller-supplied byte sources for the write pipelines.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Where the bytes of a content come from.
///
/// The pipelines call `read` with the block size they can absorb; an
/// empty result means end of stream. Errors abort the whole write.
#[async_trait]
pub trait DataSource: Send {
    async fn read(&mut self, max: usize) -> std::io::Result<Bytes>;
}

/// In-memory source.
#[derive(Debug, Clone)]
pub struct BufferSource {
    data: Bytes,
}

impl BufferSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl DataSource for BufferSource {
    async fn read(&mut self, max: usize) -> std::io::Result<Bytes> {
        let n = max.min(self.data.len());
        Ok(self.data.split_to(n))
    }
}

/// Adapter over any `AsyncRead`.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> DataSource for ReaderSource<R> {
    async fn read(&mut self, max: usize) -> std::io::Result<Bytes> {
        let mut buf = BytesMut::with_capacity(max);
        while buf.len() < max {
            if self.reader.read_buf(&mut buf).await? == 0 {
                break;
            }
        }
        Ok(buf.freeze())
    }
}
