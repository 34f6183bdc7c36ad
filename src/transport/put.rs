//! Framed chunk upload connection.
//!
//! One TCP connection per target, `PUT` with `Transfer-Encoding:
//! chunked`, frames written by hand: `hex(len)\r\n<bytes>\r\n`, closed
//! by `0\r\n\r\n`. Connect is bounded by the connection timeout, every
//! frame write and the response read by the chunk timeout.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::errors::{Seconds, StoreError};
use crate::config::TimeoutConfig;

const MAX_RESPONSE_HEAD: usize = 16384;

pub struct PutConnection {
    stream: TcpStream,
    chunk_timeout: Duration,
    chunk_seconds: Seconds,
}

impl PutConnection {
    /// Connects and sends the request head within the connection
    /// timeout.
    pub async fn open(
        target_url: &str,
        headers: &[(&'static str, String)],
        timeouts: &TimeoutConfig,
    ) -> Result<Self, StoreError> {
        let unreachable = |reason: String| StoreError::TargetUnreachable { reason };

        let url = reqwest::Url::parse(target_url).map_err(|e| unreachable(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| unreachable(format!("no host in {}", target_url)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let mut head = format!("PUT {} HTTP/1.1\r\n", url.path());
        head.push_str(&format!("Host: {}:{}\r\n", host, port));
        head.push_str("Transfer-Encoding: chunked\r\n");
        for (name, value) in headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");

        let connect = async {
            let mut stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.write_all(head.as_bytes()).await?;
            Ok::<_, std::io::Error>(stream)
        };
        match timeout(timeouts.connection_timeout(), connect).await {
            Err(_) => Err(StoreError::ConnectTimeout(Seconds(timeouts.connection))),
            Ok(Err(e)) => Err(unreachable(e.to_string())),
            Ok(Ok(stream)) => Ok(Self {
                stream,
                chunk_timeout: timeouts.chunk_timeout(),
                chunk_seconds: Seconds(timeouts.chunk),
            }),
        }
    }

    /// Writes one chunked-transfer frame.
    pub async fn send_frame(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let mut frame = BytesMut::with_capacity(data.len() + 16);
        frame.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
        frame.put_slice(data);
        frame.put_slice(b"\r\n");

        match timeout(self.chunk_timeout, self.stream.write_all(&frame)).await {
            Err(_) => Err(StoreError::ChunkWriteTimeout(self.chunk_seconds)),
            Ok(Err(e)) => Err(StoreError::TargetUnreachable {
                reason: e.to_string(),
            }),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Writes the terminating zero-length frame.
    pub async fn finish(&mut self) -> Result<(), StoreError> {
        let terminator = async {
            self.stream.write_all(b"0\r\n\r\n").await?;
            self.stream.flush().await
        };
        match timeout(self.chunk_timeout, terminator).await {
            Err(_) => Err(StoreError::ChunkWriteTimeout(self.chunk_seconds)),
            Ok(Err(e)) => Err(StoreError::TargetUnreachable {
                reason: e.to_string(),
            }),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Reads the response head, drains the body, returns the status.
    pub async fn read_response(&mut self) -> Result<u16, StoreError> {
        let read = async {
            let mut buf = Vec::with_capacity(1024);
            let mut block = [0u8; 1024];
            let head_end = loop {
                if let Some(pos) = find_head_end(&buf) {
                    break pos;
                }
                if buf.len() > MAX_RESPONSE_HEAD {
                    return Err(std::io::Error::other("response head too large"));
                }
                let n = self.stream.read(&mut block).await?;
                if n == 0 {
                    return Err(std::io::Error::other("connection closed before response"));
                }
                buf.extend_from_slice(&block[..n]);
            };

            // drain a Content-Length body so the server sees a clean close
            let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
            let mut remaining = content_length(&head).saturating_sub(buf.len() - head_end);
            while remaining > 0 {
                let n = self.stream.read(&mut block).await?;
                if n == 0 {
                    break;
                }
                remaining = remaining.saturating_sub(n);
            }
            Ok(head)
        };
        match timeout(self.chunk_timeout, read).await {
            Err(_) => Err(StoreError::ChunkReadTimeout(self.chunk_seconds)),
            Ok(Err(e)) => Err(StoreError::TargetUnreachable {
                reason: e.to_string(),
            }),
            Ok(Ok(head)) => parse_status(&head),
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

fn parse_status(head: &str) -> Result<u16, StoreError> {
    head.split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::TargetUnreachable {
            reason: "malformed response status line".to_string(),
        })
}
