//! Test doubles shared by the pipeline tests: scripted in-process blob
//! servers and a trivial XOR codec for exercising the codec seam.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::common::errors::StoreError;
use crate::content::{ChunkPosition, ChunkTarget, ContentDescriptor, FragmentSub};
use crate::storage::codec::{EcCodec, FRAGMENT_HEADER_LEN, make_fragment};

pub(crate) fn sysmeta(chunk_method: &str) -> ContentDescriptor {
    ContentDescriptor {
        content_id: "705229BB7F330500A65C3A49A3116B83".into(),
        version: 1463998577463950,
        container_id: "3E32B63E6039FD3104F63BFAE034FADAA823371DD64599A8779BA02B3439A268".into(),
        path: "test".into(),
        length: 0,
        mime_type: "application/octet-stream".into(),
        policy: "TEST".into(),
        chunk_method: chunk_method.into(),
        chunk_size: 1_048_576,
    }
}

pub(crate) fn replica_target(url: &str, meta: usize) -> ChunkTarget {
    ChunkTarget {
        url: url.to_string(),
        pos: ChunkPosition::replica(meta),
        size: None,
    }
}

pub(crate) fn ec_target(url: &str, meta: usize, slot: usize, k: usize) -> ChunkTarget {
    let sub = if slot < k {
        FragmentSub::Data(slot)
    } else {
        FragmentSub::Parity(slot - k)
    };
    ChunkTarget {
        url: url.to_string(),
        pos: ChunkPosition::fragment(meta, sub),
        size: None,
    }
}

/// A freshly closed port: connecting is refused immediately.
pub(crate) async fn dead_target() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/dead", addr)
}

// ─── PUT side ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) enum PutBehavior {
    /// Read the whole body, answer with this status.
    Respond(u16),
    /// Read the whole body, never answer.
    Stall,
}

#[derive(Debug, Clone)]
pub(crate) struct PutRecord {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl PutRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Scripted blob server for the upload pipelines. Only completely
/// transferred bodies are recorded.
pub(crate) struct PutServer {
    addr: SocketAddr,
    records: Arc<Mutex<Vec<PutRecord>>>,
}

impl PutServer {
    pub async fn start(behavior: PutBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let records = Arc::new(Mutex::new(Vec::new()));
        let accept_records = records.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_put(stream, behavior, accept_records.clone()));
            }
        });
        Self { addr, records }
    }

    pub fn url(&self, chunk_id: &str) -> String {
        format!("http://{}/{}", self.addr, chunk_id)
    }

    pub fn records(&self) -> Vec<PutRecord> {
        self.records.lock().clone()
    }
}

async fn handle_put(
    mut stream: TcpStream,
    behavior: PutBehavior,
    records: Arc<Mutex<Vec<PutRecord>>>,
) {
    let Some((headers, leftover)) = read_head(&mut stream).await else {
        return;
    };
    let Some(body) = read_chunked_body(&mut stream, leftover).await else {
        return;
    };
    records.lock().push(PutRecord { headers, body });

    match behavior {
        PutBehavior::Respond(status) => {
            let reason = match status {
                201 => "Created",
                500 => "Internal Server Error",
                _ => "Whatever",
            };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status, reason
            );
            let _ = stream.write_all(response.as_bytes()).await;
        }
        PutBehavior::Stall => {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        }
    }
}

// ─── GET side ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum GetBehavior {
    /// Serve the body, honoring `Range`.
    Serve(Vec<u8>),
    /// Serve the (ranged) body but drop the connection after
    /// `die_after` bytes.
    ServeThenDie { data: Vec<u8>, die_after: usize },
    /// Answer with a bare status and no body.
    Status(u16),
}

#[derive(Debug, Clone)]
pub(crate) struct GetRecord {
    pub headers: HashMap<String, String>,
}

impl GetRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

pub(crate) struct GetServer {
    addr: SocketAddr,
    records: Arc<Mutex<Vec<GetRecord>>>,
}

impl GetServer {
    pub async fn start(behavior: GetBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let records = Arc::new(Mutex::new(Vec::new()));
        let behavior = Arc::new(behavior);
        let accept_records = records.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_get(stream, behavior.clone(), accept_records.clone()));
            }
        });
        Self { addr, records }
    }

    pub fn url(&self, chunk_id: &str) -> String {
        format!("http://{}/{}", self.addr, chunk_id)
    }

    pub fn records(&self) -> Vec<GetRecord> {
        self.records.lock().clone()
    }
}

async fn handle_get(
    mut stream: TcpStream,
    behavior: Arc<GetBehavior>,
    records: Arc<Mutex<Vec<GetRecord>>>,
) {
    let Some((headers, _leftover)) = read_head(&mut stream).await else {
        return;
    };
    let range = headers.get("range").cloned();
    records.lock().push(GetRecord { headers });

    let (data, die_after) = match &*behavior {
        GetBehavior::Status(status) => {
            let response = format!(
                "HTTP/1.1 {} Whatever\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            let _ = stream.write_all(response.as_bytes()).await;
            return;
        }
        GetBehavior::Serve(data) => (data, None),
        GetBehavior::ServeThenDie { data, die_after } => (data, Some(*die_after)),
    };

    let total = data.len();
    let (start, end, status) = match range.as_deref().and_then(parse_range) {
        None => (0, total.saturating_sub(1), 200),
        Some((start, end)) => {
            if start >= total {
                let response = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes()).await;
                return;
            }
            (start, end.min(total - 1), 206)
        }
    };
    let body = if total == 0 { &data[..] } else { &data[start..=end] };

    let mut head = format!("HTTP/1.1 {} OK\r\nContent-Length: {}\r\n", status, body.len());
    if status == 206 {
        head.push_str(&format!("Content-Range: bytes {}-{}/{}\r\n", start, end, total));
    }
    head.push_str("Connection: close\r\n\r\n");
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    match die_after {
        None => {
            let _ = stream.write_all(body).await;
        }
        Some(cut) => {
            let _ = stream.write_all(&body[..cut.min(body.len())]).await;
            let _ = stream.flush().await;
            // dropping the socket now leaves the body short
        }
    }
}

/// `bytes=a-b`, `bytes=a-` or `bytes=-n` against a known total is all
/// the mock needs.
fn parse_range(value: &str) -> Option<(usize, usize)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    match (start, end) {
        ("", n) => {
            let _suffix: usize = n.parse().ok()?;
            None // suffix handled by caller via resolve; unused in tests
        }
        (s, "") => Some((s.parse().ok()?, usize::MAX - 1)),
        (s, e) => Some((s.parse().ok()?, e.parse().ok()?)),
    }
}

// ─── shared HTTP plumbing ─────────────────────────────────────────────────────

async fn read_head(stream: &mut TcpStream) -> Option<(HashMap<String, String>, Vec<u8>)> {
    let mut buf: Vec<u8> = Vec::new();
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if !fill(stream, &mut buf).await {
            return None;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let headers = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    Some((headers, buf.split_off(head_end)))
}

async fn read_chunked_body(stream: &mut TcpStream, mut buf: Vec<u8>) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = loop {
            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                break pos;
            }
            if !fill(stream, &mut buf).await {
                return None;
            }
        };
        let size = usize::from_str_radix(String::from_utf8_lossy(&buf[..line_end]).trim(), 16).ok()?;
        buf.drain(..line_end + 2);
        if size == 0 {
            return Some(body);
        }
        while buf.len() < size + 2 {
            if !fill(stream, &mut buf).await {
                return None;
            }
        }
        body.extend_from_slice(&buf[..size]);
        buf.drain(..size + 2);
    }
}

async fn fill(stream: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
    let mut block = [0u8; 4096];
    match stream.read(&mut block).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&block[..n]);
            true
        }
    }
}

// ─── XOR codec ────────────────────────────────────────────────────────────────

/// k data fragments plus one XOR parity fragment. Enough structure to
/// drive the EC pipelines without a real Reed-Solomon backend.
#[derive(Debug)]
pub(crate) struct XorCodec {
    k: usize,
}

impl XorCodec {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    fn shard_len(&self, segment_len: usize) -> usize {
        segment_len.div_ceil(self.k)
    }
}

impl EcCodec for XorCodec {
    fn data_fragments(&self) -> usize {
        self.k
    }

    fn parity_fragments(&self) -> usize {
        1
    }

    fn encode(&self, segment: &[u8]) -> Result<Vec<Bytes>, StoreError> {
        if segment.is_empty() {
            return Ok(vec![Bytes::new(); self.k + 1]);
        }
        let shard_len = self.shard_len(segment.len());
        let mut padded = vec![0u8; shard_len * self.k];
        padded[..segment.len()].copy_from_slice(segment);

        let mut fragments = Vec::with_capacity(self.k + 1);
        let mut parity = vec![0u8; shard_len];
        for i in 0..self.k {
            let shard = &padded[i * shard_len..(i + 1) * shard_len];
            for (p, b) in parity.iter_mut().zip(shard) {
                *p ^= b;
            }
            fragments.push(make_fragment(i, segment.len(), shard));
        }
        fragments.push(make_fragment(self.k, segment.len(), &parity));
        Ok(fragments)
    }

    fn decode(&self, fragments: &[Option<Bytes>]) -> Result<Bytes, StoreError> {
        let missing_data: Vec<usize> = (0..self.k).filter(|i| fragments[*i].is_none()).collect();
        if missing_data.len() > 1 || (missing_data.len() == 1 && fragments[self.k].is_none()) {
            return Err(StoreError::Codec("xor codec lost too many fragments".into()));
        }
        let present = fragments.iter().flatten().next().unwrap();
        if present.is_empty() {
            return Ok(Bytes::new());
        }
        let segment_len =
            u32::from_be_bytes(present[4..8].try_into().unwrap()) as usize;
        let shard_len = present.len() - FRAGMENT_HEADER_LEN;

        let mut segment = BytesMut::with_capacity(self.k * shard_len);
        for i in 0..self.k {
            match &fragments[i] {
                Some(frag) => segment.extend_from_slice(&frag[FRAGMENT_HEADER_LEN..]),
                None => {
                    // rebuild from parity
                    let mut shard = fragments[self.k].as_ref().unwrap()[FRAGMENT_HEADER_LEN..].to_vec();
                    for (j, frag) in fragments.iter().enumerate().take(self.k) {
                        if j == i {
                            continue;
                        }
                        for (s, b) in shard.iter_mut().zip(&frag.as_ref().unwrap()[FRAGMENT_HEADER_LEN..]) {
                            *s ^= b;
                        }
                    }
                    segment.extend_from_slice(&shard);
                }
            }
        }
        segment.truncate(segment_len);
        Ok(segment.freeze())
    }

    fn fragment_size(&self, segment_size: u64) -> u64 {
        FRAGMENT_HEADER_LEN as u64 + self.shard_len(segment_size as usize) as u64
    }

    fn min_parity_needed(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_round_trip_with_one_loss() {
        let codec = XorCodec::new(3);
        let segment: Vec<u8> = (0..200u8).collect();
        let fragments = codec.encode(&segment).unwrap();
        assert_eq!(fragments.len(), 4);

        for lost in 0..3 {
            let mut slots: Vec<Option<Bytes>> = fragments.iter().cloned().map(Some).collect();
            slots[lost] = None;
            assert_eq!(&codec.decode(&slots).unwrap()[..], &segment[..], "lost {}", lost);
        }
    }
}
