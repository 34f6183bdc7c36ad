//! Data model of the engine: content descriptor, chunk targets and
//! positions, the per-content chunk layout, and write results.

pub mod read;
pub mod source;
pub mod write;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::common::errors::StoreError;

/// System metadata of one content, as resolved by the directory.
#[derive(Debug, Clone)]
pub struct ContentDescriptor {
    pub content_id: String,
    /// Monotonically increasing content version.
    pub version: u64,
    pub container_id: String,
    /// Logical object path inside the container.
    pub path: String,
    /// Total content length in bytes.
    pub length: u64,
    pub mime_type: String,
    /// Storage policy name.
    pub policy: String,
    /// Raw `chunk_method` string, e.g. `ec/k=6,m=3,algo=isa_l_rs_vand`.
    pub chunk_method: String,
    /// Platform upper bound on one meta-chunk payload.
    pub chunk_size: u64,
}

/// Sub-position of one EC fragment inside a meta-chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FragmentSub {
    Data(usize),
    Parity(usize),
}

/// Chunk position: `"3"` for a replica of meta-chunk 3, `"3.1"` for its
/// data fragment 1, `"3.p0"` for its first parity fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkPosition {
    pub meta: usize,
    pub sub: Option<FragmentSub>,
}

impl ChunkPosition {
    pub fn replica(meta: usize) -> Self {
        Self { meta, sub: None }
    }

    pub fn fragment(meta: usize, sub: FragmentSub) -> Self {
        Self { meta, sub: Some(sub) }
    }

    /// Slot of this fragment in the `k + m` fragment vector.
    pub fn fragment_slot(&self, k: usize) -> Option<usize> {
        match self.sub? {
            FragmentSub::Data(i) => Some(i),
            FragmentSub::Parity(j) => Some(k + j),
        }
    }
}

impl fmt::Display for ChunkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub {
            None => write!(f, "{}", self.meta),
            Some(FragmentSub::Data(i)) => write!(f, "{}.{}", self.meta, i),
            Some(FragmentSub::Parity(j)) => write!(f, "{}.p{}", self.meta, j),
        }
    }
}

impl FromStr for ChunkPosition {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidStorageMethod(format!("bad chunk position {:?}", s));
        match s.split_once('.') {
            None => Ok(Self {
                meta: s.parse().map_err(|_| invalid())?,
                sub: None,
            }),
            Some((meta, sub)) => {
                let meta = meta.parse().map_err(|_| invalid())?;
                let sub = if let Some(parity) = sub.strip_prefix('p') {
                    FragmentSub::Parity(parity.parse().map_err(|_| invalid())?)
                } else {
                    FragmentSub::Data(sub.parse().map_err(|_| invalid())?)
                };
                Ok(Self {
                    meta,
                    sub: Some(sub),
                })
            }
        }
    }
}

/// One blob-server endpoint holding a replica or a fragment.
#[derive(Debug, Clone)]
pub struct ChunkTarget {
    pub url: String,
    pub pos: ChunkPosition,
    /// Advertised meta-chunk payload size, when the directory knows it.
    pub size: Option<u64>,
}

impl ChunkTarget {
    /// Chunk id: the last path segment of the target URL.
    pub fn chunk_id(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

/// Per-chunk outcome of a write, reported for successes and failures
/// alike so a reconciler can clean up after a partial write.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub url: String,
    pub pos: ChunkPosition,
    pub size: Option<u64>,
    pub hash: Option<String>,
    pub error: Option<String>,
}

impl ChunkInfo {
    pub fn failed(target: &ChunkTarget, error: String) -> Self {
        Self {
            url: target.url.clone(),
            pos: target.pos,
            size: None,
            hash: None,
            error: Some(error),
        }
    }

    pub fn succeeded(target: &ChunkTarget, size: u64, hash: String) -> Self {
        Self {
            url: target.url.clone(),
            pos: target.pos,
            size: Some(size),
            hash: Some(hash),
            error: None,
        }
    }
}

/// Chunk targets grouped by meta-chunk position, ordered within each
/// group by sub-position.
#[derive(Debug, Clone, Default)]
pub struct ChunksLayout {
    meta_chunks: BTreeMap<usize, Vec<ChunkTarget>>,
}

impl ChunksLayout {
    pub fn from_targets(targets: impl IntoIterator<Item = ChunkTarget>) -> Self {
        let mut meta_chunks: BTreeMap<usize, Vec<ChunkTarget>> = BTreeMap::new();
        for target in targets {
            meta_chunks.entry(target.pos.meta).or_default().push(target);
        }
        for group in meta_chunks.values_mut() {
            group.sort_by_key(|t| t.pos);
        }
        Self { meta_chunks }
    }

    pub fn len(&self) -> usize {
        self.meta_chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta_chunks.is_empty()
    }

    pub fn meta_chunk(&self, pos: usize) -> Option<&[ChunkTarget]> {
        self.meta_chunks.get(&pos).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[ChunkTarget])> {
        self.meta_chunks.iter().map(|(pos, g)| (*pos, g.as_slice()))
    }

    /// Advertised payload size of each meta-chunk, in position order.
    /// Every target of a meta-chunk advertises the same payload size;
    /// the first one wins.
    pub fn meta_sizes(&self) -> Vec<u64> {
        self.meta_chunks
            .values()
            .map(|g| g.first().and_then(|t| t.size).unwrap_or(0))
            .collect()
    }
}

/// Outcome of writing one meta-chunk.
#[derive(Debug)]
pub struct MetaChunkWriteResult {
    pub bytes_transferred: u64,
    /// Hex digest of the running content checksum at the end of this
    /// meta-chunk.
    pub checksum: String,
    /// Successful chunks first, then failed chunks with their errors.
    pub chunks: Vec<ChunkInfo>,
}

/// Global outcome of one content write.
#[derive(Debug)]
pub struct ContentWriteResult {
    pub chunks: Vec<ChunkInfo>,
    pub bytes_transferred: u64,
    /// Hex MD5 of every byte the source produced.
    pub content_checksum: String,
}
