//! `oxistore` — client-side chunk streaming engine for a distributed
//! object store.
//!
//! Content is split into **meta-chunks**; each meta-chunk is stored on
//! several blob servers either by n-way replication or by (k, m) erasure
//! coding. This crate implements the concurrent pipeline that streams
//! bytes out to those servers under a quorum policy and streams them back
//! into a single caller-visible byte stream:
//!
//! ```text
//!  write:  DataSource ──► content::write ──► replication::write / ec::write
//!                                             │ fan-out, framed PUT
//!                                             ▼
//!                                         blob servers
//!
//!  read:   blob servers ──► replication::read / ec::read ──► content::read
//!                            fail-over / fragment decode      │
//!                                                             ▼
//!                                                         ByteStream
//! ```
//!
//! The directory / proxy service that resolves chunk locations is an
//! external collaborator, reachable only through [`proxy::ProxyOps`].

pub mod common;
pub mod config;
pub mod content;
pub mod ec;
pub mod proxy;
pub mod replication;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use common::errors::{Seconds, StoreError};
pub use common::stream::ByteStream;
pub use config::Config;
pub use content::read::read_content;
pub use content::source::{BufferSource, DataSource, ReaderSource};
pub use content::write::write_content;
pub use content::{
    ChunkInfo, ChunkPosition, ChunkTarget, ChunksLayout, ContentDescriptor, ContentWriteResult,
    FragmentSub, MetaChunkWriteResult,
};
pub use storage::method::StorageMethod;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StoreError>;
