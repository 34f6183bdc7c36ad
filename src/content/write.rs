//! Write driver: walks the meta-chunks of a content in order and feeds
//! the caller's source through the per-meta-chunk pipelines, keeping a
//! single running content checksum.

use md5::{Digest, Md5};
use tracing::debug;

use crate::common::errors::StoreError;
use crate::config::Config;
use crate::content::source::DataSource;
use crate::content::{ChunksLayout, ContentDescriptor, ContentWriteResult};
use crate::ec::write::EcMetaChunkWriter;
use crate::replication::write::ReplicatedMetaChunkWriter;
use crate::storage::method::{StorageMethod, StorageMethodRegistry};

/// Streams `source` into the chunk layout of `sysmeta`.
///
/// The capacity of one meta-chunk is the platform chunk size for
/// replication and `k * chunk_size` rounded down to segment alignment
/// for EC. Writing stops as soon as the source runs dry, even if later
/// meta-chunks were provisioned.
pub async fn write_content(
    sysmeta: &ContentDescriptor,
    layout: &ChunksLayout,
    source: &mut dyn DataSource,
    config: &Config,
) -> Result<ContentWriteResult, StoreError> {
    let method = StorageMethodRegistry::global().load(&sysmeta.chunk_method)?;
    let chunks_count = layout.len();

    let mut checksum = Md5::new();
    let mut bytes_transferred = 0u64;
    let mut chunks = Vec::new();

    for (pos, meta_chunk) in layout.iter() {
        let capacity = meta_chunk_capacity(&method, sysmeta.chunk_size);
        let result = match &method {
            StorageMethod::Replicated(replicated) => {
                ReplicatedMetaChunkWriter::new(sysmeta, meta_chunk, *replicated, chunks_count, config)
                    .stream(source, capacity, &mut checksum)
                    .await?
            }
            StorageMethod::ErasureCoded(ec) => {
                EcMetaChunkWriter::new(sysmeta, meta_chunk, ec.clone(), chunks_count, config)
                    .stream(source, capacity, &mut checksum)
                    .await?
            }
        };

        bytes_transferred += result.bytes_transferred;
        chunks.extend(result.chunks);

        if result.bytes_transferred < capacity {
            // source exhausted before this meta-chunk filled up
            debug!("content complete at meta-chunk {}", pos);
            break;
        }
    }

    Ok(ContentWriteResult {
        chunks,
        bytes_transferred,
        content_checksum: hex::encode(checksum.finalize()),
    })
}

fn meta_chunk_capacity(method: &StorageMethod, chunk_size: u64) -> u64 {
    match method {
        StorageMethod::Replicated(_) => chunk_size,
        StorageMethod::ErasureCoded(ec) => {
            let max = ec.k as u64 * chunk_size;
            max - max % ec.segment_size
        }
    }
}
