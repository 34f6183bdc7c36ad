//! Read driver: maps an absolute object range onto the meta-chunks it
//! touches and concatenates their streams in order.

use reqwest::Client;

use crate::common::errors::StoreError;
use crate::common::stream::ByteStream;
use crate::config::Config;
use crate::content::{ChunkTarget, ChunksLayout, ContentDescriptor};
use crate::ec::read::EcMetaChunkReader;
use crate::replication::read::ReplicatedMetaChunkReader;
use crate::storage::method::{StorageMethod, StorageMethodRegistry};
use crate::storage::range::{RangeBound, obj_range_to_meta_chunk_ranges, resolve_ranges};

struct Selection {
    targets: Vec<ChunkTarget>,
    meta_size: u64,
    range: (RangeBound, RangeBound),
}

/// Streams `range` of the content (`None` = all of it) out of its chunk
/// layout. Fails with `RangeNotSatisfiable` when no meta-chunk overlaps
/// the requested range.
pub async fn read_content(
    sysmeta: &ContentDescriptor,
    layout: &ChunksLayout,
    range: Option<(RangeBound, RangeBound)>,
    client: &Client,
    config: &Config,
) -> Result<ByteStream, StoreError> {
    let method = StorageMethodRegistry::global().load(&sysmeta.chunk_method)?;
    let meta_sizes = layout.meta_sizes();

    let selections: Vec<Selection> = match range {
        None => layout
            .iter()
            .zip(&meta_sizes)
            .map(|((_, targets), meta_size)| Selection {
                targets: targets.to_vec(),
                meta_size: *meta_size,
                range: (None, None),
            })
            .collect(),
        Some((start, end)) => {
            // make the object range absolute up front, then map it
            let (start, end) = resolve_ranges(&[(start, end)], sysmeta.length)
                .first()
                .copied()
                .ok_or(StoreError::RangeNotSatisfiable)?;
            let end = end.min(sysmeta.length - 1);

            let local_ranges = obj_range_to_meta_chunk_ranges(Some(start), Some(end), &meta_sizes);
            if local_ranges.is_empty() {
                return Err(StoreError::RangeNotSatisfiable);
            }

            let groups: Vec<&[ChunkTarget]> = layout.iter().map(|(_, g)| g).collect();
            local_ranges
                .into_iter()
                .map(|(index, range)| Selection {
                    targets: groups[index].to_vec(),
                    meta_size: meta_sizes[index],
                    range,
                })
                .collect()
        }
    };

    let (tx, stream) = ByteStream::channel();
    let client = client.clone();
    let config = config.clone();
    tokio::spawn(async move {
        for selection in selections {
            let mut sub = match &method {
                StorageMethod::Replicated(_) => {
                    let offset = selection.range.0.unwrap_or(0);
                    let size = selection.range.1.map(|end| end - offset + 1);
                    ReplicatedMetaChunkReader::new(
                        selection.targets,
                        client.clone(),
                        config.clone(),
                    )
                    .stream(offset, size)
                }
                StorageMethod::ErasureCoded(ec) => {
                    let reader = EcMetaChunkReader::new(
                        selection.targets,
                        ec.clone(),
                        selection.meta_size,
                        client.clone(),
                        config.clone(),
                    );
                    match reader.stream(selection.range.0, selection.range.1).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = tx.send_async(Err(e)).await;
                            return;
                        }
                    }
                }
            };

            while let Some(item) = sub.next().await {
                let is_err = item.is_err();
                if tx.send_async(item).await.is_err() || is_err {
                    return;
                }
            }
        }
    });
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ChunkPosition;
    use crate::test_support::{GetBehavior, GetServer, sysmeta};

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 % 251) as u8).collect()
    }

    async fn replicated_layout(data: &[u8], chunk_size: usize) -> (Vec<GetServer>, ChunksLayout) {
        let mut servers = Vec::new();
        let mut targets = Vec::new();
        for (meta, slice) in data.chunks(chunk_size).enumerate() {
            let server = GetServer::start(GetBehavior::Serve(slice.to_vec())).await;
            targets.push(ChunkTarget {
                url: server.url(&format!("m{}", meta)),
                pos: ChunkPosition::replica(meta),
                size: Some(slice.len() as u64),
            });
            servers.push(server);
        }
        (servers, ChunksLayout::from_targets(targets))
    }

    #[tokio::test]
    async fn full_content_read() {
        let data = sample(2500);
        let (_servers, layout) = replicated_layout(&data, 1024).await;
        let mut sysmeta = sysmeta("plain");
        sysmeta.length = data.len() as u64;

        let stream = read_content(
            &sysmeta,
            &layout,
            None,
            &reqwest::Client::new(),
            &Config::default(),
        )
        .await
        .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), data);
    }

    #[tokio::test]
    async fn range_spanning_meta_chunks() {
        let data = sample(3000);
        let (_servers, layout) = replicated_layout(&data, 1024).await;
        let mut sysmeta = sysmeta("plain");
        sysmeta.length = data.len() as u64;

        let stream = read_content(
            &sysmeta,
            &layout,
            Some((Some(1000), Some(2200))),
            &reqwest::Client::new(),
            &Config::default(),
        )
        .await
        .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), &data[1000..=2200]);
    }

    #[tokio::test]
    async fn suffix_range() {
        let data = sample(2048);
        let (_servers, layout) = replicated_layout(&data, 1024).await;
        let mut sysmeta = sysmeta("plain");
        sysmeta.length = data.len() as u64;

        let stream = read_content(
            &sysmeta,
            &layout,
            Some((None, Some(100))),
            &reqwest::Client::new(),
            &Config::default(),
        )
        .await
        .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), &data[2048 - 100..]);
    }

    // One EC meta-chunk resolved through the registry-built method.
    #[tokio::test]
    async fn ec_content_ranged_read() {
        use crate::storage::codec::{EcCodec, ReedSolomonCodec};
        use crate::test_support::ec_target;

        let data = sample(1000);
        // the whole content fits in one undersized segment
        let codec = ReedSolomonCodec::new(2, 1);
        let fragments = codec.encode(&data).unwrap();

        let mut targets = Vec::new();
        let mut servers = Vec::new();
        for (slot, fragment) in fragments.into_iter().enumerate() {
            let server = GetServer::start(GetBehavior::Serve(fragment.to_vec())).await;
            let mut target = ec_target(&server.url(&format!("f{}", slot)), 0, slot, 2);
            target.size = Some(data.len() as u64);
            targets.push(target);
            servers.push(server);
        }
        let layout = ChunksLayout::from_targets(targets);

        let mut sysmeta = sysmeta("ec/k=2,m=1,algo=liberasurecode_rs_vand");
        sysmeta.length = data.len() as u64;

        let stream = read_content(
            &sysmeta,
            &layout,
            Some((Some(100), Some(599))),
            &reqwest::Client::new(),
            &Config::default(),
        )
        .await
        .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), &data[100..=599]);
    }

    #[tokio::test]
    async fn out_of_bounds_range_is_416() {
        let data = sample(500);
        let (_servers, layout) = replicated_layout(&data, 1024).await;
        let mut sysmeta = sysmeta("plain");
        sysmeta.length = data.len() as u64;

        let err = read_content(
            &sysmeta,
            &layout,
            Some((Some(9000), None)),
            &reqwest::Client::new(),
            &Config::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::RangeNotSatisfiable));
    }
}
