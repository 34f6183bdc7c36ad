//! Wire constants: the chunk metadata headers every PUT carries.

use crate::content::{ChunkTarget, ContentDescriptor};

pub const CONTENT_ID: &str = "X-oio-chunk-meta-content-id";
pub const CONTENT_VERSION: &str = "X-oio-chunk-meta-content-version";
pub const CONTENT_PATH: &str = "X-oio-chunk-meta-content-path";
pub const CONTENT_SIZE: &str = "X-oio-chunk-meta-content-size";
pub const CONTENT_CHUNK_METHOD: &str = "X-oio-chunk-meta-content-chunk-method";
pub const CONTENT_MIME_TYPE: &str = "X-oio-chunk-meta-content-mime-type";
pub const CONTENT_POLICY: &str = "X-oio-chunk-meta-content-storage-policy";
pub const CONTENT_CHUNKSNB: &str = "X-oio-chunk-meta-content-chunksnb";
pub const CONTAINER_ID: &str = "X-oio-chunk-meta-container-id";
pub const CHUNK_POS: &str = "X-oio-chunk-meta-chunk-pos";
pub const CHUNK_ID: &str = "X-oio-chunk-meta-chunk-id";

/// Percent-encodes a content path, keeping `/` separators literal.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Request headers for one chunk PUT.
pub fn put_headers(
    sysmeta: &ContentDescriptor,
    target: &ChunkTarget,
    chunks_count: usize,
) -> Vec<(&'static str, String)> {
    vec![
        (CONTENT_ID, sysmeta.content_id.clone()),
        (CONTENT_VERSION, sysmeta.version.to_string()),
        (CONTENT_PATH, encode_path(&sysmeta.path)),
        (CONTENT_SIZE, sysmeta.length.to_string()),
        (CONTENT_CHUNK_METHOD, sysmeta.chunk_method.clone()),
        (CONTENT_MIME_TYPE, sysmeta.mime_type.clone()),
        (CONTENT_POLICY, sysmeta.policy.clone()),
        (CONTENT_CHUNKSNB, chunks_count.to_string()),
        (CONTAINER_ID, sysmeta.container_id.clone()),
        (CHUNK_POS, target.pos.to_string()),
        (CHUNK_ID, target.chunk_id().to_string()),
    ]
}
