//! Interface to the directory / proxy service.
//!
//! The streaming engine never talks to the directory itself: callers
//! resolve the chunk layout first, run the pipelines, then commit. This
//! trait is the seam those callers plug their client into.

use async_trait::async_trait;

use crate::Result;
use crate::content::{ChunkInfo, ChunksLayout, ContentDescriptor};

#[async_trait]
pub trait ProxyOps: Send + Sync {
    /// Resolves a content into its metadata and chunk layout.
    async fn resolve_chunks(&self, content_id: &str) -> Result<(ContentDescriptor, ChunksLayout)>;

    /// Commits the chunks of a finished write.
    async fn commit(&self, sysmeta: &ContentDescriptor, chunks: &[ChunkInfo]) -> Result<()>;

    /// Deletes a content.
    async fn delete(&self, content_id: &str) -> Result<()>;

    /// Fetches the metadata of a content.
    async fn fetch_meta(&self, content_id: &str) -> Result<ContentDescriptor>;
}
