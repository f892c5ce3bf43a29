//! Cache-first image retrieval

use crate::cache::FileCache;
use crate::metadata::extract_metadata;
use crate::remote::RemoteFiles;
use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use imageinf_core::{Error, FileReference, ImageMetadata, Principal, Result};
use std::sync::Arc;
use tracing::debug;

/// A decoded image and its metadata
#[derive(Debug, Clone)]
pub struct RetrievedImage {
    pub image: DynamicImage,
    pub metadata: Option<ImageMetadata>,
}

/// Resolves a file reference to a decoded image
#[async_trait]
pub trait ImageRetriever: Send + Sync {
    async fn fetch(&self, principal: &Principal, file: &FileReference) -> Result<RetrievedImage>;
}

/// Serves from the on-disk cache, downloading and caching on a miss.
///
/// Repeated fetches of the same key never reach the remote service.
pub struct CachingRetriever {
    remote: Arc<dyn RemoteFiles>,
    cache: FileCache,
}

impl CachingRetriever {
    pub fn new(remote: Arc<dyn RemoteFiles>, cache: FileCache) -> Self {
        Self { remote, cache }
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    async fn bytes(&self, principal: &Principal, file: &FileReference) -> Result<Bytes> {
        if let Some(data) = self.cache.get(file).await? {
            metrics::counter!("imageinf_cache_hits_total").increment(1);
            debug!(system = %file.system_id, path = %file.path, "Cache hit");
            return Ok(data);
        }

        metrics::counter!("imageinf_cache_misses_total").increment(1);
        let data = self.remote.download(principal, file).await?;
        self.cache.put(file, data.clone()).await?;
        Ok(data)
    }
}

#[async_trait]
impl ImageRetriever for CachingRetriever {
    async fn fetch(&self, principal: &Principal, file: &FileReference) -> Result<RetrievedImage> {
        let data = self.bytes(principal, file).await?;

        tokio::task::spawn_blocking(move || decode(&data))
            .await
            .map_err(|e| Error::internal(format!("decode task failed: {}", e)))?
    }
}

/// Decode image bytes and pull EXIF metadata from the same buffer
pub fn decode(data: &[u8]) -> Result<RetrievedImage> {
    let image = image::load_from_memory(data)
        .map_err(|e| Error::image(format!("failed to decode image: {}", e)))?;
    let metadata = extract_metadata(data);
    Ok(RetrievedImage { image, metadata })
}
