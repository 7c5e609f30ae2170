//! Content extraction with a content-addressed disk cache.
//!
//! Attached files are converted to plain text by a remote extractor
//! service. Results are cached on disk under the SHA-256 of the blob;
//! an empty cache file is a negative hit (the extractor produced no
//! text), so repeat failures are not re-extracted.

use crate::error::{ensure_success, Result};
use crate::retry::with_retry;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files larger than this are indexed without their content.
pub const MAXIMUM_FILE_SIZE: u64 = 200 * 1024 * 1024;

/// The content-extractor seam.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Convert a file blob to plain text using the named pipeline.
    async fn extract(&self, blob: &[u8], pipeline: &str) -> Result<String>;
}

/// SHA-256 hex digest of a blob; the cache key.
pub fn blob_digest(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// HTTP implementation of [`ContentExtractor`].
pub struct HttpExtractorClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpExtractorClient {
    /// Create a client against the extractor service.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Extraction of large documents is slow; allow generous time
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(HttpExtractorClient {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractorClient {
    async fn extract(&self, blob: &[u8], pipeline: &str) -> Result<String> {
        with_retry("extractor.extract", || async move {
            let response = self
                .client
                .put(&self.endpoint)
                .query(&[("pipeline", pipeline)])
                .body(blob.to_vec())
                .send()
                .await?;
            let response = ensure_success(response).await?;
            Ok(response.text().await?)
        })
        .await
    }
}

/// On-disk content-addressed cache: one file per SHA-256 digest.
#[derive(Debug, Clone)]
pub struct ExtractorCache {
    dir: PathBuf,
}

impl ExtractorCache {
    /// Create a cache rooted at `dir` (created on first store).
    pub fn new(dir: impl AsRef<Path>) -> Self {
        ExtractorCache {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn entry_path(&self, digest: &str) -> PathBuf {
        self.dir.join(digest)
    }

    /// Look up cached text. `Some("")` is a negative hit.
    pub async fn get(&self, digest: &str) -> Result<Option<String>> {
        let path = self.entry_path(digest);
        tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(crate::error::ClientError::io(format!(
                "failed to read cache entry {}: {}",
                path.display(),
                e
            ))),
        })
        .await
        .map_err(|e| crate::error::ClientError::other(format!("task join error: {}", e)))?
    }

    /// Store extracted text (possibly empty, as a negative entry).
    pub async fn put(&self, digest: &str, text: &str) -> Result<()> {
        let path = self.entry_path(digest);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    crate::error::ClientError::io(format!(
                        "failed to create cache dir {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            // Atomic write via temp file + rename
            let tmp_path = path.with_extension("tmp");
            std::fs::write(&tmp_path, text.as_bytes()).map_err(|e| {
                crate::error::ClientError::io(format!(
                    "failed to write cache entry {}: {}",
                    tmp_path.display(),
                    e
                ))
            })?;
            std::fs::rename(&tmp_path, &path).map_err(|e| {
                crate::error::ClientError::io(format!(
                    "failed to finalize cache entry {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(())
        })
        .await
        .map_err(|e| crate::error::ClientError::other(format!("task join error: {}", e)))?
    }
}

/// An extractor composed with the disk cache.
pub struct CachingExtractor<E> {
    inner: E,
    cache: ExtractorCache,
}

impl<E: ContentExtractor> CachingExtractor<E> {
    pub fn new(inner: E, cache: ExtractorCache) -> Self {
        CachingExtractor { inner, cache }
    }
}

#[async_trait]
impl<E: ContentExtractor> ContentExtractor for CachingExtractor<E> {
    async fn extract(&self, blob: &[u8], pipeline: &str) -> Result<String> {
        let digest = blob_digest(blob);

        if let Some(cached) = self.cache.get(&digest).await? {
            tracing::debug!(digest = %digest, "extractor cache hit");
            return Ok(cached);
        }

        let text = self.inner.extract(blob, pipeline).await?;
        self.cache.put(&digest, &text).await?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingExtractor {
        calls: AtomicU32,
        output: String,
    }

    #[async_trait]
    impl ContentExtractor for CountingExtractor {
        async fn extract(&self, _blob: &[u8], _pipeline: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    #[test]
    fn test_blob_digest() {
        // SHA-256 of the empty string
        assert_eq!(
            blob_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(blob_digest(b"abc").len(), 64);
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtractorCache::new(dir.path());

        assert_eq!(cache.get("deadbeef").await.unwrap(), None);
        cache.put("deadbeef", "extracted text").await.unwrap();
        assert_eq!(
            cache.get("deadbeef").await.unwrap(),
            Some("extracted text".to_string())
        );
    }

    #[tokio::test]
    async fn test_caching_extractor_extracts_once() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = CachingExtractor::new(
            CountingExtractor {
                calls: AtomicU32::new(0),
                output: "text".into(),
            },
            ExtractorCache::new(dir.path()),
        );

        assert_eq!(extractor.extract(b"blob", "default").await.unwrap(), "text");
        assert_eq!(extractor.extract(b"blob", "default").await.unwrap(), "text");
        assert_eq!(extractor.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_negative_cache() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = CachingExtractor::new(
            CountingExtractor {
                calls: AtomicU32::new(0),
                output: String::new(),
            },
            ExtractorCache::new(dir.path()),
        );

        assert_eq!(extractor.extract(b"empty", "default").await.unwrap(), "");
        // Empty result was cached; the extractor is not called again
        assert_eq!(extractor.extract(b"empty", "default").await.unwrap(), "");
        assert_eq!(extractor.inner.calls.load(Ordering::SeqCst), 1);
    }
}
