//! Search engine client: thin wrapper over the engine's index, document,
//! and cluster APIs.
//!
//! Dispositions follow the pipeline's contract: a missing document or
//! index on get/delete is absent (`false`/`None`), never an error; an
//! index create that loses a race warns and continues; malformed search
//! bodies surface as `BadRequest` and are never retried.

use crate::error::{ensure_success, ClientError, Result};
use crate::pool::{Pool, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_POOL_SIZE};
use crate::retry::with_retry;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// One search hit: document id, relevance score, stored document.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: Option<f64>,
    pub document: Value,
}

/// A decoded page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchHitPage {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// The search-engine seam.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Create a physical index, optionally with an engine settings
    /// template. Racing creates warn and succeed.
    async fn create_index(&self, name: &str, settings: Option<&Value>) -> Result<()>;

    /// Delete a physical index. Returns false when it was absent.
    async fn delete_index(&self, name: &str) -> Result<bool>;

    /// Check whether an index exists.
    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// Insert or fully replace one document.
    async fn upsert_document(&self, index: &str, id: &str, document: &Value) -> Result<()>;

    /// Remove one document. Returns false when it was absent.
    async fn delete_document(&self, index: &str, id: &str) -> Result<bool>;

    /// Fetch one document's source, or None when absent.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Insert or replace a batch of documents in one request.
    async fn bulk_upsert(&self, index: &str, documents: &[(String, Value)]) -> Result<()>;

    /// Run a raw engine query against one index.
    async fn search(&self, index: &str, body: &Value) -> Result<SearchHitPage>;

    /// Count documents in one index.
    async fn count(&self, index: &str) -> Result<u64>;

    /// Make recent writes visible to search.
    async fn refresh(&self, index: &str) -> Result<()>;

    /// Engine reachability probe.
    async fn health(&self) -> Result<bool>;
}

/// HTTP client for an Elasticsearch-compatible engine.
pub struct ElasticClient {
    base_url: String,
    pool: Pool<reqwest::Client>,
}

impl ElasticClient {
    /// Create a client against the engine's base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_pool_size(base_url, DEFAULT_POOL_SIZE)
    }

    /// Create a client with an explicit pool size.
    pub fn with_pool_size(base_url: impl Into<String>, pool_size: usize) -> Result<Self> {
        let mut handles = Vec::with_capacity(pool_size);
        for _ in 0..pool_size.max(1) {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .connect_timeout(Duration::from_secs(10))
                .build()?;
            handles.push(client);
        }
        let base_url = base_url.into();
        Ok(ElasticClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            pool: Pool::new(handles, DEFAULT_ACQUIRE_TIMEOUT),
        })
    }

    fn index_url(&self, index: &str) -> String {
        format!("{}/{}", self.base_url, index)
    }

    fn doc_url(&self, index: &str, id: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, index, encode_path_segment(id))
    }

    fn decode_hits(body: Value) -> SearchHitPage {
        let total = body
            .pointer("/hits/total/value")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .map(|h| SearchHit {
                        id: h
                            .get("_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        score: h.get("_score").and_then(Value::as_f64),
                        document: h.get("_source").cloned().unwrap_or(Value::Null),
                    })
                    .collect()
            })
            .unwrap_or_default();
        SearchHitPage { total, hits }
    }
}

/// Percent-encode a document id for use as a URL path segment.
fn encode_path_segment(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[async_trait]
impl SearchEngine for ElasticClient {
    async fn create_index(&self, name: &str, settings: Option<&Value>) -> Result<()> {
        let body = settings.cloned().unwrap_or_else(|| json!({}));
        let body = &body;
        let result = with_retry("engine.create_index", || async move {
            let client = self.pool.acquire().await?;
            let response = client.put(self.index_url(name)).json(body).send().await?;
            ensure_success(response).await?;
            Ok(())
        })
        .await;

        match result {
            Err(ClientError::AlreadyExists(_)) => {
                tracing::warn!(index = name, "index already exists, continuing");
                Ok(())
            }
            // The engine reports a racing create as a 400 with a
            // dedicated exception type rather than a 409.
            Err(ClientError::BadRequest(body)) if body.contains("resource_already_exists") => {
                tracing::warn!(index = name, "index already exists, continuing");
                Ok(())
            }
            other => other,
        }
    }

    async fn delete_index(&self, name: &str) -> Result<bool> {
        let result = with_retry("engine.delete_index", || async move {
            let client = self.pool.acquire().await?;
            let response = client.delete(self.index_url(name)).send().await?;
            ensure_success(response).await?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => Ok(true),
            Err(ClientError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let result = with_retry("engine.index_exists", || async move {
            let client = self.pool.acquire().await?;
            let response = client.head(self.index_url(name)).send().await?;
            ensure_success(response).await?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => Ok(true),
            Err(ClientError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn upsert_document(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        with_retry("engine.upsert_document", || async move {
            let client = self.pool.acquire().await?;
            let response = client
                .put(self.doc_url(index, id))
                .json(document)
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
        .await
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<bool> {
        let result = with_retry("engine.delete_document", || async move {
            let client = self.pool.acquire().await?;
            let response = client.delete(self.doc_url(index, id)).send().await?;
            ensure_success(response).await?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => Ok(true),
            Err(ClientError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let result = with_retry("engine.get_document", || async move {
            let client = self.pool.acquire().await?;
            let response = client.get(self.doc_url(index, id)).send().await?;
            let response = ensure_success(response).await?;
            Ok(response.json::<Value>().await?)
        })
        .await;

        match result {
            Ok(body) => Ok(body.get("_source").cloned()),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn bulk_upsert(&self, index: &str, documents: &[(String, Value)]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for (id, document) in documents {
            let action = json!({"index": {"_index": index, "_id": id}});
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(document)?);
            body.push('\n');
        }
        let body = &body;

        with_retry("engine.bulk_upsert", || async move {
            let client = self.pool.acquire().await?;
            let response = client
                .post(format!("{}/_bulk", self.base_url))
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body.clone())
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
        .await
    }

    async fn search(&self, index: &str, body: &Value) -> Result<SearchHitPage> {
        with_retry("engine.search", || async move {
            let client = self.pool.acquire().await?;
            let response = client
                .post(format!("{}/_search", self.index_url(index)))
                .json(body)
                .send()
                .await?;
            let response = ensure_success(response).await?;
            Ok(Self::decode_hits(response.json::<Value>().await?))
        })
        .await
    }

    async fn count(&self, index: &str) -> Result<u64> {
        with_retry("engine.count", || async move {
            let client = self.pool.acquire().await?;
            let response = client
                .get(format!("{}/_count", self.index_url(index)))
                .send()
                .await?;
            let response = ensure_success(response).await?;
            let body = response.json::<Value>().await?;
            Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0))
        })
        .await
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        with_retry("engine.refresh", || async move {
            let client = self.pool.acquire().await?;
            let response = client
                .post(format!("{}/_refresh", self.index_url(index)))
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
        .await
    }

    async fn health(&self) -> Result<bool> {
        let client = self.pool.acquire().await?;
        let response = client
            .get(format!("{}/_cluster/health", self.base_url))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.json::<Value>().await?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or("red");
        Ok(status != "red")
    }
}

impl std::fmt::Debug for ElasticClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
