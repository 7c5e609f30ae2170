//! The index registry: one `SearchIndex` record per (type, group
//! partition), with an optional persisted copy in the RDF store so
//! indexes survive restart.
//!
//! Each record owns its readiness gate: a watch channel carrying the
//! index status. Status transitions and waiter notification go through
//! the same channel, which excludes the lost-wakeup race between a
//! rebuild finishing and a search request starting to wait.

use crate::error::{IndexerError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use trawl_client::sparql::{escape_string, format_uri};
use trawl_client::{AuthContext, SparqlClient};
use trawl_core::{vocab, AuthGroupSet};

/// Lifecycle status of a search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// Contents are current
    Valid,
    /// Contents are stale; a rebuild is required before use
    Invalid,
    /// A rebuild is in progress; searchers wait on the readiness gate
    Updating,
}

/// One search index partition.
pub struct SearchIndex {
    /// Registry resource URI (used for persistence)
    pub uri: String,
    /// Physical engine index name
    pub name: String,
    /// Document type served
    pub type_name: String,
    /// Canonical group partition
    pub allowed_groups: AuthGroupSet,
    /// Built at startup for a configured group combination
    pub is_eager: bool,
    status: watch::Sender<IndexStatus>,
}

impl SearchIndex {
    /// Create a fresh index record in `Invalid` state.
    ///
    /// The physical name is derived from the partition key, so the same
    /// (type, groups) pair maps onto the same engine index across
    /// restarts.
    pub fn new(type_name: &str, allowed_groups: AuthGroupSet, is_eager: bool) -> Self {
        let name = physical_name(type_name, allowed_groups.key());
        SearchIndex {
            uri: format!("{}{}", vocab::ext::INDEX_RESOURCE_BASE, name),
            name,
            type_name: type_name.to_string(),
            allowed_groups,
            is_eager,
            status: watch::Sender::new(IndexStatus::Invalid),
        }
    }

    /// Rebuild a record loaded from the persisted registry.
    pub fn restored(
        uri: String,
        name: String,
        type_name: String,
        allowed_groups: AuthGroupSet,
        is_eager: bool,
        status: IndexStatus,
    ) -> Self {
        SearchIndex {
            uri,
            name,
            type_name,
            allowed_groups,
            is_eager,
            status: watch::Sender::new(status),
        }
    }

    /// Current status.
    pub fn status(&self) -> IndexStatus {
        *self.status.borrow()
    }

    /// Transition to a new status, waking readiness waiters when the
    /// index leaves `Updating`.
    pub fn set_status(&self, status: IndexStatus) {
        self.status.send_replace(status);
    }

    /// Transition `Invalid → Updating`. Returns true when this caller
    /// won the transition and owns the rebuild.
    pub fn begin_update_if_invalid(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == IndexStatus::Invalid {
                *status = IndexStatus::Updating;
                true
            } else {
                false
            }
        })
    }

    /// Block until the index leaves `Updating`, bounded by `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.status.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|s| *s != IndexStatus::Updating))
            .await
            .is_ok();
        result
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("status", &self.status())
            .finish()
    }
}

/// Derive the physical engine index name from the partition key.
fn physical_name(type_name: &str, group_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(type_name.as_bytes());
    hasher.update(b"|");
    hasher.update(group_key.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("idx-{}-{}", type_name, hex)
}

/// In-memory registry keyed by (type name, canonical group key).
#[derive(Default)]
pub struct IndexRegistry {
    inner: RwLock<HashMap<(String, String), Arc<SearchIndex>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the index for one partition.
    pub fn get(&self, type_name: &str, group_key: &str) -> Option<Arc<SearchIndex>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .get(&(type_name.to_string(), group_key.to_string()))
            .cloned()
    }

    /// Register an index. Two indexes on the same partition are
    /// forbidden.
    pub fn insert(&self, index: Arc<SearchIndex>) -> Result<()> {
        let key = (index.type_name.clone(), index.allowed_groups.key().to_string());
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.contains_key(&key) {
            return Err(IndexerError::DuplicateIndex {
                type_name: index.type_name.clone(),
                groups: index.allowed_groups.key().to_string(),
            });
        }
        inner.insert(key, index);
        Ok(())
    }

    /// All indexes registered for a type, across group partitions.
    pub fn for_type(&self, type_name: &str) -> Vec<Arc<SearchIndex>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .values()
            .filter(|i| i.type_name == type_name)
            .cloned()
            .collect()
    }

    /// Indexes matching the optional filters.
    pub fn matching(
        &self,
        type_name: Option<&str>,
        group_key: Option<&str>,
    ) -> Vec<Arc<SearchIndex>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .values()
            .filter(|i| type_name.is_none_or(|t| i.type_name == t))
            .filter(|i| group_key.is_none_or(|g| i.allowed_groups.key() == g))
            .cloned()
            .collect()
    }

    /// Remove and return the indexes matching the optional filters.
    pub fn remove_matching(
        &self,
        type_name: Option<&str>,
        group_key: Option<&str>,
    ) -> Vec<Arc<SearchIndex>> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let keys: Vec<(String, String)> = inner
            .iter()
            .filter(|(_, i)| type_name.is_none_or(|t| i.type_name == t))
            .filter(|(_, i)| group_key.is_none_or(|g| i.allowed_groups.key() == g))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter().filter_map(|k| inner.remove(&k)).collect()
    }

    /// All registered indexes.
    pub fn all(&self) -> Vec<Arc<SearchIndex>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.values().cloned().collect()
    }
}

/// Write one index record into the RDF store.
pub async fn persist_index(client: &dyn SparqlClient, index: &SearchIndex) -> Result<()> {
    let update = format!(
        "INSERT DATA {{\n  {} a {} ;\n    {} \"{}\" ;\n    {} \"{}\" ;\n    {} \"{}\" ;\n    {} \"{}\"^^{} .\n}}",
        format_uri(&index.uri),
        format_uri(vocab::ext::SEARCH_INDEX),
        format_uri(vocab::ext::INDEX_NAME),
        escape_string(&index.name),
        format_uri(vocab::ext::TYPE_NAME),
        escape_string(&index.type_name),
        format_uri(vocab::ext::ALLOWED_GROUPS),
        escape_string(index.allowed_groups.key()),
        format_uri(vocab::ext::IS_EAGER),
        index.is_eager,
        format_uri(vocab::xsd::BOOLEAN),
    );
    client.update(&update, &AuthContext::Sudo).await?;
    Ok(())
}

/// Remove one persisted index record.
pub async fn remove_persisted_index(client: &dyn SparqlClient, uri: &str) -> Result<()> {
    let update = format!("DELETE WHERE {{ {} ?p ?o }}", format_uri(uri));
    client.update(&update, &AuthContext::Sudo).await?;
    Ok(())
}

/// Load every persisted index record from the RDF store.
///
/// Records with an undecodable group key are skipped with a warning
/// rather than failing the boot.
pub async fn load_persisted_indexes(client: &dyn SparqlClient) -> Result<Vec<SearchIndex>> {
    let query = format!(
        "SELECT ?index ?name ?typeName ?groups ?eager WHERE {{\n  ?index a {} ;\n    {} ?name ;\n    {} ?typeName ;\n    {} ?groups ;\n    {} ?eager .\n}}",
        format_uri(vocab::ext::SEARCH_INDEX),
        format_uri(vocab::ext::INDEX_NAME),
        format_uri(vocab::ext::TYPE_NAME),
        format_uri(vocab::ext::ALLOWED_GROUPS),
        format_uri(vocab::ext::IS_EAGER),
    );
    let results = client.select(&query, &AuthContext::Sudo).await?;

    let mut indexes = Vec::new();
    for binding in &results.results.bindings {
        let Some((uri, name, type_name, groups, eager)) = (|| {
            Some((
                binding.get("index")?.value.clone(),
                binding.get("name")?.value.clone(),
                binding.get("typeName")?.value.clone(),
                binding.get("groups")?.value.clone(),
                binding.get("eager")?.value.clone(),
            ))
        })() else {
            continue;
        };

        let allowed_groups = match AuthGroupSet::from_json(&groups) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(index = %uri, error = %e, "skipping persisted index with undecodable groups");
                continue;
            }
        };

        indexes.push(SearchIndex::restored(
            uri,
            name,
            type_name,
            allowed_groups,
            eager == "true" || eager == "1",
            IndexStatus::Invalid,
        ));
    }
    Ok(indexes)
}
