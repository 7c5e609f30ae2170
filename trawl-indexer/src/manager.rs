//! The index manager: create, rebuild, invalidate, and remove indexes,
//! and gate searches on readiness.
//!
//! An index is created the first time its (type, groups) partition is
//! referenced. Rebuilds run through an [`IndexBuilder`]; while one is in
//! flight the index sits in `Updating` and concurrent callers block on
//! its readiness gate with a bounded timeout.

use crate::builder::DocumentBuilder;
use crate::error::{IndexerError, Result};
use crate::registry::{
    load_persisted_indexes, persist_index, remove_persisted_index, IndexRegistry, IndexStatus,
    SearchIndex,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use trawl_client::sparql::format_uri;
use trawl_client::{AuthContext, SearchEngine, SparqlClient};
use trawl_core::{AuthGroup, AuthGroupSet, TypeDefinition, TypeRegistry};

/// Performs the bulk population of one index.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    async fn build(&self, index: &SearchIndex, type_def: &TypeDefinition) -> Result<()>;
}

/// Configuration for the index manager.
#[derive(Debug, Clone)]
pub struct IndexManagerConfig {
    /// Mirror the registry into the RDF store
    pub persist_indexes: bool,
    /// Engine settings template applied to new indexes
    pub default_settings: Option<Value>,
    /// Group patterns that must never be considered
    pub ignored_allowed_groups: Vec<AuthGroup>,
    /// Group combinations pre-built at startup
    pub eager_indexing_groups: Vec<Vec<AuthGroup>>,
    /// Bound on readiness waits
    pub ready_timeout: Duration,
}

impl Default for IndexManagerConfig {
    fn default() -> Self {
        IndexManagerConfig {
            persist_indexes: false,
            default_settings: None,
            ignored_allowed_groups: Vec::new(),
            eager_indexing_groups: Vec::new(),
            ready_timeout: Duration::from_secs(60),
        }
    }
}

/// Owns the registry and the index lifecycle.
pub struct IndexManager {
    registry: IndexRegistry,
    types: TypeRegistry,
    engine: Arc<dyn SearchEngine>,
    sparql: Arc<dyn SparqlClient>,
    builder: Arc<dyn IndexBuilder>,
    config: IndexManagerConfig,
}

impl IndexManager {
    pub fn new(
        types: TypeRegistry,
        engine: Arc<dyn SearchEngine>,
        sparql: Arc<dyn SparqlClient>,
        builder: Arc<dyn IndexBuilder>,
        config: IndexManagerConfig,
    ) -> Self {
        IndexManager {
            registry: IndexRegistry::new(),
            types,
            engine,
            sparql,
            builder,
            config,
        }
    }

    /// The configured type definitions.
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Restore the persisted registry and pre-build the configured eager
    /// group combinations.
    pub async fn startup(&self) -> Result<()> {
        if self.config.persist_indexes {
            for index in load_persisted_indexes(self.sparql.as_ref()).await? {
                let status = if self.engine.index_exists(&index.name).await.unwrap_or(false) {
                    IndexStatus::Valid
                } else {
                    IndexStatus::Invalid
                };
                index.set_status(status);
                let name = index.name.clone();
                if let Err(e) = self.registry.insert(Arc::new(index)) {
                    tracing::warn!(index = %name, error = %e, "skipping persisted index");
                } else {
                    tracing::info!(index = %name, ?status, "restored persisted index");
                }
            }
        }

        for combination in self.config.eager_indexing_groups.clone() {
            let groups = AuthGroupSet::new(combination);
            for type_def in self.types.all().to_vec() {
                let groups = groups.without(&self.config.ignored_allowed_groups);
                if let Err(e) = self.ensure_ready(&type_def, &groups, false, true).await {
                    tracing::error!(
                        type_name = %type_def.name,
                        groups = %groups.key(),
                        error = %e,
                        "eager index build failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Resolve the indexes serving (type, groups), creating and building
    /// them as needed. A composite type's index is populated from its
    /// constituents by the bulk builder.
    pub async fn fetch_indexes(
        &self,
        type_name: &str,
        allowed_groups: &AuthGroupSet,
        force_update: bool,
    ) -> Result<Vec<Arc<SearchIndex>>> {
        let type_def = self
            .types
            .get(type_name)
            .ok_or_else(|| IndexerError::UnknownType(type_name.to_string()))?
            .clone();
        let groups = allowed_groups.without(&self.config.ignored_allowed_groups);

        let index = self.ensure_ready(&type_def, &groups, force_update, false).await?;
        Ok(vec![index])
    }

    async fn ensure_ready(
        &self,
        type_def: &Arc<TypeDefinition>,
        groups: &AuthGroupSet,
        force_update: bool,
        eager: bool,
    ) -> Result<Arc<SearchIndex>> {
        let index = self.ensure_registered(type_def, groups, eager).await?;

        if force_update {
            index.set_status(IndexStatus::Updating);
            self.rebuild(&index, type_def).await?;
            return Ok(index);
        }

        match index.status() {
            IndexStatus::Valid => Ok(index),
            IndexStatus::Invalid => {
                if index.begin_update_if_invalid() {
                    self.rebuild(&index, type_def).await?;
                } else {
                    // Another caller won the transition; wait for it
                    self.await_ready(&index).await?;
                }
                Ok(index)
            }
            IndexStatus::Updating => {
                self.await_ready(&index).await?;
                Ok(index)
            }
        }
    }

    async fn ensure_registered(
        &self,
        type_def: &Arc<TypeDefinition>,
        groups: &AuthGroupSet,
        eager: bool,
    ) -> Result<Arc<SearchIndex>> {
        if let Some(index) = self.registry.get(&type_def.name, groups.key()) {
            return Ok(index);
        }

        let index = Arc::new(SearchIndex::new(&type_def.name, groups.clone(), eager));
        match self.registry.insert(index.clone()) {
            Ok(()) => {}
            Err(IndexerError::DuplicateIndex { .. }) => {
                // Lost a registration race; use the winner
                return self
                    .registry
                    .get(&type_def.name, groups.key())
                    .ok_or_else(|| IndexerError::other("index vanished during registration"));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            index = %index.name,
            type_name = %type_def.name,
            groups = %groups.key(),
            "allocating search index"
        );
        self.engine
            .create_index(&index.name, self.config.default_settings.as_ref())
            .await?;
        if self.config.persist_indexes {
            persist_index(self.sparql.as_ref(), &index).await?;
        }
        Ok(index)
    }

    async fn rebuild(&self, index: &Arc<SearchIndex>, type_def: &Arc<TypeDefinition>) -> Result<()> {
        tracing::info!(index = %index.name, "rebuilding index");
        match self.builder.build(index, type_def).await {
            Ok(()) => {
                index.set_status(IndexStatus::Valid);
                Ok(())
            }
            Err(e) => {
                index.set_status(IndexStatus::Invalid);
                Err(e)
            }
        }
    }

    async fn await_ready(&self, index: &SearchIndex) -> Result<()> {
        if index.wait_until_ready(self.config.ready_timeout).await {
            Ok(())
        } else {
            Err(IndexerError::ReadinessTimeout(self.config.ready_timeout))
        }
    }

    /// Block until the index leaves `Updating`; false on timeout.
    pub async fn wait_until_ready(&self, index: &SearchIndex, timeout: Duration) -> bool {
        index.wait_until_ready(timeout).await
    }

    /// Flip matching indexes to `Invalid`, in memory only. Returns the
    /// number touched.
    pub fn invalidate_indexes(
        &self,
        type_name: Option<&str>,
        allowed_groups: Option<&AuthGroupSet>,
    ) -> usize {
        let matched = self
            .registry
            .matching(type_name, allowed_groups.map(|g| g.key()));
        for index in &matched {
            tracing::info!(index = %index.name, "invalidating index");
            index.set_status(IndexStatus::Invalid);
        }
        matched.len()
    }

    /// Delete matching physical indexes and their registry entries.
    pub async fn remove_indexes(
        &self,
        type_name: Option<&str>,
        allowed_groups: Option<&AuthGroupSet>,
    ) -> Result<usize> {
        let removed = self
            .registry
            .remove_matching(type_name, allowed_groups.map(|g| g.key()));
        for index in &removed {
            tracing::info!(index = %index.name, "removing index");
            if let Err(e) = self.engine.delete_index(&index.name).await {
                tracing::warn!(index = %index.name, error = %e, "failed to delete engine index");
            }
            if self.config.persist_indexes {
                if let Err(e) = remove_persisted_index(self.sparql.as_ref(), &index.uri).await {
                    tracing::warn!(index = %index.name, error = %e, "failed to remove persisted index");
                }
            }
        }
        Ok(removed.len())
    }

    /// Every registered index of a type, across group partitions.
    pub fn registered_indexes(&self, type_name: &str) -> Vec<Arc<SearchIndex>> {
        self.registry.for_type(type_name)
    }
}

/// Bulk index population: page through the type's root subjects under
/// the index's group-scoped authorization, build each document, and
/// upsert page by page.
pub struct BulkIndexBuilder {
    sparql: Arc<dyn SparqlClient>,
    document_builder: Arc<DocumentBuilder>,
    engine: Arc<dyn SearchEngine>,
    types: TypeRegistry,
    batch_size: usize,
    max_batches: usize,
}

impl BulkIndexBuilder {
    pub fn new(
        sparql: Arc<dyn SparqlClient>,
        document_builder: Arc<DocumentBuilder>,
        engine: Arc<dyn SearchEngine>,
        types: TypeRegistry,
        batch_size: usize,
        max_batches: usize,
    ) -> Self {
        BulkIndexBuilder {
            sparql,
            document_builder,
            engine,
            types,
            batch_size: batch_size.max(1),
            max_batches,
        }
    }

    fn subjects_query(classes: &[String], limit: usize, offset: usize) -> String {
        let types = classes
            .iter()
            .map(|t| format_uri(t))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "SELECT DISTINCT ?s WHERE {{ VALUES ?type {{ {} }} ?s a ?type }} ORDER BY ?s LIMIT {} OFFSET {}",
            types, limit, offset
        )
    }

    fn root_classes(&self, type_def: &TypeDefinition) -> Vec<String> {
        if type_def.is_composite() {
            type_def
                .composite_of
                .iter()
                .filter_map(|name| self.types.get(name))
                .flat_map(|t| t.rdf_types.clone())
                .collect()
        } else {
            type_def.rdf_types.clone()
        }
    }
}

#[async_trait]
impl IndexBuilder for BulkIndexBuilder {
    async fn build(&self, index: &SearchIndex, type_def: &TypeDefinition) -> Result<()> {
        let auth = AuthContext::Groups(index.allowed_groups.clone());
        let classes = self.root_classes(type_def);
        let mut offset = 0;
        let mut batches = 0;
        let mut indexed = 0;

        loop {
            let query = Self::subjects_query(&classes, self.batch_size, offset);
            let subjects = self.sparql.select(&query, &auth).await?.uris("s");
            if subjects.is_empty() {
                break;
            }
            let page_len = subjects.len();

            let mut documents = Vec::with_capacity(page_len);
            for subject in subjects {
                let built = if type_def.is_composite() {
                    self.document_builder
                        .build_composite_document(&subject, type_def, &self.types, &auth)
                        .await?
                } else {
                    self.document_builder
                        .build_document(&subject, type_def, &auth)
                        .await?
                };
                if let Some(document) = built {
                    documents.push((subject, Value::Object(document)));
                }
            }
            indexed += documents.len();
            self.engine.bulk_upsert(&index.name, &documents).await?;

            batches += 1;
            tracing::debug!(index = %index.name, batches, indexed, "bulk build progress");
            if self.max_batches > 0 && batches >= self.max_batches {
                tracing::warn!(
                    index = %index.name,
                    max_batches = self.max_batches,
                    "bulk build stopped at batch cap"
                );
                break;
            }
            if page_len < self.batch_size {
                break;
            }
            offset += self.batch_size;
        }

        tracing::info!(index = %index.name, documents = indexed, "bulk build complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSearchEngine, MockSparqlClient};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts builds; optionally holds each build until released.
    struct CountingBuilder {
        builds: AtomicUsize,
        delay: Option<Duration>,
    }

    impl CountingBuilder {
        fn instant() -> Arc<Self> {
            Arc::new(CountingBuilder {
                builds: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(CountingBuilder {
                builds: AtomicUsize::new(0),
                delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl IndexBuilder for CountingBuilder {
        async fn build(&self, _index: &SearchIndex, _type_def: &TypeDefinition) -> Result<()> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }
    }

    fn types() -> TypeRegistry {
        let session: TypeDefinition = serde_json::from_value(serde_json::json!({
            "name": "session",
            "on_path": "sessions",
            "rdf_types": ["http://example.org/Session"],
            "properties": [{"name": "title", "path": "http://example.org/title"}]
        }))
        .unwrap();
        TypeRegistry::new(vec![session]).unwrap()
    }

    fn groups(names: &[&str]) -> AuthGroupSet {
        AuthGroupSet::new(names.iter().map(|n| AuthGroup::named(*n)).collect())
    }

    fn manager_with(
        builder: Arc<dyn IndexBuilder>,
        config: IndexManagerConfig,
    ) -> (Arc<IndexManager>, Arc<MockSearchEngine>, Arc<MockSparqlClient>) {
        let engine = Arc::new(MockSearchEngine::new());
        let sparql = Arc::new(MockSparqlClient::new());
        let manager = Arc::new(IndexManager::new(
            types(),
            engine.clone(),
            sparql.clone(),
            builder,
            config,
        ));
        (manager, engine, sparql)
    }

    #[tokio::test]
    async fn test_fetch_creates_and_builds_once() {
        let builder = CountingBuilder::instant();
        let (manager, engine, _) =
            manager_with(builder.clone(), IndexManagerConfig::default());

        let first = manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status(), IndexStatus::Valid);
        assert!(engine.index_exists(&first[0].name).await.unwrap());
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);

        // Second fetch reuses the valid index without rebuilding
        let second = manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_group_permutations_share_one_index() {
        let builder = CountingBuilder::instant();
        let (manager, _, _) = manager_with(builder, IndexManagerConfig::default());

        let a = manager
            .fetch_indexes("session", &groups(&["a", "b"]), false)
            .await
            .unwrap();
        let b = manager
            .fetch_indexes("session", &groups(&["b", "a"]), false)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a[0], &b[0]));
    }

    #[tokio::test]
    async fn test_invalidate_triggers_rebuild_on_next_fetch() {
        let builder = CountingBuilder::instant();
        let (manager, _, _) = manager_with(builder.clone(), IndexManagerConfig::default());

        manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();
        assert_eq!(manager.invalidate_indexes(Some("session"), None), 1);

        manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_force_update_rebuilds_valid_index() {
        let builder = CountingBuilder::instant();
        let (manager, _, _) = manager_with(builder.clone(), IndexManagerConfig::default());

        manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();
        manager
            .fetch_indexes("session", &groups(&["public"]), true)
            .await
            .unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_fetch_waits_on_readiness_gate() {
        let builder = CountingBuilder::slow(Duration::from_millis(100));
        let (manager, _, _) = manager_with(builder.clone(), IndexManagerConfig::default());

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .fetch_indexes("session", &groups(&["public"]), false)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Arrives mid-build; waits for the gate instead of rebuilding
        let second = manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();
        assert_eq!(second[0].status(), IndexStatus::Valid);
        assert!(first.await.unwrap().is_ok());
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_readiness_timeout_surfaces() {
        let builder = CountingBuilder::slow(Duration::from_secs(10));
        let (manager, _, _) = manager_with(
            builder,
            IndexManagerConfig {
                ready_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let slow = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .fetch_indexes("session", &groups(&["public"]), false)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await;
        assert!(matches!(result, Err(IndexerError::ReadinessTimeout(_))));
        slow.abort();
    }

    #[tokio::test]
    async fn test_remove_indexes_deletes_engine_index() {
        let builder = CountingBuilder::instant();
        let (manager, engine, _) = manager_with(builder, IndexManagerConfig::default());

        let indexes = manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();
        let name = indexes[0].name.clone();

        assert_eq!(manager.remove_indexes(Some("session"), None).await.unwrap(), 1);
        assert!(!engine.index_exists(&name).await.unwrap());
        assert!(manager.registered_indexes("session").is_empty());
    }

    #[tokio::test]
    async fn test_persist_writes_registry_record() {
        let builder = CountingBuilder::instant();
        let (manager, _, sparql) = manager_with(
            builder,
            IndexManagerConfig {
                persist_indexes: true,
                ..Default::default()
            },
        );

        manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();

        let updates: Vec<String> = sparql
            .recorded()
            .into_iter()
            .filter(|q| q.kind == "update")
            .map(|q| q.query)
            .collect();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].contains("INSERT DATA"));
        assert!(updates[0].contains("ext/SearchIndex"));
        assert!(updates[0].contains("session"));
    }

    #[tokio::test]
    async fn test_eager_startup_builds_configured_combinations() {
        let builder = CountingBuilder::instant();
        let (manager, _, _) = manager_with(
            builder.clone(),
            IndexManagerConfig {
                eager_indexing_groups: vec![
                    vec![AuthGroup::named("public")],
                    vec![AuthGroup::named("admin")],
                ],
                ..Default::default()
            },
        );

        manager.startup().await.unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
        assert_eq!(manager.registered_indexes("session").len(), 2);
    }

    #[tokio::test]
    async fn test_ignored_groups_are_filtered() {
        let builder = CountingBuilder::instant();
        let (manager, _, _) = manager_with(
            builder,
            IndexManagerConfig {
                ignored_allowed_groups: vec![AuthGroup::named("clean")],
                ..Default::default()
            },
        );

        let with_ignored = manager
            .fetch_indexes("session", &groups(&["public", "clean"]), false)
            .await
            .unwrap();
        let without = manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&with_ignored[0], &without[0]));
    }
}
