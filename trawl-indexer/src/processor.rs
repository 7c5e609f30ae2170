//! The update-worker handler: apply one dequeued (subject, types,
//! action) across every registered index partition.
//!
//! Operations on different indexes are independent; a failure on one is
//! logged and the others proceed. Document builds run under the target
//! index's group scope, so a subject outside that group's visibility
//! builds empty and is deleted from that index only.

use crate::builder::DocumentBuilder;
use crate::error::Result;
use crate::manager::IndexManager;
use crate::registry::{IndexStatus, SearchIndex};
use crate::update::{UpdateAction, UpdateProcessor};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use trawl_client::{AuthContext, SearchEngine};
use trawl_core::TypeDefinition;

/// Applies updates to the search engine via the document builder.
pub struct IndexUpdateProcessor {
    manager: Arc<IndexManager>,
    builder: Arc<DocumentBuilder>,
    engine: Arc<dyn SearchEngine>,
    /// When false, updates invalidate indexes instead of rebuilding
    /// documents in place
    automatic_updates: bool,
}

impl IndexUpdateProcessor {
    pub fn new(
        manager: Arc<IndexManager>,
        builder: Arc<DocumentBuilder>,
        engine: Arc<dyn SearchEngine>,
        automatic_updates: bool,
    ) -> Self {
        IndexUpdateProcessor {
            manager,
            builder,
            engine,
            automatic_updates,
        }
    }

    /// Every (index, serving type) pair affected by an update of
    /// `type_name`: the type's own partitions plus those of composites
    /// built over it.
    fn targets(&self, type_name: &str) -> Vec<(Arc<SearchIndex>, Arc<TypeDefinition>)> {
        let types = self.manager.types();
        let mut targets = Vec::new();

        if let Some(type_def) = types.get(type_name) {
            for index in self.manager.registered_indexes(type_name) {
                targets.push((index, type_def.clone()));
            }
        }
        for composite in types.composites_over(type_name) {
            for index in self.manager.registered_indexes(&composite.name) {
                targets.push((index, composite.clone()));
            }
        }
        targets
    }

    async fn apply(
        &self,
        subject: &str,
        index: &SearchIndex,
        type_def: &TypeDefinition,
        action: UpdateAction,
    ) -> Result<()> {
        match action {
            UpdateAction::Delete => {
                self.engine.delete_document(&index.name, subject).await?;
            }
            UpdateAction::Update if !self.automatic_updates => {
                index.set_status(IndexStatus::Invalid);
            }
            UpdateAction::Update => {
                let auth = AuthContext::Groups(index.allowed_groups.clone());
                let document = if type_def.is_composite() {
                    self.builder
                        .build_composite_document(subject, type_def, self.manager.types(), &auth)
                        .await?
                } else {
                    self.builder.build_document(subject, type_def, &auth).await?
                };

                match document {
                    Some(document) => {
                        self.engine
                            .upsert_document(&index.name, subject, &Value::Object(document))
                            .await?;
                    }
                    None => {
                        // Not visible as this type in this group scope:
                        // remove any stale copy from this index
                        self.engine.delete_document(&index.name, subject).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UpdateProcessor for IndexUpdateProcessor {
    async fn process(
        &self,
        subject: &str,
        type_names: &[String],
        action: UpdateAction,
    ) -> Result<()> {
        for type_name in type_names {
            for (index, type_def) in self.targets(type_name) {
                if let Err(e) = self.apply(subject, &index, &type_def, action).await {
                    tracing::error!(
                        subject = %subject,
                        index = %index.name,
                        error = %e,
                        "index update failed, continuing with other indexes"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{IndexBuilder, IndexManagerConfig};
    use crate::testing::{MockExtractor, MockSearchEngine, MockSparqlClient};
    use serde_json::json;
    use trawl_core::{AuthGroup, AuthGroupSet, TypeRegistry};

    struct NoopBuilder;

    #[async_trait]
    impl IndexBuilder for NoopBuilder {
        async fn build(&self, _index: &SearchIndex, _type_def: &TypeDefinition) -> Result<()> {
            Ok(())
        }
    }

    fn types() -> TypeRegistry {
        let session: TypeDefinition = serde_json::from_value(json!({
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

    async fn setup(
        automatic: bool,
    ) -> (
        IndexUpdateProcessor,
        Arc<IndexManager>,
        Arc<MockSearchEngine>,
        Arc<MockSparqlClient>,
    ) {
        let engine = Arc::new(MockSearchEngine::new());
        let sparql = Arc::new(MockSparqlClient::new());
        let manager = Arc::new(IndexManager::new(
            types(),
            engine.clone(),
            sparql.clone(),
            Arc::new(NoopBuilder),
            IndexManagerConfig::default(),
        ));
        manager
            .fetch_indexes("session", &groups(&["public"]), false)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let builder = Arc::new(DocumentBuilder::new(
            sparql.clone(),
            Arc::new(MockExtractor::fixed("")),
            dir.path(),
        ));
        let processor =
            IndexUpdateProcessor::new(manager.clone(), builder, engine.clone(), automatic);
        (processor, manager, engine, sparql)
    }

    #[tokio::test]
    async fn test_update_builds_and_upserts() {
        let (processor, manager, engine, sparql) = setup(true).await;
        sparql.ask_returns(true);
        sparql.select_returns_for(
            "<http://example.org/title>",
            vec![json!({"value": {"type": "literal", "value": "Hello"}})],
        );

        processor
            .process(
                "http://example.org/s1",
                &["session".to_string()],
                UpdateAction::Update,
            )
            .await
            .unwrap();

        let index = &manager.registered_indexes("session")[0];
        let document = engine.document(&index.name, "http://example.org/s1").unwrap();
        assert_eq!(document["title"], json!("Hello"));
    }

    #[tokio::test]
    async fn test_update_is_idempotent_at_the_engine() {
        let (processor, manager, engine, sparql) = setup(true).await;
        sparql.ask_returns(true);
        sparql.select_returns_for(
            "<http://example.org/title>",
            vec![json!({"value": {"type": "literal", "value": "Hello"}})],
        );

        for _ in 0..2 {
            processor
                .process(
                    "http://example.org/s1",
                    &["session".to_string()],
                    UpdateAction::Update,
                )
                .await
                .unwrap();
        }

        let index = &manager.registered_indexes("session")[0];
        assert_eq!(engine.document_count(&index.name), 1);
    }

    #[tokio::test]
    async fn test_empty_build_deletes_existing_document() {
        let (processor, manager, engine, sparql) = setup(true).await;
        let index = manager.registered_indexes("session")[0].clone();
        engine
            .upsert_document(&index.name, "http://example.org/s1", &json!({"old": true}))
            .await
            .unwrap();

        // The subject is no longer visible as a session
        sparql.ask_returns(false);
        processor
            .process(
                "http://example.org/s1",
                &["session".to_string()],
                UpdateAction::Update,
            )
            .await
            .unwrap();

        assert!(engine.document(&index.name, "http://example.org/s1").is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_from_every_partition() {
        let (processor, manager, engine, _) = setup(true).await;
        manager
            .fetch_indexes("session", &groups(&["admin"]), false)
            .await
            .unwrap();

        for index in manager.registered_indexes("session") {
            engine
                .upsert_document(&index.name, "http://example.org/s1", &json!({"x": 1}))
                .await
                .unwrap();
        }

        processor
            .process(
                "http://example.org/s1",
                &["session".to_string()],
                UpdateAction::Delete,
            )
            .await
            .unwrap();

        for index in manager.registered_indexes("session") {
            assert!(engine.document(&index.name, "http://example.org/s1").is_none());
        }
    }

    #[tokio::test]
    async fn test_invalidating_mode_flips_status_only() {
        let (processor, manager, engine, sparql) = setup(false).await;
        sparql.ask_returns(true);

        processor
            .process(
                "http://example.org/s1",
                &["session".to_string()],
                UpdateAction::Update,
            )
            .await
            .unwrap();

        let index = &manager.registered_indexes("session")[0];
        assert_eq!(index.status(), IndexStatus::Invalid);
        assert!(engine.document(&index.name, "http://example.org/s1").is_none());
    }
}
