//! The delta handler: turn incoming triple-diffs into per-subject
//! update work.
//!
//! Ingestion is cheap and synchronous: decode, drop UUID-tagging
//! triples, look up the affected type configurations, enqueue one work
//! item. A single dispatcher task drains the work queue in arrival
//! order and, per affected type, collects directly-known root subjects,
//! buckets the rest by discovery shape, runs the batched VALUES queries
//! under sudo, and feeds every discovered root into the update queue.

use crate::discovery::{discovery_query, dispatch_for_type};
use crate::error::{IndexerError, Result};
use crate::update::UpdateHandler;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use trawl_client::{AuthContext, SparqlClient};
use trawl_core::{ChangeSet, Triple, TypeDefinition, TypeRegistry};

/// One queued unit of dispatch work.
struct DeltaWork {
    triples: Vec<Triple>,
    configs: Vec<Arc<TypeDefinition>>,
}

/// Accepts delta messages and drives root-subject discovery.
pub struct DeltaHandler {
    inner: Arc<DeltaInner>,
    tx: mpsc::UnboundedSender<DeltaWork>,
}

struct DeltaInner {
    types: TypeRegistry,
    sparql: Arc<dyn SparqlClient>,
    updates: Arc<UpdateHandler>,
    delta_batch_size: usize,
}

impl DeltaHandler {
    /// Create the handler and start its dispatcher task.
    pub fn new(
        types: TypeRegistry,
        sparql: Arc<dyn SparqlClient>,
        updates: Arc<UpdateHandler>,
        delta_batch_size: usize,
    ) -> Self {
        let inner = Arc::new(DeltaInner {
            types,
            sparql,
            updates,
            delta_batch_size: delta_batch_size.max(1),
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<DeltaWork>();
        {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                // Work items process in arrival order
                while let Some(work) = rx.recv().await {
                    inner.dispatch(work).await;
                }
            });
        }

        DeltaHandler { inner, tx }
    }

    /// Decode and accept a raw delta body.
    ///
    /// A body that is not a changeset list is malformed; it is reported
    /// to the caller for logging and otherwise discarded.
    pub fn accept_json(&self, body: serde_json::Value) -> Result<()> {
        if !body.is_array() {
            return Err(IndexerError::MalformedDelta(
                "expected a JSON array of changesets".to_string(),
            ));
        }
        let changesets: Vec<ChangeSet> = serde_json::from_value(body)
            .map_err(|e| IndexerError::MalformedDelta(e.to_string()))?;
        self.accept(changesets);
        Ok(())
    }

    /// Accept decoded changesets for asynchronous processing.
    pub fn accept(&self, changesets: Vec<ChangeSet>) {
        let triples: Vec<Triple> = changesets
            .into_iter()
            .flat_map(ChangeSet::into_triples)
            .filter(|t| !t.is_uuid_tag())
            .collect();
        if triples.is_empty() {
            return;
        }

        let configs = self.inner.affected_configs(&triples);
        if configs.is_empty() {
            return;
        }

        tracing::debug!(
            triples = triples.len(),
            types = configs.len(),
            "accepted delta batch"
        );
        // The dispatcher only stops when the handler is dropped
        let _ = self.tx.send(DeltaWork { triples, configs });
    }

    /// Process a batch inline instead of via the dispatcher.
    #[cfg(test)]
    pub(crate) async fn process_inline(&self, changesets: Vec<ChangeSet>) {
        let triples: Vec<Triple> = changesets
            .into_iter()
            .flat_map(ChangeSet::into_triples)
            .filter(|t| !t.is_uuid_tag())
            .collect();
        if triples.is_empty() {
            return;
        }
        let configs = self.inner.affected_configs(&triples);
        self.inner.dispatch(DeltaWork { triples, configs }).await;
    }
}

impl DeltaInner {
    /// Union of the type configurations any triple in the batch affects.
    fn affected_configs(&self, triples: &[Triple]) -> Vec<Arc<TypeDefinition>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut configs = Vec::new();
        for triple in triples {
            let affected = if triple.predicate == trawl_core::vocab::rdf::TYPE {
                match triple.object.as_uri() {
                    Some(class) => self.types.affected_by_rdf_type(class),
                    None => Vec::new(),
                }
            } else {
                self.types.affected_by_predicate(&triple.predicate)
            };
            for config in affected {
                if seen.insert(config.name.clone()) {
                    configs.push(config);
                }
            }
        }
        configs
    }

    async fn dispatch(&self, work: DeltaWork) {
        for config in &work.configs {
            self.process_type(&work.triples, config).await;
        }
    }

    /// Discover and enqueue the root subjects of one type.
    async fn process_type(&self, triples: &[Triple], type_def: &TypeDefinition) {
        let dispatch = dispatch_for_type(type_def, triples);
        let mut roots: HashSet<String> = dispatch.known_subjects;

        for (shape, bucket) in &dispatch.buckets {
            for slice in bucket.chunks(self.delta_batch_size) {
                let query = discovery_query(type_def, shape, slice);
                match self.sparql.select(&query, &AuthContext::Sudo).await {
                    Ok(results) => {
                        roots.extend(results.uris("s"));
                    }
                    Err(e) => {
                        // Retries are exhausted inside the client; this
                        // slice is dropped for this type only
                        tracing::error!(
                            type_name = %type_def.name,
                            triples = slice.len(),
                            error = %e,
                            "discovery query failed, dropping triple batch for this type"
                        );
                    }
                }
            }
        }

        for root in roots {
            self.updates.add_update(&root, &type_def.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSparqlClient;
    use crate::update::UpdateHandlerConfig;
    use serde_json::json;
    use std::time::Duration;

    fn types() -> TypeRegistry {
        let session: TypeDefinition = serde_json::from_value(json!({
            "name": "session",
            "on_path": "sessions",
            "rdf_types": ["http://example.org/Session"],
            "properties": [
                {"name": "title", "path": "http://example.org/title"},
                {"name": "author_name",
                 "path": ["http://example.org/author", "http://example.org/name"]},
                {"name": "children", "path": "^http://example.org/hasChild"}
            ]
        }))
        .unwrap();
        TypeRegistry::new(vec![session]).unwrap()
    }

    fn updates() -> Arc<UpdateHandler> {
        // Workers are never started in these tests; the queue is
        // inspected directly
        UpdateHandler::new(UpdateHandlerConfig {
            wait_interval: Duration::from_secs(60),
            ..Default::default()
        })
    }

    fn handler(sparql: Arc<MockSparqlClient>, updates: Arc<UpdateHandler>) -> DeltaHandler {
        DeltaHandler::new(types(), sparql, updates, 100)
    }

    fn changeset(body: serde_json::Value) -> Vec<ChangeSet> {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_rdf_type_insert_enqueues_without_querying() {
        let sparql = Arc::new(MockSparqlClient::new());
        let queue = updates();
        let handler = handler(sparql.clone(), queue.clone());

        handler
            .process_inline(changeset(json!([{
                "inserts": [{
                    "subject": {"type": "uri", "value": "http://example.org/s1"},
                    "predicate": {"type": "uri",
                                  "value": "http://www.w3.org/1999/02/22-rdf-syntax-ns#type"},
                    "object": {"type": "uri", "value": "http://example.org/Session"}
                }],
                "deletes": []
            }])))
            .await;

        assert_eq!(queue.queue_length(), 1);
        assert_eq!(
            queue.pending_types("http://example.org/s1").unwrap(),
            vec!["session".to_string()]
        );
        // Known subject: zero store queries
        assert_eq!(sparql.select_count(), 0);
    }

    #[tokio::test]
    async fn test_simple_property_insert_discovers_via_values_query() {
        let sparql = Arc::new(MockSparqlClient::new());
        sparql.select_returns_for(
            "VALUES (?s ?obj)",
            vec![json!({"s": {"type": "uri", "value": "http://example.org/s2"}})],
        );
        let queue = updates();
        let handler = handler(sparql.clone(), queue.clone());

        handler
            .process_inline(changeset(json!([{
                "inserts": [{
                    "subject": {"type": "uri", "value": "http://example.org/s2"},
                    "predicate": {"type": "uri", "value": "http://example.org/title"},
                    "object": {"type": "literal", "value": "Hello", "xml:lang": "en"}
                }],
                "deletes": []
            }])))
            .await;

        assert_eq!(sparql.select_count(), 1);
        let recorded = sparql.recorded();
        let query = &recorded[0];
        assert!(query.sudo);
        assert!(query
            .query
            .contains("VALUES (?s ?obj) { (<http://example.org/s2> \"Hello\"@en) }"));
        assert!(query.query.contains("?s <http://example.org/title> ?obj ."));

        assert_eq!(queue.queue_length(), 1);
        assert!(queue.pending_types("http://example.org/s2").is_some());
    }

    #[tokio::test]
    async fn test_inverse_edge_query_shape() {
        let sparql = Arc::new(MockSparqlClient::new());
        let queue = updates();
        let handler = handler(sparql.clone(), queue.clone());

        handler
            .process_inline(changeset(json!([{
                "inserts": [{
                    "subject": {"type": "uri", "value": "http://example.org/child1"},
                    "predicate": {"type": "uri", "value": "http://example.org/hasChild"},
                    "object": {"type": "uri", "value": "http://example.org/s1"}
                }],
                "deletes": []
            }])))
            .await;

        let recorded = sparql.recorded();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].query.contains(
            "VALUES (?s ?triple_sub) { (<http://example.org/s1> <http://example.org/child1>) }"
        ));
        assert!(recorded[0]
            .query
            .contains("?triple_sub <http://example.org/hasChild> ?s ."));
    }

    #[tokio::test]
    async fn test_literal_at_non_terminal_position_is_dropped() {
        let sparql = Arc::new(MockSparqlClient::new());
        let queue = updates();
        let handler = handler(sparql.clone(), queue.clone());

        handler
            .process_inline(changeset(json!([{
                "inserts": [{
                    "subject": {"type": "uri", "value": "http://example.org/s2"},
                    "predicate": {"type": "uri", "value": "http://example.org/author"},
                    "object": {"type": "literal", "value": "literal"}
                }],
                "deletes": []
            }])))
            .await;

        assert_eq!(sparql.select_count(), 0);
        assert_eq!(queue.queue_length(), 0);
    }

    #[tokio::test]
    async fn test_uuid_tags_are_filtered_out() {
        let sparql = Arc::new(MockSparqlClient::new());
        let queue = updates();
        let handler = handler(sparql.clone(), queue.clone());

        handler
            .process_inline(changeset(json!([{
                "inserts": [{
                    "subject": {"type": "uri", "value": "http://example.org/s1"},
                    "predicate": {"type": "uri",
                                  "value": "http://mu.semte.ch/vocabularies/core/uuid"},
                    "object": {"type": "literal", "value": "abc-123"}
                }],
                "deletes": []
            }])))
            .await;

        assert_eq!(sparql.select_count(), 0);
        assert_eq!(queue.queue_length(), 0);
    }

    #[tokio::test]
    async fn test_slices_respect_delta_batch_size() {
        let sparql = Arc::new(MockSparqlClient::new());
        let queue = updates();
        let handler = DeltaHandler::new(types(), sparql.clone(), queue.clone(), 2);

        let inserts: Vec<serde_json::Value> = (0..5)
            .map(|i| {
                json!({
                    "subject": {"type": "uri", "value": format!("http://example.org/s{}", i)},
                    "predicate": {"type": "uri", "value": "http://example.org/title"},
                    "object": {"type": "literal", "value": "x"}
                })
            })
            .collect();

        handler
            .process_inline(changeset(json!([{ "inserts": inserts, "deletes": [] }])))
            .await;

        // 5 triples of one shape, slice size 2: 3 queries
        assert_eq!(sparql.select_count(), 3);
    }

    #[tokio::test]
    async fn test_known_subjects_enqueue_independently_of_discovery() {
        let sparql = Arc::new(MockSparqlClient::new());
        let queue = updates();
        let handler = handler(sparql.clone(), queue.clone());

        handler
            .process_inline(changeset(json!([{
                "inserts": [
                    {
                        "subject": {"type": "uri", "value": "http://example.org/s1"},
                        "predicate": {"type": "uri",
                                      "value": "http://www.w3.org/1999/02/22-rdf-syntax-ns#type"},
                        "object": {"type": "uri", "value": "http://example.org/Session"}
                    },
                    {
                        "subject": {"type": "uri", "value": "http://example.org/s2"},
                        "predicate": {"type": "uri", "value": "http://example.org/title"},
                        "object": {"type": "literal", "value": "no results scripted"}
                    }
                ],
                "deletes": []
            }])))
            .await;

        // s1 is enqueued regardless of discovery outcomes
        assert!(queue.pending_types("http://example.org/s1").is_some());
    }

    #[tokio::test]
    async fn test_accept_json_rejects_non_list() {
        let sparql = Arc::new(MockSparqlClient::new());
        let queue = updates();
        let handler = handler(sparql, queue);

        let result = handler.accept_json(json!({"inserts": []}));
        assert!(matches!(result, Err(IndexerError::MalformedDelta(_))));
    }

    #[tokio::test]
    async fn test_accept_dispatches_asynchronously() {
        let sparql = Arc::new(MockSparqlClient::new());
        let queue = updates();
        let handler = handler(sparql, queue.clone());

        handler
            .accept_json(json!([{
                "inserts": [{
                    "subject": {"type": "uri", "value": "http://example.org/s1"},
                    "predicate": {"type": "uri",
                                  "value": "http://www.w3.org/1999/02/22-rdf-syntax-ns#type"},
                    "object": {"type": "uri", "value": "http://example.org/Session"}
                }],
                "deletes": []
            }]))
            .unwrap();

        // Wait for the dispatcher task to drain the work item
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while queue.queue_length() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(queue.queue_length(), 1);
    }
}
