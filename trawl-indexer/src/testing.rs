//! Shared mock collaborators for pipeline tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use trawl_client::search::{SearchEngine, SearchHit, SearchHitPage};
use trawl_client::sparql::{SelectResults, SparqlTerm};
use trawl_client::{AuthContext, ContentExtractor, SparqlClient};

/// One recorded store interaction.
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub kind: &'static str,
    pub query: String,
    pub sudo: bool,
}

/// A scripted SPARQL client that records every query it receives.
///
/// `select` responses are scripted by substring match on the query text;
/// unmatched queries return empty results.
#[derive(Default)]
pub struct MockSparqlClient {
    select_patterns: Mutex<Vec<(String, Vec<Value>)>>,
    ask_response: Mutex<bool>,
    queries: Mutex<Vec<RecordedQuery>>,
}

impl MockSparqlClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the ASK response (defaults to false).
    pub fn ask_returns(&self, value: bool) {
        *self.ask_response.lock().unwrap() = value;
    }

    /// Script `select` bindings for queries containing `pattern`. Each
    /// binding is a JSON object mapping variable names to result terms.
    pub fn select_returns_for(&self, pattern: &str, bindings: Vec<Value>) {
        self.select_patterns
            .lock()
            .unwrap()
            .push((pattern.to_string(), bindings));
    }

    /// Every query received so far.
    pub fn recorded(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap().clone()
    }

    /// Number of SELECT queries received.
    pub fn select_count(&self) -> usize {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.kind == "select")
            .count()
    }

    fn record(&self, kind: &'static str, query: &str, auth: &AuthContext) {
        self.queries.lock().unwrap().push(RecordedQuery {
            kind,
            query: query.to_string(),
            sudo: matches!(auth, AuthContext::Sudo),
        });
    }
}

#[async_trait]
impl SparqlClient for MockSparqlClient {
    async fn select(
        &self,
        query: &str,
        auth: &AuthContext,
    ) -> trawl_client::Result<SelectResults> {
        self.record("select", query, auth);

        let patterns = self.select_patterns.lock().unwrap();
        for (pattern, bindings) in patterns.iter() {
            if query.contains(pattern.as_str()) {
                let decoded = bindings
                    .iter()
                    .map(|b| {
                        serde_json::from_value::<HashMap<String, SparqlTerm>>(b.clone())
                            .expect("scripted binding decodes")
                    })
                    .collect();
                let mut results = SelectResults::default();
                results.results.bindings = decoded;
                return Ok(results);
            }
        }
        Ok(SelectResults::default())
    }

    async fn ask(&self, query: &str, auth: &AuthContext) -> trawl_client::Result<bool> {
        self.record("ask", query, auth);
        Ok(*self.ask_response.lock().unwrap())
    }

    async fn update(&self, query: &str, auth: &AuthContext) -> trawl_client::Result<()> {
        self.record("update", query, auth);
        Ok(())
    }
}

/// An extractor returning a fixed string.
pub struct MockExtractor {
    output: String,
}

impl MockExtractor {
    pub fn fixed(output: &str) -> Self {
        MockExtractor {
            output: output.to_string(),
        }
    }
}

#[async_trait]
impl ContentExtractor for MockExtractor {
    async fn extract(&self, _blob: &[u8], _pipeline: &str) -> trawl_client::Result<String> {
        Ok(self.output.clone())
    }
}

/// An in-memory search engine.
#[derive(Default)]
pub struct MockSearchEngine {
    pub indexes: Mutex<HashSet<String>>,
    pub documents: Mutex<HashMap<(String, String), Value>>,
}

impl MockSearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.documents
            .lock()
            .unwrap()
            .get(&(index.to_string(), id.to_string()))
            .cloned()
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.documents
            .lock()
            .unwrap()
            .keys()
            .filter(|(i, _)| i == index)
            .count()
    }
}

#[async_trait]
impl SearchEngine for MockSearchEngine {
    async fn create_index(&self, name: &str, _settings: Option<&Value>) -> trawl_client::Result<()> {
        self.indexes.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> trawl_client::Result<bool> {
        let existed = self.indexes.lock().unwrap().remove(name);
        self.documents
            .lock()
            .unwrap()
            .retain(|(index, _), _| index != name);
        Ok(existed)
    }

    async fn index_exists(&self, name: &str) -> trawl_client::Result<bool> {
        Ok(self.indexes.lock().unwrap().contains(name))
    }

    async fn upsert_document(
        &self,
        index: &str,
        id: &str,
        document: &Value,
    ) -> trawl_client::Result<()> {
        self.documents
            .lock()
            .unwrap()
            .insert((index.to_string(), id.to_string()), document.clone());
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> trawl_client::Result<bool> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .remove(&(index.to_string(), id.to_string()))
            .is_some())
    }

    async fn get_document(&self, index: &str, id: &str) -> trawl_client::Result<Option<Value>> {
        Ok(self.document(index, id))
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[(String, Value)],
    ) -> trawl_client::Result<()> {
        let mut store = self.documents.lock().unwrap();
        for (id, document) in documents {
            store.insert((index.to_string(), id.clone()), document.clone());
        }
        Ok(())
    }

    async fn search(&self, index: &str, _body: &Value) -> trawl_client::Result<SearchHitPage> {
        let store = self.documents.lock().unwrap();
        let hits: Vec<SearchHit> = store
            .iter()
            .filter(|((i, _), _)| i == index)
            .map(|((_, id), document)| SearchHit {
                id: id.clone(),
                score: Some(1.0),
                document: document.clone(),
            })
            .collect();
        Ok(SearchHitPage {
            total: hits.len() as u64,
            hits,
        })
    }

    async fn count(&self, index: &str) -> trawl_client::Result<u64> {
        Ok(self.document_count(index) as u64)
    }

    async fn refresh(&self, _index: &str) -> trawl_client::Result<()> {
        Ok(())
    }

    async fn health(&self) -> trawl_client::Result<bool> {
        Ok(true)
    }
}
