//! Document builder: materialize one indexable document for a root
//! subject against a type definition.
//!
//! Every property is resolved with one SELECT over its composed path,
//! under the authorization context of the index being maintained. An
//! empty type-membership check yields `None`; callers treat that as a
//! delete, which keeps per-group isolation intact when a subject is
//! outside the group's visibility.

use crate::error::Result;
use crate::merge::merge_documents;
use serde_json::{json, Map, Number, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use trawl_client::extract::MAXIMUM_FILE_SIZE;
use trawl_client::sparql::{format_uri, SparqlTerm};
use trawl_client::{AuthContext, ContentExtractor, SparqlClient};
use trawl_core::{vocab, PropertyDefinition, PropertyKind, TypeDefinition, TypeRegistry};

/// Builds documents by traversing the RDF graph.
pub struct DocumentBuilder {
    sparql: Arc<dyn SparqlClient>,
    extractor: Arc<dyn ContentExtractor>,
    attachments_path_base: PathBuf,
}

impl DocumentBuilder {
    pub fn new(
        sparql: Arc<dyn SparqlClient>,
        extractor: Arc<dyn ContentExtractor>,
        attachments_path_base: impl Into<PathBuf>,
    ) -> Self {
        DocumentBuilder {
            sparql,
            extractor,
            attachments_path_base: attachments_path_base.into(),
        }
    }

    /// Build the document for one root subject.
    ///
    /// Returns `None` when the subject is not (or no longer) an instance
    /// of the type's classes under the given authorization.
    pub async fn build_document(
        &self,
        subject: &str,
        type_def: &TypeDefinition,
        auth: &AuthContext,
    ) -> Result<Option<Map<String, Value>>> {
        let type_values = type_def
            .rdf_types
            .iter()
            .map(|t| format_uri(t))
            .collect::<Vec<_>>()
            .join(" ");
        let membership = format!(
            "ASK {{ VALUES ?type {{ {} }} {} a ?type }}",
            type_values,
            format_uri(subject)
        );
        if !self.sparql.ask(&membership, auth).await? {
            return Ok(None);
        }

        let mut document = self
            .build_properties(subject, &type_def.properties, auth)
            .await?;

        // The implicit uuid property is always attached
        let uuid_query = format!(
            "SELECT ?value WHERE {{ {} {} ?value }}",
            format_uri(subject),
            format_uri(vocab::mu::UUID)
        );
        let uuid = self
            .sparql
            .select(&uuid_query, auth)
            .await?
            .column("value")
            .first()
            .map(|t| t.value.clone());
        document.insert("uuid", uuid.map(Value::String).unwrap_or(Value::Null));

        Ok(Some(document.into_map()))
    }

    /// Build the merged document of a composite type.
    ///
    /// Constituents the subject does not belong to contribute nothing;
    /// when no constituent matches, the result is `None`.
    pub async fn build_composite_document(
        &self,
        subject: &str,
        composite: &TypeDefinition,
        types: &TypeRegistry,
        auth: &AuthContext,
    ) -> Result<Option<Map<String, Value>>> {
        let mut parts = Vec::new();
        for name in &composite.composite_of {
            let Some(constituent) = types.get(name) else {
                continue;
            };
            if let Some(document) = self.build_document(subject, constituent, auth).await? {
                parts.push(document);
            }
        }
        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some(merge_documents(parts)?))
    }

    fn build_properties<'a>(
        &'a self,
        subject: &'a str,
        properties: &'a [PropertyDefinition],
        auth: &'a AuthContext,
    ) -> Pin<Box<dyn Future<Output = Result<DocumentFields>> + Send + 'a>> {
        Box::pin(async move {
            let mut fields = DocumentFields::default();
            for property in properties {
                let value = self.build_property(subject, property, auth).await?;
                fields.insert(&property.name, value);
            }
            Ok(fields)
        })
    }

    async fn build_property(
        &self,
        subject: &str,
        property: &PropertyDefinition,
        auth: &AuthContext,
    ) -> Result<Value> {
        let query = format!(
            "SELECT DISTINCT ?value WHERE {{ {} {} ?value }}",
            format_uri(subject),
            property.path.sparql()
        );
        let results = self.sparql.select(&query, auth).await?;
        let bindings = results.column("value");

        let value = match &property.kind {
            PropertyKind::Simple => reduce(bindings.iter().copied().map(convert_term).collect()),
            PropertyKind::LanguageString => {
                let mut by_language: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                for term in &bindings {
                    let language = term.language.clone().unwrap_or_else(|| "default".to_string());
                    by_language
                        .entry(language)
                        .or_default()
                        .push(Value::String(term.value.clone()));
                }
                if by_language.is_empty() {
                    Value::Null
                } else {
                    Value::Object(
                        by_language
                            .into_iter()
                            .map(|(language, values)| (language, reduce(values)))
                            .collect(),
                    )
                }
            }
            PropertyKind::Nested { sub_properties, .. } => {
                let mut nested = Vec::new();
                for term in &bindings {
                    if term.term_type != "uri" {
                        continue;
                    }
                    let mut sub = self
                        .build_properties(&term.value, sub_properties, auth)
                        .await?;
                    sub.insert_front("uri", Value::String(term.value.clone()));
                    nested.push(Value::Object(sub.into_map()));
                }
                reduce(nested)
            }
            PropertyKind::Attachment { pipeline } => {
                let mut attachments = Vec::new();
                for term in &bindings {
                    if term.term_type != "uri" {
                        continue;
                    }
                    match self.extract_attachment(&term.value, pipeline).await {
                        Ok(Some(content)) => attachments.push(json!({ "content": content })),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(
                                file = %term.value,
                                error = %e,
                                "attachment extraction failed, indexing without content"
                            );
                        }
                    }
                }
                reduce(attachments)
            }
        };

        Ok(value)
    }

    /// Resolve a file URI under the attachments root and extract its
    /// text. Oversized and missing files yield `None` with a warning.
    async fn extract_attachment(&self, file_uri: &str, pipeline: &str) -> Result<Option<String>> {
        let relative = file_uri
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(file_uri);
        let path = self.attachments_path_base.join(relative);

        let size = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "attachment file missing");
                return Ok(None);
            }
            Err(e) => return Err(trawl_client::ClientError::from(e).into()),
        };
        if size > MAXIMUM_FILE_SIZE {
            tracing::warn!(
                path = %path.display(),
                size,
                "attachment exceeds maximum file size, skipping content"
            );
            return Ok(None);
        }

        let blob = read_file(&path).await?;
        let content = self.extractor.extract(&blob, pipeline).await?;
        Ok(Some(content))
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| trawl_client::ClientError::from(e).into())
}

/// Ordered accumulation of document fields.
#[derive(Debug, Default)]
struct DocumentFields {
    fields: Vec<(String, Value)>,
}

impl DocumentFields {
    fn insert(&mut self, name: &str, value: Value) {
        self.fields.push((name.to_string(), value));
    }

    fn insert_front(&mut self, name: &str, value: Value) {
        self.fields.insert(0, (name.to_string(), value));
    }

    fn into_map(self) -> Map<String, Value> {
        self.fields.into_iter().collect()
    }
}

/// Reduce bound values: `None` for zero, the scalar for one, a list
/// otherwise.
fn reduce(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}

/// Convert one binding by its RDF literal datatype.
fn convert_term(term: &SparqlTerm) -> Value {
    if term.term_type == "uri" {
        return Value::String(term.value.clone());
    }

    match term.datatype.as_deref() {
        Some(vocab::xsd::INTEGER) | Some(vocab::xsd::INT) | Some(vocab::xsd::LONG) => term
            .value
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(term.value.clone())),
        Some(vocab::xsd::DOUBLE) | Some(vocab::xsd::DECIMAL) | Some(vocab::xsd::FLOAT) => term
            .value
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(term.value.clone())),
        Some(vocab::xsd::BOOLEAN) => match term.value.as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(term.value.clone()),
        },
        // Dates and times keep their lexical form
        _ => Value::String(term.value.clone()),
    }
}
