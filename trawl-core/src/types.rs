//! Document type definitions: the schema that maps RDF resources onto
//! indexable documents.
//!
//! A [`TypeDefinition`] names the RDF classes whose instances are root
//! subjects of the type, and an ordered list of properties, each derived
//! by evaluating a property path against the graph. Composite types have
//! no classes or paths of their own; their documents merge the documents
//! of the named constituent types.
//!
//! Definitions are immutable after configuration load. The [`TypeRegistry`]
//! answers the lookups the delta handler needs: which types a given
//! rdf:type object or predicate can affect.

use crate::error::{Error, Result};
use crate::path::PropertyPath;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// How a property's bound values become document content.
#[derive(Debug, Clone)]
pub enum PropertyKind {
    /// Plain values, converted by literal datatype
    Simple,
    /// Language-tagged values, grouped per language
    LanguageString,
    /// Related resources, recursively built as sub-documents
    Nested {
        rdf_type: Option<String>,
        sub_properties: Vec<PropertyDefinition>,
    },
    /// File resources run through the content extractor
    Attachment {
        /// Content-extractor pipeline identifier
        pipeline: String,
    },
}

/// One indexable property of a type definition.
#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    pub name: String,
    pub path: PropertyPath,
    pub kind: PropertyKind,
}

/// Raw config shape for a property; validated into [`PropertyDefinition`].
#[derive(Debug, Deserialize)]
struct RawProperty {
    name: String,
    path: PropertyPath,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    rdf_type: Option<String>,
    #[serde(default)]
    sub_properties: Option<Vec<PropertyDefinition>>,
    #[serde(default)]
    pipeline: Option<String>,
}

impl TryFrom<RawProperty> for PropertyDefinition {
    type Error = Error;

    fn try_from(raw: RawProperty) -> Result<Self> {
        let kind = match raw.kind.as_deref() {
            None | Some("simple") => PropertyKind::Simple,
            Some("language_string") => PropertyKind::LanguageString,
            Some("nested") => PropertyKind::Nested {
                rdf_type: raw.rdf_type,
                sub_properties: raw.sub_properties.ok_or_else(|| {
                    Error::config(format!(
                        "nested property '{}' requires sub_properties",
                        raw.name
                    ))
                })?,
            },
            Some("attachment") => PropertyKind::Attachment {
                pipeline: raw.pipeline.unwrap_or_else(|| "default".to_string()),
            },
            Some(other) => {
                return Err(Error::config(format!(
                    "unknown property kind '{}' on property '{}'",
                    other, raw.name
                )))
            }
        };

        Ok(PropertyDefinition {
            name: raw.name,
            path: raw.path,
            kind,
        })
    }
}

impl<'de> Deserialize<'de> for PropertyDefinition {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawProperty::deserialize(deserializer)?;
        PropertyDefinition::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// One document type. Immutable after config load.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeDefinition {
    /// Stable identifier, unique across the configuration
    pub name: String,
    /// URL segment used by the HTTP surface, unique
    pub on_path: String,
    /// RDF classes whose instances are root subjects of this type
    #[serde(default)]
    pub rdf_types: Vec<String>,
    /// Indexable properties, in configuration order
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    /// Constituent type names of a composite type
    #[serde(default)]
    pub composite_of: Vec<String>,
}

impl TypeDefinition {
    /// True for composite types. Composites do not receive delta-driven
    /// discovery directly; their constituents do.
    pub fn is_composite(&self) -> bool {
        !self.composite_of.is_empty()
    }

    /// True when the URI is one of this type's root classes.
    pub fn matches_rdf_type(&self, uri: &str) -> bool {
        self.rdf_types.iter().any(|t| t == uri)
    }

    /// True when any property path contains the predicate, forward or
    /// inverse.
    pub fn matches_predicate(&self, predicate: &str) -> bool {
        self.properties
            .iter()
            .any(|p| p.path.contains_predicate(predicate))
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// All configured type definitions, with the lookups delta processing
/// needs.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: Vec<Arc<TypeDefinition>>,
}

impl TypeRegistry {
    /// Validate and index the configured types.
    ///
    /// Rejects duplicate names or paths, composite references to unknown
    /// types, and non-composite types without root classes.
    pub fn new(types: Vec<TypeDefinition>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for t in &types {
            if !names.insert(t.name.clone()) {
                return Err(Error::config(format!("duplicate type name '{}'", t.name)));
            }
            if !paths.insert(t.on_path.clone()) {
                return Err(Error::config(format!("duplicate on_path '{}'", t.on_path)));
            }
            if !t.is_composite() && t.rdf_types.is_empty() {
                return Err(Error::config(format!(
                    "type '{}' has neither rdf_types nor composite_of",
                    t.name
                )));
            }
        }
        for t in &types {
            for sub in &t.composite_of {
                if !names.contains(sub) {
                    return Err(Error::config(format!(
                        "composite type '{}' references unknown type '{}'",
                        t.name, sub
                    )));
                }
            }
        }

        Ok(TypeRegistry {
            types: types.into_iter().map(Arc::new).collect(),
        })
    }

    /// All types, in configuration order.
    pub fn all(&self) -> &[Arc<TypeDefinition>] {
        &self.types
    }

    /// Look up a type by name.
    pub fn get(&self, name: &str) -> Option<&Arc<TypeDefinition>> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Look up a type by its URL path segment.
    pub fn by_path(&self, on_path: &str) -> Option<&Arc<TypeDefinition>> {
        self.types.iter().find(|t| t.on_path == on_path)
    }

    /// Non-composite types having the URI among their root classes.
    pub fn affected_by_rdf_type(&self, uri: &str) -> Vec<Arc<TypeDefinition>> {
        self.types
            .iter()
            .filter(|t| !t.is_composite() && t.matches_rdf_type(uri))
            .cloned()
            .collect()
    }

    /// Non-composite types with a property path containing the predicate.
    pub fn affected_by_predicate(&self, predicate: &str) -> Vec<Arc<TypeDefinition>> {
        self.types
            .iter()
            .filter(|t| !t.is_composite() && t.matches_predicate(predicate))
            .cloned()
            .collect()
    }

    /// Composite types built over the given constituent type.
    pub fn composites_over(&self, type_name: &str) -> Vec<Arc<TypeDefinition>> {
        self.types
            .iter()
            .filter(|t| t.composite_of.iter().any(|c| c == type_name))
            .cloned()
            .collect()
    }
}
