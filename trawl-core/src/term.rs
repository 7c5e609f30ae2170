//! RDF terms, triples, and the delta wire format.
//!
//! The graph store emits delta messages as a JSON array of changesets,
//! each carrying `inserts` and `deletes` of wire triples. Wire triples
//! are decoded once into [`Triple`] values tagged with `is_addition`;
//! everything downstream works on the decoded form.

use crate::vocab;
use serde::Deserialize;

/// An RDF term: a URI or a literal with optional datatype / language tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// A URI reference
    Uri(String),
    /// A literal value
    Literal {
        value: String,
        datatype: Option<String>,
        language: Option<String>,
    },
}

impl Term {
    /// Construct a URI term
    pub fn uri(value: impl Into<String>) -> Self {
        Term::Uri(value.into())
    }

    /// Construct a plain literal
    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    /// Construct a datatyped literal
    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    /// Construct a language-tagged literal
    pub fn lang_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }

    /// True when the term is a URI reference
    pub fn is_uri(&self) -> bool {
        matches!(self, Term::Uri(_))
    }

    /// True when the term is a literal
    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// The lexical value of the term
    pub fn value(&self) -> &str {
        match self {
            Term::Uri(v) => v,
            Term::Literal { value, .. } => value,
        }
    }

    /// The URI value, or `None` for literals
    pub fn as_uri(&self) -> Option<&str> {
        match self {
            Term::Uri(v) => Some(v),
            Term::Literal { .. } => None,
        }
    }
}

/// A single triple-diff entry: one triple plus its addition/removal tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
    pub is_addition: bool,
}

impl Triple {
    /// True when the predicate is the platform UUID tagging predicate.
    /// Such triples are dropped before delta processing.
    pub fn is_uuid_tag(&self) -> bool {
        self.predicate == vocab::mu::UUID
    }
}

/// A wire-format term node: `{type, value, datatype?, xml:lang?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTerm {
    #[serde(rename = "type")]
    pub term_type: String,
    pub value: String,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default, rename = "xml:lang")]
    pub language: Option<String>,
}

impl From<WireTerm> for Term {
    fn from(wire: WireTerm) -> Self {
        if wire.term_type == "uri" {
            Term::Uri(wire.value)
        } else {
            // "literal" and "typed-literal" both decode as literals
            Term::Literal {
                value: wire.value,
                datatype: wire.datatype,
                language: wire.language,
            }
        }
    }
}

/// A wire-format triple as emitted by the delta producer.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTriple {
    pub subject: WireTerm,
    pub predicate: WireTerm,
    pub object: WireTerm,
}

impl WireTriple {
    /// Decode into a [`Triple`] tagged with the given direction.
    pub fn into_triple(self, is_addition: bool) -> Triple {
        Triple {
            subject: self.subject.value,
            predicate: self.predicate.value,
            object: self.object.into(),
            is_addition,
        }
    }
}

/// One changeset of a delta message: `{inserts: [...], deletes: [...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub inserts: Vec<WireTriple>,
    #[serde(default)]
    pub deletes: Vec<WireTriple>,
}

impl ChangeSet {
    /// Flatten into decoded triples, inserts tagged as additions.
    pub fn into_triples(self) -> Vec<Triple> {
        let mut triples = Vec::with_capacity(self.inserts.len() + self.deletes.len());
        for t in self.inserts {
            triples.push(t.into_triple(true));
        }
        for t in self.deletes {
            triples.push(t.into_triple(false));
        }
        triples
    }
}
