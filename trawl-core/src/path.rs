//! Property paths: ordered sequences of forward or inverse predicate edges.
//!
//! Paths arrive in configuration as strings with an optional leading caret
//! (`^predicate` traverses the predicate in reverse). They are parsed once
//! at load time; nothing downstream re-inspects the string form.

use crate::error::{Error, Result};
use serde::Deserialize;

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathEdge {
    /// Predicate URI
    pub predicate: String,
    /// True when the edge is traversed in reverse (`^predicate`)
    pub inverse: bool,
}

impl PathEdge {
    /// Parse a config segment, splitting off a leading caret.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('^') {
            Some(predicate) => PathEdge {
                predicate: predicate.to_string(),
                inverse: true,
            },
            None => PathEdge {
                predicate: raw.to_string(),
                inverse: false,
            },
        }
    }

    /// SPARQL rendering of this edge (`<p>` or `^<p>`).
    pub fn sparql(&self) -> String {
        if self.inverse {
            format!("^<{}>", self.predicate)
        } else {
            format!("<{}>", self.predicate)
        }
    }
}

/// A non-empty ordered sequence of path edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    edges: Vec<PathEdge>,
}

impl PropertyPath {
    /// Build a path from parsed edges. Paths must be non-empty.
    pub fn new(edges: Vec<PathEdge>) -> Result<Self> {
        if edges.is_empty() {
            return Err(Error::config("property path must not be empty"));
        }
        Ok(PropertyPath { edges })
    }

    /// Parse a path from config segments.
    pub fn parse<S: AsRef<str>>(segments: &[S]) -> Result<Self> {
        Self::new(segments.iter().map(|s| PathEdge::parse(s.as_ref())).collect())
    }

    /// Number of edges in the path.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Always false; paths are non-empty by construction.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The edges of the path, in order.
    pub fn edges(&self) -> &[PathEdge] {
        &self.edges
    }

    /// The edge at `position`.
    pub fn edge(&self, position: usize) -> &PathEdge {
        &self.edges[position]
    }

    /// SPARQL sequence path over the whole path (`<p>/^<q>/...`).
    pub fn sparql(&self) -> String {
        self.sparql_range(0, self.edges.len())
    }

    /// SPARQL sequence path over `edges[start..end]`. Empty for an
    /// empty range.
    pub fn sparql_range(&self, start: usize, end: usize) -> String {
        self.edges[start..end]
            .iter()
            .map(PathEdge::sparql)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Every position at which the given predicate occurs, forward or
    /// inverse.
    pub fn positions_of<'a>(&'a self, predicate: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.predicate == predicate)
            .map(|(i, _)| i)
    }

    /// True when the predicate occurs anywhere in the path.
    pub fn contains_predicate(&self, predicate: &str) -> bool {
        self.edges.iter().any(|e| e.predicate == predicate)
    }
}

impl<'de> Deserialize<'de> for PropertyPath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Config accepts a single segment or a list of segments.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        let segments = match Raw::deserialize(deserializer)? {
            Raw::One(s) => vec![s],
            Raw::Many(v) => v,
        };
        PropertyPath::parse(&segments).map_err(serde::de::Error::custom)
    }
}
