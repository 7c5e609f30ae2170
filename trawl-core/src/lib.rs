//! Core data model for Trawl.
//!
//! Trawl keeps full-text search indexes synchronized with an RDF graph
//! store, partitioned by the caller's authorization groups. This crate
//! holds the types every other crate speaks in:
//!
//! - [`Term`] / [`Triple`]: RDF terms and triple-diffs, including the
//!   delta wire format emitted by the graph store
//! - [`PathEdge`] / [`PropertyPath`]: property paths with inverse edges,
//!   parsed once at configuration load
//! - [`TypeDefinition`] / [`PropertyDefinition`]: the schema that maps
//!   RDF resources onto indexable documents
//! - [`AuthGroup`] / [`AuthGroupSet`]: authorization group tuples and
//!   their canonical serialization (the index partition key)
//! - [`SearchConfig`]: the JSON configuration document with environment
//!   overrides
//!
//! No I/O happens here; remote clients live in `trawl-client` and the
//! maintenance pipeline in `trawl-indexer`.

pub mod config;
pub mod error;
pub mod groups;
pub mod path;
pub mod term;
pub mod types;
pub mod vocab;

pub use config::SearchConfig;
pub use error::{Error, Result};
pub use groups::{AuthGroup, AuthGroupSet};
pub use path::{PathEdge, PropertyPath};
pub use term::{ChangeSet, Term, Triple};
pub use types::{PropertyDefinition, PropertyKind, TypeDefinition, TypeRegistry};
