//! RDF vocabulary constants used throughout Trawl.
//!
//! Constants are organized by vocabulary:
//! - `rdf` - RDF vocabulary (http://www.w3.org/1999/02/22-rdf-syntax-ns#)
//! - `xsd` - XSD vocabulary (http://www.w3.org/2001/XMLSchema#)
//! - `mu` - platform core vocabulary (UUID tagging)
//! - `ext` - index registry vocabulary (persisted SearchIndex records)
//! - `headers` - out-of-band authorization header names

/// RDF vocabulary constants
pub mod rdf {
    /// rdf:type IRI
    pub const TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

    /// rdf:langString IRI
    pub const LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
}

/// XSD vocabulary constants
pub mod xsd {
    /// xsd:string IRI
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

    /// xsd:integer IRI
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";

    /// xsd:int IRI
    pub const INT: &str = "http://www.w3.org/2001/XMLSchema#int";

    /// xsd:long IRI
    pub const LONG: &str = "http://www.w3.org/2001/XMLSchema#long";

    /// xsd:double IRI
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";

    /// xsd:decimal IRI
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";

    /// xsd:float IRI
    pub const FLOAT: &str = "http://www.w3.org/2001/XMLSchema#float";

    /// xsd:boolean IRI
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";

    /// xsd:date IRI
    pub const DATE: &str = "http://www.w3.org/2001/XMLSchema#date";

    /// xsd:dateTime IRI
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

    /// xsd:time IRI
    pub const TIME: &str = "http://www.w3.org/2001/XMLSchema#time";
}

/// Platform core vocabulary
pub mod mu {
    /// Core namespace
    pub const CORE: &str = "http://mu.semte.ch/vocabularies/core/";

    /// The UUID tagging predicate. Filtered out of delta processing:
    /// it has no bearing on property-path matching.
    pub const UUID: &str = "http://mu.semte.ch/vocabularies/core/uuid";
}

/// Index registry vocabulary (persisted SearchIndex records)
pub mod ext {
    /// Namespace for registry resources
    pub const NAMESPACE: &str = "http://mu.semte.ch/vocabularies/ext/";

    /// Class of a persisted search index record
    pub const SEARCH_INDEX: &str = "http://mu.semte.ch/vocabularies/ext/SearchIndex";

    /// Physical engine index name
    pub const INDEX_NAME: &str = "http://mu.semte.ch/vocabularies/ext/indexName";

    /// Document type the index serves
    pub const TYPE_NAME: &str = "http://mu.semte.ch/vocabularies/ext/typeName";

    /// Canonical JSON of the index's allowed groups
    pub const ALLOWED_GROUPS: &str = "http://mu.semte.ch/vocabularies/ext/allowedGroups";

    /// Whether the index was built eagerly at startup
    pub const IS_EAGER: &str = "http://mu.semte.ch/vocabularies/ext/isEager";

    /// Namespace under which registry resource URIs are minted
    pub const INDEX_RESOURCE_BASE: &str = "http://mu.semte.ch/search-indexes/";
}

/// Out-of-band authorization header names
pub mod headers {
    /// JSON array of the caller's allowed groups
    pub const ALLOWED_GROUPS: &str = "MU-AUTH-ALLOWED-GROUPS";

    /// Unrestricted access marker for internal discovery queries
    pub const SUDO: &str = "MU-AUTH-SUDO";
}
