//! SPARQL wire helpers: JSON results decoding and term formatting.
//!
//! Query construction lives with the pipeline (it owns the shapes); this
//! module owns the lexical layer: how terms print inside a query and how
//! the store's `application/sparql-results+json` responses decode.

use serde::Deserialize;
use std::collections::HashMap;
use trawl_core::Term;

/// A term inside a SPARQL JSON results binding.
#[derive(Debug, Clone, Deserialize)]
pub struct SparqlTerm {
    #[serde(rename = "type")]
    pub term_type: String,
    pub value: String,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default, rename = "xml:lang")]
    pub language: Option<String>,
}

impl From<SparqlTerm> for Term {
    fn from(t: SparqlTerm) -> Self {
        if t.term_type == "uri" {
            Term::Uri(t.value)
        } else {
            Term::Literal {
                value: t.value,
                datatype: t.datatype,
                language: t.language,
            }
        }
    }
}

/// Decoded `SELECT` results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectResults {
    #[serde(default)]
    pub head: Head,
    #[serde(default)]
    pub results: BindingSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Head {
    #[serde(default)]
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindingSet {
    #[serde(default)]
    pub bindings: Vec<HashMap<String, SparqlTerm>>,
}

impl SelectResults {
    /// All bound terms of one variable, in binding order.
    pub fn column(&self, var: &str) -> Vec<&SparqlTerm> {
        self.results
            .bindings
            .iter()
            .filter_map(|b| b.get(var))
            .collect()
    }

    /// All bound URI values of one variable.
    pub fn uris(&self, var: &str) -> Vec<String> {
        self.results
            .bindings
            .iter()
            .filter_map(|b| b.get(var))
            .filter(|t| t.term_type == "uri")
            .map(|t| t.value.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.results.bindings.is_empty()
    }
}

/// Decoded `ASK` result.
#[derive(Debug, Clone, Deserialize)]
pub struct AskResult {
    pub boolean: bool,
}

/// Escape a literal for embedding in a quoted SPARQL string.
pub fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Format a URI reference: `<uri>`.
pub fn format_uri(uri: &str) -> String {
    format!("<{}>", uri)
}

/// Format a term for a query: URIs as `<uri>`, literals quoted with
/// their language tag or datatype when present.
pub fn format_term(term: &Term) -> String {
    match term {
        Term::Uri(uri) => format_uri(uri),
        Term::Literal {
            value,
            datatype,
            language,
        } => {
            let quoted = format!("\"{}\"", escape_string(value));
            if let Some(lang) = language {
                format!("{}@{}", quoted, lang)
            } else if let Some(dt) = datatype {
                format!("{}^^<{}>", quoted, dt)
            } else {
                quoted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_terms() {
        assert_eq!(
            format_term(&Term::uri("http://ex.org/a")),
            "<http://ex.org/a>"
        );
        assert_eq!(format_term(&Term::literal("plain")), "\"plain\"");
        assert_eq!(
            format_term(&Term::lang_literal("Hello", "en")),
            "\"Hello\"@en"
        );
        assert_eq!(
            format_term(&Term::typed_literal(
                "4",
                "http://www.w3.org/2001/XMLSchema#integer"
            )),
            "\"4\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(
            escape_string("say \"hi\"\nback\\slash"),
            "say \\\"hi\\\"\\nback\\\\slash"
        );
    }

    #[test]
    fn test_decode_select_results() {
        let json = r#"{
            "head": {"vars": ["s"]},
            "results": {"bindings": [
                {"s": {"type": "uri", "value": "http://ex.org/s1"}},
                {"s": {"type": "literal", "value": "not-a-uri"}}
            ]}
        }"#;
        let results: SelectResults = serde_json::from_str(json).unwrap();
        assert_eq!(results.column("s").len(), 2);
        assert_eq!(results.uris("s"), vec!["http://ex.org/s1".to_string()]);
        assert!(results.column("missing").is_empty());
    }
}
