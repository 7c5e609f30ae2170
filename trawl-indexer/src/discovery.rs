//! Root-subject discovery: shape grouping and batched VALUES queries.
//!
//! A delta triple can touch a type's documents through any position of
//! any property path that mentions its predicate. Triples sharing the
//! same discovery pattern, the shape key `(path, position, inverse,
//! addition)`, are bucketed together and resolved with one parameterized
//! SELECT per slice, so the number of store round-trips is bounded by the
//! number of distinct shapes, not the number of triples.

use std::collections::{HashMap, HashSet};
use trawl_client::sparql::{format_term, format_uri};
use trawl_core::{vocab, PropertyPath, Triple, TypeDefinition};

/// The 4-tuple identifying one discovery-query pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    pub path: PropertyPath,
    pub position: usize,
    pub inverse: bool,
    pub is_addition: bool,
}

/// The per-type outcome of matching a triple batch against one type
/// definition: subjects known without querying, plus the shape buckets
/// that still need discovery queries.
#[derive(Debug, Default)]
pub struct TypeDispatch {
    pub known_subjects: HashSet<String>,
    pub buckets: HashMap<ShapeKey, Vec<Triple>>,
}

/// Match a flat triple batch against one type definition.
///
/// Subjects of `rdf:type` triples naming one of the type's classes are
/// roots outright. Every remaining triple is bucketed under each
/// `(path, position)` at which its predicate occurs, except:
///
/// - a literal object cannot continue a forward traversal, so matches at
///   non-terminal forward positions are discarded
/// - a position-0 forward match whose subject is already known adds no
///   information
pub fn dispatch_for_type(type_def: &TypeDefinition, triples: &[Triple]) -> TypeDispatch {
    let mut dispatch = TypeDispatch::default();

    let is_type_assertion = |t: &Triple| {
        t.predicate == vocab::rdf::TYPE
            && t.object
                .as_uri()
                .is_some_and(|uri| type_def.matches_rdf_type(uri))
    };

    for triple in triples {
        if is_type_assertion(triple) {
            dispatch.known_subjects.insert(triple.subject.clone());
        }
    }

    for triple in triples {
        if is_type_assertion(triple) {
            continue;
        }
        for property in &type_def.properties {
            let positions: Vec<usize> = property.path.positions_of(&triple.predicate).collect();
            for position in positions {
                let edge = property.path.edge(position);
                let terminal = position == property.path.len() - 1;

                if !terminal && !edge.inverse && triple.object.is_literal() {
                    // Cannot continue traversal through a literal
                    continue;
                }
                if position == 0
                    && !edge.inverse
                    && dispatch.known_subjects.contains(&triple.subject)
                {
                    continue;
                }

                dispatch
                    .buckets
                    .entry(ShapeKey {
                        path: property.path.clone(),
                        position,
                        inverse: edge.inverse,
                        is_addition: triple.is_addition,
                    })
                    .or_default()
                    .push(triple.clone());
            }
        }
    }

    dispatch
}

/// Construct the parameterized SELECT for one shape and one slice of its
/// bucket.
///
/// The query binds `?s` to candidate root subjects:
///
/// ```text
/// SELECT DISTINCT ?s WHERE {
///   VALUES ?type { <class> ... }
///   VALUES (vars) { (row) ... }
///   ?s a ?type .
///   path-to-target        (position > 0)
///   triple-check          (additions only)
///   path-from-target      (additions with a non-empty suffix)
/// }
/// ```
///
/// For deletions the deleted edge no longer exists in the store, so the
/// target variable is bound directly from the deleted triple and only the
/// path prefix is asserted.
pub fn discovery_query(type_def: &TypeDefinition, shape: &ShapeKey, triples: &[Triple]) -> String {
    let terminal = shape.position == shape.path.len() - 1;
    let target_var = if shape.position == 0 { "?s" } else { "?target_sub" };

    let values_vars: &str = match (shape.is_addition, shape.position, shape.inverse) {
        (false, 0, _) => "?s",
        (false, _, _) => "?target_sub",
        (true, 0, false) => "?s ?obj",
        (true, 0, true) => "?s ?triple_sub",
        (true, _, false) => "?target_sub ?obj",
        (true, _, true) => "?target_sub ?triple_sub",
    };

    let mut rows = Vec::with_capacity(triples.len());
    for triple in triples {
        let row = if shape.is_addition {
            if shape.inverse {
                // The upstream path node is the triple's object
                format!(
                    "({} {})",
                    format_term(&triple.object),
                    format_uri(&triple.subject)
                )
            } else {
                format!(
                    "({} {})",
                    format_uri(&triple.subject),
                    format_term(&triple.object)
                )
            }
        } else if shape.inverse {
            format!("({})", format_term(&triple.object))
        } else {
            format!("({})", format_uri(&triple.subject))
        };
        rows.push(row);
    }

    let types = type_def
        .rdf_types
        .iter()
        .map(|t| format_uri(t))
        .collect::<Vec<_>>()
        .join(" ");

    let mut patterns: Vec<String> = vec!["?s a ?type .".to_string()];

    if shape.position > 0 {
        patterns.push(format!(
            "?s {} ?target_sub .",
            shape.path.sparql_range(0, shape.position)
        ));
    }

    if shape.is_addition {
        let predicate = format_uri(&shape.path.edge(shape.position).predicate);
        if shape.inverse {
            patterns.push(format!("?triple_sub {} {} .", predicate, target_var));
        } else {
            patterns.push(format!("{} {} ?obj .", target_var, predicate));
        }

        if !terminal {
            let suffix = shape
                .path
                .sparql_range(shape.position + 1, shape.path.len());
            let suffix_root = if shape.inverse { "?triple_sub" } else { "?obj" };
            patterns.push(format!("{} {} ?foo .", suffix_root, suffix));
        }
    }

    format!(
        "SELECT DISTINCT ?s WHERE {{\n  VALUES ?type {{ {} }}\n  VALUES ({}) {{ {} }}\n  {}\n}}",
        types,
        values_vars,
        rows.join(" "),
        patterns.join("\n  ")
    )
}
