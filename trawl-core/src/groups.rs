//! Authorization group tuples and their canonical serialization.
//!
//! The graph store partitions visibility by authorization groups. Indexes
//! are partitioned along the same axis: two callers with the same group
//! set (in any order) must resolve to the same index, so group sets are
//! canonicalized by sorting on `name ∥ concat(variables)`. Variable order
//! within a group is semantically significant and never reordered.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One authorization group: a name plus its (ordered) variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthGroup {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

impl AuthGroup {
    /// Group with no variables
    pub fn named(name: impl Into<String>) -> Self {
        AuthGroup {
            name: name.into(),
            variables: Vec::new(),
        }
    }

    /// Sort key: name followed by the concatenated variables.
    fn sort_key(&self) -> String {
        let mut key = self.name.clone();
        for v in &self.variables {
            key.push_str(v);
        }
        key
    }
}

/// A canonically ordered set of authorization groups.
///
/// Construction sorts the groups; the canonical JSON serialization is the
/// partition key in the index registry and the value of the out-of-band
/// allowed-groups header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AuthGroupSet {
    groups: Vec<AuthGroup>,
    key: String,
}

impl AuthGroupSet {
    /// Canonicalize a list of groups.
    pub fn new(mut groups: Vec<AuthGroup>) -> Self {
        groups.sort_by_key(AuthGroup::sort_key);
        let key = serde_json::to_string(&groups)
            .expect("auth group serialization is infallible");
        AuthGroupSet { groups, key }
    }

    /// Parse the JSON array carried in the allowed-groups header.
    pub fn from_json(json: &str) -> Result<Self> {
        let groups: Vec<AuthGroup> = serde_json::from_str(json)?;
        Ok(Self::new(groups))
    }

    /// The groups, in canonical order.
    pub fn groups(&self) -> &[AuthGroup] {
        &self.groups
    }

    /// The canonical JSON serialization (partition key / header value).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drop groups matching any ignore pattern. A pattern without
    /// variables matches every group of that name; a pattern with
    /// variables matches exactly.
    pub fn without(&self, ignored: &[AuthGroup]) -> Self {
        let kept = self
            .groups
            .iter()
            .filter(|g| {
                !ignored.iter().any(|pattern| {
                    pattern.name == g.name
                        && (pattern.variables.is_empty() || pattern.variables == g.variables)
                })
            })
            .cloned()
            .collect();
        Self::new(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, vars: &[&str]) -> AuthGroup {
        AuthGroup {
            name: name.into(),
            variables: vars.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_canonical_key_stable_under_permutation() {
        let a = AuthGroupSet::new(vec![
            group("public", &[]),
            group("org", &["acme", "dept-1"]),
        ]);
        let b = AuthGroupSet::new(vec![
            group("org", &["acme", "dept-1"]),
            group("public", &[]),
        ]);
        assert_eq!(a.key(), b.key());
        assert_eq!(a, b);
    }

    #[test]
    fn test_variable_order_is_significant() {
        let a = AuthGroupSet::new(vec![group("org", &["acme", "dept-1"])]);
        let b = AuthGroupSet::new(vec![group("org", &["dept-1", "acme"])]);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_equal_names_ordered_by_variables() {
        let set = AuthGroupSet::new(vec![group("org", &["b"]), group("org", &["a"])]);
        assert_eq!(set.groups()[0].variables, vec!["a".to_string()]);
        assert_eq!(set.groups()[1].variables, vec!["b".to_string()]);
    }

    #[test]
    fn test_from_json_header() {
        let set =
            AuthGroupSet::from_json(r#"[{"name": "public", "variables": []}, {"name": "admin"}]"#)
                .unwrap();
        assert_eq!(set.groups().len(), 2);
        assert_eq!(set.groups()[0].name, "admin");
    }

    #[test]
    fn test_ignore_patterns() {
        let set = AuthGroupSet::new(vec![
            group("public", &[]),
            group("org", &["acme"]),
            group("org", &["other"]),
        ]);

        // Name-only pattern removes every variant of the name
        let filtered = set.without(&[group("org", &[])]);
        assert_eq!(filtered.groups().len(), 1);

        // Exact pattern removes only the matching tuple
        let filtered = set.without(&[group("org", &["acme"])]);
        assert_eq!(filtered.groups().len(), 2);
        assert!(filtered.groups().iter().any(|g| g.variables == vec!["other"]));
    }
}
