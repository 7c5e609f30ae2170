//! Smart merge for composite documents.
//!
//! Documents of a composite type are produced by merging the documents of
//! its constituent types. The merge is a total function over the closed
//! shape set {nil, scalar, list, map}; a map meeting a non-map is a
//! configuration error raised eagerly, never silently coerced.

use crate::error::Result;
use serde_json::{Map, Value};
use trawl_core::Error;

/// Merge two document values.
///
/// - `nil + x → x`
/// - `list + x → list ∪ {x}` (either side)
/// - `list + list → deduplicated concatenation`
/// - `map + map → recursive smart merge`
/// - `scalar + scalar → the scalar if equal, else [a, b]`
/// - `map + anything else → configuration error`
pub fn smart_merge(a: Value, b: Value) -> Result<Value> {
    match (a, b) {
        (Value::Null, x) | (x, Value::Null) => Ok(x),

        (Value::Array(xs), Value::Array(ys)) => {
            let mut merged = xs;
            for y in ys {
                if !merged.contains(&y) {
                    merged.push(y);
                }
            }
            Ok(Value::Array(merged))
        }

        (Value::Array(xs), y) => {
            let mut merged = xs;
            if !merged.contains(&y) {
                merged.push(y);
            }
            Ok(Value::Array(merged))
        }
        (x, Value::Array(ys)) => {
            let mut merged = vec![x];
            for y in ys {
                if !merged.contains(&y) {
                    merged.push(y);
                }
            }
            Ok(Value::Array(merged))
        }

        (Value::Object(xs), Value::Object(ys)) => {
            let mut merged = xs;
            for (key, y) in ys {
                let value = match merged.remove(&key) {
                    Some(x) => smart_merge(x, y)?,
                    None => y,
                };
                merged.insert(key, value);
            }
            Ok(Value::Object(merged))
        }

        (Value::Object(_), other) | (other, Value::Object(_)) => Err(Error::config(format!(
            "cannot merge a map with a non-map value: {}",
            other
        ))
        .into()),

        (x, y) if x == y => Ok(x),
        (x, y) => Ok(Value::Array(vec![x, y])),
    }
}

/// Merge a sequence of documents key by key.
pub fn merge_documents(documents: Vec<Map<String, Value>>) -> Result<Map<String, Value>> {
    let mut iter = documents.into_iter();
    let mut merged = iter.next().unwrap_or_default();
    for document in iter {
        for (key, value) in document {
            let combined = match merged.remove(&key) {
                Some(existing) => smart_merge(existing, value)?,
                None => value,
            };
            merged.insert(key, combined);
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nil_yields_other_side() {
        assert_eq!(
            smart_merge(Value::Null, json!("x")).unwrap(),
            json!("x")
        );
        assert_eq!(smart_merge(json!(5), Value::Null).unwrap(), json!(5));
    }

    #[test]
    fn test_list_absorbs_scalar() {
        assert_eq!(
            smart_merge(json!(["a", "b"]), json!("c")).unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            smart_merge(json!("c"), json!(["a", "c"])).unwrap(),
            json!(["c", "a"])
        );
        // Already present: no duplicate
        assert_eq!(
            smart_merge(json!(["a"]), json!("a")).unwrap(),
            json!(["a"])
        );
    }

    #[test]
    fn test_list_list_dedup_concat() {
        assert_eq!(
            smart_merge(json!(["a", "b"]), json!(["b", "c"])).unwrap(),
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn test_scalars() {
        assert_eq!(smart_merge(json!("a"), json!("a")).unwrap(), json!("a"));
        assert_eq!(
            smart_merge(json!("a"), json!("b")).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_maps_merge_recursively() {
        let merged = smart_merge(
            json!({"uuid": "1", "names": {"en": "one"}}),
            json!({"extra": true, "names": {"nl": "een"}}),
        )
        .unwrap();
        assert_eq!(
            merged,
            json!({"uuid": "1", "extra": true, "names": {"en": "one", "nl": "een"}})
        );
    }

    #[test]
    fn test_map_with_scalar_is_config_error() {
        let result = smart_merge(json!({"a": 1}), json!("scalar"));
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_documents() {
        let a = json!({"title": "x", "tags": ["one"]});
        let b = json!({"title": "x", "tags": ["two"], "extra": 1});
        let (Value::Object(a), Value::Object(b)) = (a, b) else {
            unreachable!()
        };
        let merged = merge_documents(vec![a, b]).unwrap();
        assert_eq!(
            Value::Object(merged),
            json!({"title": "x", "tags": ["one", "two"], "extra": 1})
        );
    }
}
