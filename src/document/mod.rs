//! Schema-less documents and the field-path rules shared by the store and the
//! aggregation engine
//!
//! A document is a JSON object. Fields are addressed with dotted paths
//! (`address.city_id`). When a path crosses an array, the remainder of the path
//! is applied to every element and the results are gathered into an array,
//! which is how a `lookup` result (always a list) can be addressed before it is
//! unwound.

pub mod filter;

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

pub use filter::{Condition, Filter};

/// A schema-less record: column or field name to JSON value
pub type Document = Map<String, Value>;

/// Largest integer that survives a round trip through `f64`
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Resolve a dotted field path against a document
///
/// Returns `None` when the path is missing. Arrays met along the way are
/// traversed element-wise.
pub fn get_path(doc: &Document, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let head = segments.next()?;
    let root = doc.get(head)?;
    let rest: Vec<&str> = segments.collect();
    descend(root, &rest)
}

fn descend(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, tail)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => map.get(*head).and_then(|v| descend(v, tail)),
        Value::Array(items) => {
            let gathered: Vec<Value> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(_) | Value::Array(_) => descend(item, segments),
                    _ => None,
                })
                .collect();
            Some(Value::Array(gathered))
        }
        _ => None,
    }
}

/// Top-level field name of a dotted path
pub fn root_field(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Set a dotted field path, creating intermediate objects as needed
///
/// An intermediate value that is not an object is replaced by one.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

/// Remove a dotted field path, returning the removed value
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Value::Object(child)) => remove_path(child, rest),
            _ => None,
        },
    }
}

/// Drop top-level null columns from an extracted row
pub fn strip_nulls(mut row: Document) -> Document {
    row.retain(|_, v| !v.is_null());
    row
}

/// Values a query predicate is tested against
///
/// An array contributes each of its elements as well as itself, so that
/// `{"film.length": {"$lt": 60}}` matches when any joined film is short.
pub fn match_candidates(doc: &Document, path: &str) -> Vec<Value> {
    match get_path(doc, path) {
        None => Vec::new(),
        Some(Value::Array(items)) => {
            let mut candidates = items.clone();
            candidates.push(Value::Array(items));
            candidates
        }
        Some(value) => vec![value],
    }
}

/// Truthiness used by `$cond` and boolean contexts
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

/// Build a JSON number from a float, keeping integral results integral
///
/// Accumulators add in floating point; a whole-number total is emitted as an
/// integer so that `{"$sum": 1}` counts compare equal to integer literals.
pub fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        Value::from(value as i64)
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Rank of a value in the cross-type sort order
///
/// Missing and null sort first, then numbers, strings, objects, arrays and
/// booleans.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Object(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Bool(_)) => 8,
    }
}

/// Total order over optional JSON values
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(left), Some(right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            for ((key_x, val_x), (key_y, val_y)) in x.iter().zip(y.iter()) {
                let ord = key_x
                    .cmp(key_y)
                    .then_with(|| compare_values(Some(val_x), Some(val_y)));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Equality with numeric coercion (`1 == 1.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(Some(a), Some(b)) == Ordering::Equal
}

/// Canonical string form of a value, used as a hash key for joins and groups
///
/// Two values get the same key exactly when they are equal, with integers and
/// integral floats (`1` and `1.0`) keyed alike. Strings and object keys are
/// length-prefixed and containers carry their element count, so no
/// concatenation of parts can collide with another value.
pub fn canonical_key(value: &Value) -> String {
    let mut key = String::new();
    write_key(&mut key, value);
    key
}

/// Integral floats up to this magnitude share the integer key
const INTEGRAL_KEY_LIMIT: f64 = 18_446_744_073_709_551_616.0;

fn write_key(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push('n'),
        Value::Bool(true) => out.push('t'),
        Value::Bool(false) => out.push('f'),
        Value::Number(n) => {
            let exact = n
                .as_i64()
                .map(i128::from)
                .or_else(|| n.as_u64().map(i128::from));
            let f = n.as_f64().unwrap_or(f64::NAN);
            match exact {
                Some(i) => out.push_str(&format!("i{i};")),
                None if f.fract() == 0.0 && f.abs() < INTEGRAL_KEY_LIMIT => {
                    out.push_str(&format!("i{};", f as i128))
                }
                None => out.push_str(&format!("d{f};")),
            }
        }
        Value::String(s) => write_str(out, 's', s),
        Value::Array(items) => {
            out.push_str(&format!("a{}[", items.len()));
            for item in items {
                write_key(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str(&format!("o{}{{", map.len()));
            for (k, v) in map {
                write_str(out, 'k', k);
                write_key(out, v);
            }
            out.push('}');
        }
    }
}

fn write_str(out: &mut String, tag: char, s: &str) {
    out.push_str(&format!("{tag}{}:", s.len()));
    out.push_str(s);
}

/// Borrow a JSON value as a document, if it is an object
pub fn as_document(value: &Value) -> Option<&Document> {
    value.as_object()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_get_path_nested() {
        let d = doc(json!({"address": {"city_id": 300, "district": "Alberta"}}));
        assert_eq!(get_path(&d, "address.city_id"), Some(json!(300)));
        assert_eq!(get_path(&d, "address.missing"), None);
        assert_eq!(get_path(&d, "missing.city_id"), None);
    }

    #[test]
    fn test_get_path_through_array() {
        let d = doc(json!({"film": [{"length": 48}, {"length": 120}, {"title": "x"}]}));
        assert_eq!(get_path(&d, "film.length"), Some(json!([48, 120])));

        let empty = doc(json!({"film": []}));
        assert_eq!(get_path(&empty, "film.length"), Some(json!([])));
    }

    #[test]
    fn test_get_path_through_null_is_missing() {
        let d = doc(json!({"address": null}));
        assert_eq!(get_path(&d, "address"), Some(Value::Null));
        assert_eq!(get_path(&d, "address.address"), None);
    }

    #[test]
    fn test_set_and_remove_path() {
        let mut d = Document::new();
        set_path(&mut d, "a.b.c", json!(1));
        assert_eq!(get_path(&d, "a.b.c"), Some(json!(1)));

        set_path(&mut d, "a", json!("flat"));
        set_path(&mut d, "a.b", json!(2));
        assert_eq!(d["a"], json!({"b": 2}));

        assert_eq!(remove_path(&mut d, "a.b"), Some(json!(2)));
        assert_eq!(d["a"], json!({}));
    }

    #[test]
    fn test_strip_nulls() {
        let row = doc(json!({"address": "47 MySakila Drive", "address2": null}));
        let row = strip_nulls(row);
        assert!(row.contains_key("address"));
        assert!(!row.contains_key("address2"));
    }

    #[test]
    fn test_compare_values_cross_type() {
        assert_eq!(
            compare_values(None, Some(&json!(""))),
            Ordering::Less,
            "missing sorts before strings"
        );
        assert_eq!(
            compare_values(Some(&json!(5)), Some(&json!("5"))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(2.0))),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(Some(&json!("")), Some(&json!(""))),
            Ordering::Equal
        );
    }

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(2.5), json!(2.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_canonical_key_numeric_coercion() {
        assert_eq!(canonical_key(&json!(1)), canonical_key(&json!(1.0)));
        assert_eq!(canonical_key(&json!(-3)), canonical_key(&json!(-3.0)));
        assert_ne!(canonical_key(&json!(1)), canonical_key(&json!("1")));
        assert_ne!(canonical_key(&json!(1)), canonical_key(&json!(1.5)));
    }

    #[test]
    fn test_canonical_key_large_integers_stay_distinct() {
        assert_ne!(
            canonical_key(&json!(9_007_199_254_740_993u64)),
            canonical_key(&json!(9_007_199_254_740_992u64))
        );
        assert_ne!(
            canonical_key(&json!(u64::MAX)),
            canonical_key(&json!(u64::MAX - 1))
        );
        assert_eq!(
            canonical_key(&json!(9_007_199_254_740_992u64)),
            canonical_key(&json!(9_007_199_254_740_992.0))
        );
    }

    #[test]
    fn test_canonical_key_strings_do_not_collide() {
        let pairs = [
            (json!(["a", "b"]), json!(["a,s:b"])),
            (json!(["ab"]), json!(["a", "b"])),
            (json!({"a": "b,c=s:d"}), json!({"a": "b", "c": "d"})),
            (json!({"a=": "x"}), json!({"a": "=x"})),
            (json!([[1], 2]), json!([[1, 2]])),
            (json!(""), Value::Null),
        ];
        for (left, right) in pairs {
            assert_ne!(canonical_key(&left), canonical_key(&right), "{left} vs {right}");
        }
        assert_eq!(
            canonical_key(&json!({"k": [1, "x"]})),
            canonical_key(&json!({"k": [1.0, "x"]}))
        );
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(Some(&json!(true))));
        assert!(is_truthy(Some(&json!("active"))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&Value::Null)));
        assert!(!is_truthy(None));
    }
}
