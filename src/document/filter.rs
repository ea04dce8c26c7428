//! Query predicates over documents
//!
//! `Filter` is the predicate language shared by the `match` stage and the
//! store's `find`, `update_*` and `delete_many` operations. It is parsed from
//! the familiar JSON form (`{"length": {"$lt": 60}}`) or built directly.
//!
//! Comparison operators are type-bracketed: `{"$lt": 60}` only matches numeric
//! values, never strings or missing fields. Equality with `null` also matches
//! a missing field.

use std::cmp::Ordering;

use serde_json::Value;
use thiserror::Error;

use super::{Document, compare_values, get_path, is_truthy, match_candidates, values_equal};

/// A filter document could not be understood
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid filter: {0}")]
pub struct FilterError(pub String);

/// A single field condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

/// Document predicate
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches every document (`{}`)
    #[default]
    All,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Field {
        path: String,
        conditions: Vec<Condition>,
    },
}

impl Filter {
    /// Single-condition filter on a field path
    pub fn field(path: impl Into<String>, condition: Condition) -> Self {
        Filter::Field {
            path: path.into(),
            conditions: vec![condition],
        }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(path, Condition::Eq(value.into()))
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(path, Condition::Lt(value.into()))
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(path, Condition::Gte(value.into()))
    }

    /// Parse a JSON filter document
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        let Value::Object(map) = value else {
            return Err(FilterError(format!("expected an object, found {value}")));
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (key, spec) in map {
            let clause = match key.as_str() {
                "$and" => Filter::And(parse_clause_list(key, spec)?),
                "$or" => Filter::Or(parse_clause_list(key, spec)?),
                op if op.starts_with('$') => {
                    return Err(FilterError(format!("unsupported top-level operator '{op}'")));
                }
                path => Filter::Field {
                    path: path.to_string(),
                    conditions: parse_conditions(path, spec)?,
                },
            };
            clauses.push(clause);
        }

        Ok(match clauses.len() {
            0 => Filter::All,
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }

    /// Evaluate the predicate against a document
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Filter::Field { path, conditions } => {
                conditions.iter().all(|c| condition_matches(doc, path, c))
            }
        }
    }

    /// Field paths a document must carry for this filter to be meaningful
    ///
    /// Branches of `$or` and conditions that naturally match an absent field
    /// (`$exists`, `$ne`, `$nin`, equality with null) are left out.
    pub fn required_paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_required(&mut out);
        out
    }

    fn collect_required<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::All | Filter::Or(_) => {}
            Filter::And(clauses) => {
                for clause in clauses {
                    clause.collect_required(out);
                }
            }
            Filter::Field { path, conditions } => {
                let tolerates_absence = conditions.iter().any(|c| {
                    matches!(
                        c,
                        Condition::Exists(_) | Condition::Ne(_) | Condition::Nin(_)
                    ) || matches!(c, Condition::Eq(v) if v.is_null())
                });
                if !tolerates_absence {
                    out.push(path);
                }
            }
        }
    }
}

fn parse_clause_list(op: &str, spec: &Value) -> Result<Vec<Filter>, FilterError> {
    let Value::Array(items) = spec else {
        return Err(FilterError(format!("{op} expects an array")));
    };
    items.iter().map(Filter::from_json).collect()
}

fn parse_conditions(path: &str, spec: &Value) -> Result<Vec<Condition>, FilterError> {
    let operators = match spec {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        other => return Ok(vec![Condition::Eq(other.clone())]),
    };

    operators
        .iter()
        .map(|(op, operand)| {
            let condition = match op.as_str() {
                "$eq" => Condition::Eq(operand.clone()),
                "$ne" => Condition::Ne(operand.clone()),
                "$gt" => Condition::Gt(operand.clone()),
                "$gte" => Condition::Gte(operand.clone()),
                "$lt" => Condition::Lt(operand.clone()),
                "$lte" => Condition::Lte(operand.clone()),
                "$in" | "$nin" => {
                    let Value::Array(values) = operand else {
                        return Err(FilterError(format!("{op} on '{path}' expects an array")));
                    };
                    if op == "$in" {
                        Condition::In(values.clone())
                    } else {
                        Condition::Nin(values.clone())
                    }
                }
                "$exists" => Condition::Exists(is_truthy(Some(operand))),
                other => {
                    return Err(FilterError(format!(
                        "unsupported operator '{other}' on '{path}'"
                    )));
                }
            };
            Ok(condition)
        })
        .collect()
}

fn condition_matches(doc: &Document, path: &str, condition: &Condition) -> bool {
    match condition {
        Condition::Eq(expected) => equals(doc, path, expected),
        Condition::Ne(expected) => !equals(doc, path, expected),
        Condition::In(values) => values.iter().any(|v| equals(doc, path, v)),
        Condition::Nin(values) => !values.iter().any(|v| equals(doc, path, v)),
        Condition::Exists(expected) => get_path(doc, path).is_some() == *expected,
        Condition::Gt(bound) => compares(doc, path, bound, |o| o == Ordering::Greater),
        Condition::Gte(bound) => compares(doc, path, bound, |o| o != Ordering::Less),
        Condition::Lt(bound) => compares(doc, path, bound, |o| o == Ordering::Less),
        Condition::Lte(bound) => compares(doc, path, bound, |o| o != Ordering::Greater),
    }
}

fn equals(doc: &Document, path: &str, expected: &Value) -> bool {
    let candidates = match_candidates(doc, path);
    if expected.is_null() {
        return candidates.is_empty() || candidates.iter().any(Value::is_null);
    }
    candidates.iter().any(|c| values_equal(c, expected))
}

fn compares(doc: &Document, path: &str, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    if bound.is_null() {
        // only the inclusive forms can hold against null
        let inclusive = accept(Ordering::Equal);
        return inclusive && equals(doc, path, bound);
    }
    match_candidates(doc, path)
        .iter()
        .filter(|c| same_type(c, bound))
        .any(|c| accept(compare_values(Some(c), Some(bound))))
}

fn same_type(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
    )
}
