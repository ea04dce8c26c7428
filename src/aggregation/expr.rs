//! Expressions and group accumulators
//!
//! Expressions evaluate against a single document and yield `None` when the
//! result is missing (as opposed to an explicit JSON `null`). Evaluation errors
//! are plain messages; the engine attaches stage and collection context.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::{Document, compare_values, get_path, is_truthy, number_value};

/// Comparison operators usable inside expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn from_operator(op: &str) -> Option<Self> {
        match op {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            _ => None,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// A computed value
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant value
    Literal(Value),
    /// Field reference (`"$address.city_id"`), stored without the `$`
    Field(String),
    /// Sub-document whose values are expressions
    Object(Vec<(String, Expression)>),
    /// Array whose elements are expressions
    Array(Vec<Expression>),
    /// String concatenation; any null or missing operand yields null
    Concat(Vec<Expression>),
    /// `if` / `then` / `else`
    Cond {
        condition: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    /// First operand that is neither null nor missing, else the last operand
    IfNull(Vec<Expression>),
    /// Round half to even at `places` decimal digits
    Round {
        value: Box<Expression>,
        places: Box<Expression>,
    },
    /// Comparison using the cross-type value order
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn field(path: impl Into<String>) -> Self {
        Expression::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    /// Evaluate against a document; `Ok(None)` means missing
    pub fn evaluate(&self, doc: &Document) -> Result<Option<Value>, String> {
        match self {
            Expression::Literal(value) => Ok(Some(value.clone())),
            Expression::Field(path) => Ok(get_path(doc, path)),
            Expression::Object(fields) => {
                let mut out = Document::new();
                for (name, expr) in fields {
                    if let Some(value) = expr.evaluate(doc)? {
                        out.insert(name.clone(), value);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            Expression::Array(items) => {
                let values = items
                    .iter()
                    .map(|e| e.evaluate(doc).map(|v| v.unwrap_or(Value::Null)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(Value::Array(values)))
            }
            Expression::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part.evaluate(doc)? {
                        None | Some(Value::Null) => return Ok(Some(Value::Null)),
                        Some(Value::String(s)) => out.push_str(&s),
                        Some(other) => {
                            return Err(format!(
                                "$concat only supports strings, found {}",
                                type_name(&other)
                            ));
                        }
                    }
                }
                Ok(Some(Value::String(out)))
            }
            Expression::Cond {
                condition,
                then,
                otherwise,
            } => {
                if is_truthy(condition.evaluate(doc)?.as_ref()) {
                    then.evaluate(doc)
                } else {
                    otherwise.evaluate(doc)
                }
            }
            Expression::IfNull(operands) => {
                let Some((fallback, candidates)) = operands.split_last() else {
                    return Ok(None);
                };
                for candidate in candidates {
                    match candidate.evaluate(doc)? {
                        None | Some(Value::Null) => continue,
                        found => return Ok(found),
                    }
                }
                fallback.evaluate(doc)
            }
            Expression::Round { value, places } => {
                let number = match value.evaluate(doc)? {
                    None | Some(Value::Null) => return Ok(Some(Value::Null)),
                    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                    Some(other) => {
                        return Err(format!(
                            "$round only supports numeric types, found {}",
                            type_name(&other)
                        ));
                    }
                };
                let places = match places.evaluate(doc)? {
                    Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                        format!("$round precision must be an integer, found {n}")
                    })?,
                    None => 0,
                    Some(other) => {
                        return Err(format!(
                            "$round precision must be an integer, found {}",
                            type_name(&other)
                        ));
                    }
                };
                Ok(Some(round_half_even(number, places)))
            }
            Expression::Compare { op, left, right } => {
                let left = left.evaluate(doc)?;
                let right = right.evaluate(doc)?;
                let ordering = compare_values(left.as_ref(), right.as_ref());
                Ok(Some(Value::Bool(op.accepts(ordering))))
            }
        }
    }

    /// Field paths this expression reads
    pub fn field_paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Field(path) => out.push(path),
            Expression::Object(fields) => fields.iter().for_each(|(_, e)| e.collect_paths(out)),
            Expression::Array(items) | Expression::Concat(items) | Expression::IfNull(items) => {
                items.iter().for_each(|e| e.collect_paths(out))
            }
            Expression::Cond {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_paths(out);
                then.collect_paths(out);
                otherwise.collect_paths(out);
            }
            Expression::Round { value, places } => {
                value.collect_paths(out);
                places.collect_paths(out);
            }
            Expression::Compare { left, right, .. } => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
        }
    }
}

/// Scaled magnitudes at or above this lose precision when nudged
const NUDGE_LIMIT: f64 = 9.0e6;

/// Round half to even at `places` decimal digits
pub fn round_half_even(value: f64, places: i64) -> Value {
    let places = places.clamp(-20, 20) as i32;
    let factor = 10f64.powi(places);
    let scaled = value * factor;
    // absorb representation error so 2.675 * 100 rounds as 267.5
    let nudged = if scaled.abs() < NUDGE_LIMIT {
        (scaled * 1e9).round() / 1e9
    } else {
        scaled
    };
    number_value(nudged.round_ties_even() / factor)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Group accumulator
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Floating-point sum of numeric values; non-numeric values are ignored
    Sum(Expression),
    Avg(Expression),
    /// Value from the first document of the group (null when missing)
    First(Expression),
    Last(Expression),
    Min(Expression),
    Max(Expression),
    Push(Expression),
    /// Number of documents in the group
    Count,
}

impl Accumulator {
    pub fn operator(&self) -> &'static str {
        match self {
            Accumulator::Sum(_) => "$sum",
            Accumulator::Avg(_) => "$avg",
            Accumulator::First(_) => "$first",
            Accumulator::Last(_) => "$last",
            Accumulator::Min(_) => "$min",
            Accumulator::Max(_) => "$max",
            Accumulator::Push(_) => "$push",
            Accumulator::Count => "$count",
        }
    }

    pub fn expression(&self) -> Option<&Expression> {
        match self {
            Accumulator::Sum(e)
            | Accumulator::Avg(e)
            | Accumulator::First(e)
            | Accumulator::Last(e)
            | Accumulator::Min(e)
            | Accumulator::Max(e)
            | Accumulator::Push(e) => Some(e),
            Accumulator::Count => None,
        }
    }

    /// Fresh running state for one group
    pub(crate) fn start(&self) -> AccumulatorState {
        match self {
            Accumulator::Sum(_) => AccumulatorState::Sum(0.0),
            Accumulator::Avg(_) => AccumulatorState::Avg { total: 0.0, n: 0 },
            Accumulator::First(_) => AccumulatorState::First(None),
            Accumulator::Last(_) => AccumulatorState::Last(Value::Null),
            Accumulator::Min(_) | Accumulator::Max(_) => AccumulatorState::Extreme(None),
            Accumulator::Push(_) => AccumulatorState::Push(Vec::new()),
            Accumulator::Count => AccumulatorState::Count(0),
        }
    }
}

/// Running state of one accumulator within one group
#[derive(Debug, Clone)]
pub(crate) enum AccumulatorState {
    Sum(f64),
    Avg { total: f64, n: u64 },
    First(Option<Value>),
    Last(Value),
    Extreme(Option<Value>),
    Push(Vec<Value>),
    Count(u64),
}

impl AccumulatorState {
    /// Fold one document into the state
    pub(crate) fn update(&mut self, acc: &Accumulator, doc: &Document) -> Result<(), String> {
        let value = match acc.expression() {
            Some(expr) => expr.evaluate(doc)?,
            None => None,
        };

        match self {
            AccumulatorState::Sum(total) => {
                if let Some(n) = value.as_ref().and_then(Value::as_f64) {
                    *total += n;
                }
            }
            AccumulatorState::Avg { total, n } => {
                if let Some(x) = value.as_ref().and_then(Value::as_f64) {
                    *total += x;
                    *n += 1;
                }
            }
            AccumulatorState::First(first) => {
                if first.is_none() {
                    *first = Some(value.unwrap_or(Value::Null));
                }
            }
            AccumulatorState::Last(last) => *last = value.unwrap_or(Value::Null),
            AccumulatorState::Extreme(current) => {
                let Some(candidate) = value.filter(|v| !v.is_null()) else {
                    return Ok(());
                };
                let wanted = if matches!(acc, Accumulator::Min(_)) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let replace = match current {
                    None => true,
                    Some(existing) => compare_values(Some(&candidate), Some(existing)) == wanted,
                };
                if replace {
                    *current = Some(candidate);
                }
            }
            AccumulatorState::Push(items) => {
                if let Some(v) = value {
                    items.push(v);
                }
            }
            AccumulatorState::Count(n) => *n += 1,
        }
        Ok(())
    }

    /// Final value of the accumulator
    pub(crate) fn finish(self) -> Value {
        match self {
            AccumulatorState::Sum(total) => number_value(total),
            AccumulatorState::Avg { total, n } => {
                if n == 0 {
                    Value::Null
                } else {
                    number_value(total / n as f64)
                }
            }
            AccumulatorState::First(first) => first.unwrap_or(Value::Null),
            AccumulatorState::Last(last) => last,
            AccumulatorState::Extreme(value) => value.unwrap_or(Value::Null),
            AccumulatorState::Push(items) => Value::Array(items),
            AccumulatorState::Count(n) => Value::from(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_concat_with_missing_operand_is_null() {
        let expr = Expression::Concat(vec![
            Expression::field("actor.first_name"),
            Expression::literal(" "),
            Expression::field("actor.last_name"),
        ]);
        let d = doc(json!({"actor": {"first_name": "PENELOPE", "last_name": "GUINESS"}}));
        assert_eq!(expr.evaluate(&d).unwrap(), Some(json!("PENELOPE GUINESS")));

        let orphan = doc(json!({"actor": null}));
        assert_eq!(expr.evaluate(&orphan).unwrap(), Some(Value::Null));
    }

    #[test]
    fn test_concat_rejects_numbers() {
        let expr = Expression::Concat(vec![Expression::field("n")]);
        let err = expr.evaluate(&doc(json!({"n": 3}))).unwrap_err();
        assert!(err.contains("$concat"));
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.675, 2), json!(2.68));
        assert_eq!(round_half_even(2.665, 2), json!(2.66));
        assert_eq!(round_half_even(0.125, 2), json!(0.12));
        assert_eq!(round_half_even(2.5, 0), json!(2));
        assert_eq!(round_half_even(3.5, 0), json!(4));
        assert_eq!(round_half_even(67416.51, 2), json!(67416.51));
    }

    #[test]
    fn test_round_half_even_large_values() {
        assert_eq!(round_half_even(1e15 + 0.5, 0), json!(1_000_000_000_000_000i64));
        assert_eq!(round_half_even(1e15 + 1.5, 0), json!(1_000_000_000_000_002i64));
        assert_eq!(round_half_even(1e15 + 0.25, 0), json!(1_000_000_000_000_000i64));
        assert_eq!(round_half_even(123_456_789.125, 2), json!(123_456_789.12));
    }

    #[test]
    fn test_cond_and_compare() {
        let expr = Expression::Cond {
            condition: Box::new(Expression::Compare {
                op: CompareOp::Gte,
                left: Box::new(Expression::field("address.address")),
                right: Box::new(Expression::literal("")),
            }),
            then: Box::new(Expression::field("address.address")),
            otherwise: Box::new(Expression::field("address.address2")),
        };
        let primary = doc(json!({"address": {"address": "1 Main St", "address2": "x"}}));
        assert_eq!(expr.evaluate(&primary).unwrap(), Some(json!("1 Main St")));

        let empty = doc(json!({"address": {"address": "", "address2": "x"}}));
        assert_eq!(expr.evaluate(&empty).unwrap(), Some(json!("")));

        let absent = doc(json!({"address": {"address2": "Suite 4"}}));
        assert_eq!(expr.evaluate(&absent).unwrap(), Some(json!("Suite 4")));
    }

    #[test]
    fn test_if_null() {
        let expr = Expression::IfNull(vec![
            Expression::field("nickname"),
            Expression::literal("n/a"),
        ]);
        assert_eq!(expr.evaluate(&doc(json!({}))).unwrap(), Some(json!("n/a")));
        assert_eq!(
            expr.evaluate(&doc(json!({"nickname": "Bo"}))).unwrap(),
            Some(json!("Bo"))
        );
    }

    #[test]
    fn test_field_paths() {
        let expr = Expression::Concat(vec![
            Expression::field("first_name"),
            Expression::literal(" "),
            Expression::field("last_name"),
        ]);
        assert_eq!(expr.field_paths(), vec!["first_name", "last_name"]);
    }

    #[test]
    fn test_accumulators() {
        let docs = [
            doc(json!({"amount": 2.99, "name": "b"})),
            doc(json!({"amount": "n/a"})),
            doc(json!({"amount": 0.99, "name": "a"})),
        ];
        let cases = [
            (Accumulator::Sum(Expression::field("amount")), json!(3.98)),
            (Accumulator::Sum(Expression::literal(1)), json!(3)),
            (Accumulator::Count, json!(3)),
            (Accumulator::First(Expression::field("name")), json!("b")),
            (Accumulator::Min(Expression::field("name")), json!("a")),
            (Accumulator::Max(Expression::field("amount")), json!("n/a")),
            (
                Accumulator::Push(Expression::field("name")),
                json!(["b", "a"]),
            ),
        ];
        for (acc, expected) in cases {
            let mut state = acc.start();
            for d in &docs {
                state.update(&acc, d).unwrap();
            }
            let value = state.finish();
            match (&value, &expected) {
                (Value::Number(a), Value::Number(b)) => {
                    assert!((a.as_f64().unwrap() - b.as_f64().unwrap()).abs() < 1e-9)
                }
                _ => assert_eq!(value, expected, "{}", acc.operator()),
            }
        }
    }

    #[test]
    fn test_first_of_missing_is_null() {
        let acc = Accumulator::First(Expression::field("absent"));
        let mut state = acc.start();
        state.update(&acc, &doc(json!({"x": 1}))).unwrap();
        state.update(&acc, &doc(json!({"absent": 5}))).unwrap();
        assert_eq!(state.finish(), Value::Null);
    }
}
