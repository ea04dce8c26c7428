//! JSON form of pipelines
//!
//! Accepts the stage syntax document stores use
//! (`[{"$group": {...}}, {"$sort": {"count": -1}}, ...]`). Parse failures are
//! reported as [`PipelineError::InvalidStage`] with the index of the stage.

use serde_json::{Map, Value};

use crate::document::Filter;

use super::error::{PipelineError, PipelineResult};
use super::expr::{Accumulator, CompareOp, Expression};
use super::stage::{
    GroupSpec, LookupSpec, Pipeline, Projection, SortDirection, SortKey, Stage, UnwindSpec,
};

impl Pipeline {
    /// Parse a pipeline from its JSON array form
    pub fn from_json(value: &Value) -> PipelineResult<Self> {
        let Value::Array(stages) = value else {
            return Err(PipelineError::invalid_stage(
                0,
                "a pipeline must be an array of stages",
            ));
        };

        stages
            .iter()
            .enumerate()
            .map(|(index, stage)| {
                parse_stage(stage).map_err(|reason| PipelineError::invalid_stage(index, reason))
            })
            .collect::<PipelineResult<Vec<_>>>()
            .map(Pipeline::from)
    }

    /// Parse a pipeline from a JSON string
    pub fn parse_str(text: &str) -> PipelineResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| PipelineError::invalid_stage(0, format!("malformed JSON: {e}")))?;
        Self::from_json(&value)
    }
}

/// Parse a single `{"$op": spec}` stage object
pub fn parse_stage(value: &Value) -> Result<Stage, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "stage must be an object".to_string())?;
    if obj.len() != 1 {
        return Err(format!(
            "stage must have exactly one operator, found {}",
            obj.len()
        ));
    }
    let Some((op, spec)) = obj.iter().next() else {
        return Err("empty stage object".to_string());
    };

    match op.as_str() {
        "$match" => Filter::from_json(spec)
            .map(Stage::Match)
            .map_err(|e| e.to_string()),
        "$group" => parse_group(spec).map(Stage::Group),
        "$sort" => parse_sort(spec).map(Stage::Sort),
        "$limit" => spec
            .as_u64()
            .map(|n| Stage::Limit(n as usize))
            .ok_or_else(|| format!("$limit must be a non-negative integer, found {spec}")),
        "$lookup" => parse_lookup(spec).map(Stage::Lookup),
        "$unwind" => parse_unwind(spec).map(Stage::Unwind),
        "$addFields" | "$set" => parse_add_fields(spec).map(Stage::AddFields),
        "$project" => parse_project(spec).map(Stage::Project),
        "$count" => parse_count(spec).map(Stage::Count),
        other => Err(format!("unknown stage operator '{other}'")),
    }
}

fn as_object<'a>(op: &str, value: &'a Value) -> Result<&'a Map<String, Value>, String> {
    value
        .as_object()
        .ok_or_else(|| format!("{op} must be an object"))
}

fn field_ref(op: &str, value: &Value) -> Result<String, String> {
    value
        .as_str()
        .and_then(|s| s.strip_prefix('$'))
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| format!("{op} path must be a string starting with '$'"))
}

fn required_str(op: &str, obj: &Map<String, Value>, key: &str) -> Result<String, String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| format!("{op} requires a string '{key}'"))
}

fn parse_group(value: &Value) -> Result<GroupSpec, String> {
    let obj = as_object("$group", value)?;
    let key = obj
        .get("_id")
        .ok_or_else(|| "$group requires an '_id' key expression".to_string())
        .and_then(parse_expression)?;

    let accumulators = obj
        .iter()
        .filter(|(name, _)| name.as_str() != "_id")
        .map(|(name, spec)| {
            if name.contains('.') {
                return Err(format!("$group field '{name}' must not contain '.'"));
            }
            parse_accumulator(spec).map(|acc| (name.clone(), acc))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GroupSpec { key, accumulators })
}

fn parse_accumulator(value: &Value) -> Result<Accumulator, String> {
    let obj = value
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| format!("accumulator must be an object with one operator, found {value}"))?;
    let Some((op, operand)) = obj.iter().next() else {
        return Err("empty accumulator".to_string());
    };

    if op == "$count" {
        return Ok(Accumulator::Count);
    }

    let expr = parse_expression(operand)?;
    match op.as_str() {
        "$sum" => Ok(Accumulator::Sum(expr)),
        "$avg" => Ok(Accumulator::Avg(expr)),
        "$first" => Ok(Accumulator::First(expr)),
        "$last" => Ok(Accumulator::Last(expr)),
        "$min" => Ok(Accumulator::Min(expr)),
        "$max" => Ok(Accumulator::Max(expr)),
        "$push" => Ok(Accumulator::Push(expr)),
        other => Err(format!("unknown accumulator '{other}'")),
    }
}

fn parse_sort(value: &Value) -> Result<Vec<SortKey>, String> {
    let obj = as_object("$sort", value)?;
    if obj.is_empty() {
        return Err("$sort requires at least one key".to_string());
    }

    obj.iter()
        .map(|(path, dir)| {
            let direction = match dir.as_i64() {
                Some(1) => SortDirection::Ascending,
                Some(-1) => SortDirection::Descending,
                _ => return Err(format!("sort direction for '{path}' must be 1 or -1")),
            };
            Ok(SortKey {
                path: path.clone(),
                direction,
            })
        })
        .collect()
}

fn parse_lookup(value: &Value) -> Result<LookupSpec, String> {
    let obj = as_object("$lookup", value)?;
    Ok(LookupSpec {
        from: required_str("$lookup", obj, "from")?,
        local_field: required_str("$lookup", obj, "localField")?,
        foreign_field: required_str("$lookup", obj, "foreignField")?,
        as_field: required_str("$lookup", obj, "as")?,
    })
}

fn parse_unwind(value: &Value) -> Result<UnwindSpec, String> {
    match value {
        Value::String(_) => Ok(UnwindSpec {
            path: field_ref("$unwind", value)?,
            preserve_missing: false,
        }),
        Value::Object(obj) => {
            let path = obj
                .get("path")
                .ok_or_else(|| "$unwind requires a path".to_string())
                .and_then(|p| field_ref("$unwind", p))?;
            let preserve_missing = match obj.get("preserveNullAndEmptyArrays") {
                None => false,
                Some(Value::Bool(b)) => *b,
                Some(other) => {
                    return Err(format!(
                        "preserveNullAndEmptyArrays must be a boolean, found {other}"
                    ));
                }
            };
            Ok(UnwindSpec {
                path,
                preserve_missing,
            })
        }
        _ => Err("$unwind must be a string or an object".to_string()),
    }
}

fn parse_add_fields(value: &Value) -> Result<Vec<(String, Expression)>, String> {
    as_object("$addFields", value)?
        .iter()
        .map(|(name, spec)| parse_expression(spec).map(|e| (name.clone(), e)))
        .collect()
}

fn parse_project(value: &Value) -> Result<Vec<(String, Projection)>, String> {
    let obj = as_object("$project", value)?;
    if obj.is_empty() {
        return Err("$project requires at least one field".to_string());
    }

    let fields = obj
        .iter()
        .map(|(name, spec)| {
            let projection = match spec {
                Value::Bool(true) => Projection::Include,
                Value::Bool(false) => Projection::Exclude,
                Value::Number(n) if n.as_f64() == Some(0.0) => Projection::Exclude,
                Value::Number(_) => Projection::Include,
                other => Projection::Computed(parse_expression(other)?),
            };
            Ok((name.clone(), projection))
        })
        .collect::<Result<Vec<_>, String>>()?;

    let excludes_other_than_id = fields
        .iter()
        .any(|(name, p)| name != "_id" && matches!(p, Projection::Exclude));
    let shapes_output = fields
        .iter()
        .any(|(_, p)| !matches!(p, Projection::Exclude));
    if excludes_other_than_id && shapes_output {
        return Err("$project cannot mix exclusions with inclusions".to_string());
    }

    Ok(fields)
}

fn parse_count(value: &Value) -> Result<String, String> {
    match value.as_str() {
        Some(name) if !name.is_empty() && !name.starts_with('$') && !name.contains('.') => {
            Ok(name.to_string())
        }
        _ => Err("$count must be a non-empty field name without '$' or '.'".to_string()),
    }
}

/// Parse an expression from its JSON form
pub fn parse_expression(value: &Value) -> Result<Expression, String> {
    match value {
        Value::String(s) if s.starts_with("$$") => {
            Err(format!("variables are not supported: '{s}'"))
        }
        Value::String(s) if s.starts_with('$') => Ok(Expression::Field(s[1..].to_string())),
        Value::Array(items) => items
            .iter()
            .map(parse_expression)
            .collect::<Result<Vec<_>, _>>()
            .map(Expression::Array),
        Value::Object(obj) => match obj.iter().next() {
            Some((op, operand)) if obj.len() == 1 && op.starts_with('$') => {
                parse_operator(op, operand)
            }
            _ => obj
                .iter()
                .map(|(k, v)| {
                    if k.starts_with('$') {
                        Err(format!("operator '{k}' must be the only key of its object"))
                    } else {
                        parse_expression(v).map(|e| (k.clone(), e))
                    }
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Expression::Object),
        },
        literal => Ok(Expression::Literal(literal.clone())),
    }
}

fn operand_list(op: &str, operand: &Value) -> Result<Vec<Expression>, String> {
    match operand {
        Value::Array(items) => items.iter().map(parse_expression).collect(),
        _ => Err(format!("{op} expects an array of operands")),
    }
}

fn exactly<const N: usize>(op: &str, operand: &Value) -> Result<[Expression; N], String> {
    let items = operand_list(op, operand)?;
    let found = items.len();
    items
        .try_into()
        .map_err(|_| format!("{op} expects {N} operands, found {found}"))
}

fn parse_operator(op: &str, operand: &Value) -> Result<Expression, String> {
    if let Some(compare) = CompareOp::from_operator(op) {
        let [left, right] = exactly::<2>(op, operand)?;
        return Ok(Expression::Compare {
            op: compare,
            left: Box::new(left),
            right: Box::new(right),
        });
    }

    match op {
        "$literal" => Ok(Expression::Literal(operand.clone())),
        "$concat" => operand_list(op, operand).map(Expression::Concat),
        "$ifNull" => {
            let operands = operand_list(op, operand)?;
            if operands.len() < 2 {
                return Err("$ifNull expects at least 2 operands".to_string());
            }
            Ok(Expression::IfNull(operands))
        }
        "$round" => {
            let mut operands = operand_list(op, operand)?;
            let places = match operands.len() {
                1 => Expression::literal(0),
                2 => operands.remove(1),
                n => return Err(format!("$round expects 1 or 2 operands, found {n}")),
            };
            let value = operands.remove(0);
            Ok(Expression::Round {
                value: Box::new(value),
                places: Box::new(places),
            })
        }
        "$cond" => {
            let [condition, then, otherwise] = match operand {
                Value::Object(obj) => {
                    let branch = |key: &str| {
                        obj.get(key)
                            .ok_or_else(|| format!("$cond requires '{key}'"))
                            .and_then(parse_expression)
                    };
                    [branch("if")?, branch("then")?, branch("else")?]
                }
                _ => exactly::<3>(op, operand)?,
            };
            Ok(Expression::Cond {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            })
        }
        other => Err(format!("unknown expression operator '{other}'")),
    }
}
