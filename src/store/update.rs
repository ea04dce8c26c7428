//! Field-level update operators (`$set`, `$unset`, `$inc`)

use serde_json::Value;

use crate::document::{Document, get_path, number_value, remove_path, root_field, set_path};

use super::error::{StoreError, StoreResult};

/// A field-level modification applied to matching documents
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    set: Vec<(String, Value)>,
    unset: Vec<String>,
    inc: Vec<(String, f64)>,
}

/// Result of an update call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    /// Documents the filter selected
    pub matched: usize,
    /// Documents whose content actually changed
    pub modified: usize,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a (dotted) field
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((path.into(), value.into()));
        self
    }

    /// Remove a (dotted) field
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    /// Add to a numeric field, creating it when absent
    pub fn inc(mut self, path: impl Into<String>, by: f64) -> Self {
        self.inc.push((path.into(), by));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }

    /// Parse `{"$set": {...}, "$unset": {...}, "$inc": {...}}`
    pub fn from_json(value: &Value) -> StoreResult<Self> {
        let Value::Object(ops) = value else {
            return Err(StoreError::InvalidUpdate(format!(
                "expected an object, found {value}"
            )));
        };

        let mut update = Update::new();
        for (op, fields) in ops {
            let Value::Object(fields) = fields else {
                return Err(StoreError::InvalidUpdate(format!("{op} expects an object")));
            };
            for (path, operand) in fields {
                update = match op.as_str() {
                    "$set" => update.set(path.clone(), operand.clone()),
                    "$unset" => update.unset(path.clone()),
                    "$inc" => {
                        let by = operand.as_f64().ok_or_else(|| {
                            StoreError::InvalidUpdate(format!("$inc on '{path}' needs a number"))
                        })?;
                        update.inc(path.clone(), by)
                    }
                    other => {
                        return Err(StoreError::InvalidUpdate(format!(
                            "unsupported update operator '{other}'"
                        )));
                    }
                };
            }
        }
        update.validate()?;
        Ok(update)
    }

    /// Reject empty updates and updates touching `_id`
    pub fn validate(&self) -> StoreResult<()> {
        if self.is_empty() {
            return Err(StoreError::InvalidUpdate("update has no operators".to_string()));
        }
        let touches_id = self
            .set
            .iter()
            .map(|(p, _)| p.as_str())
            .chain(self.unset.iter().map(String::as_str))
            .chain(self.inc.iter().map(|(p, _)| p.as_str()))
            .any(|p| root_field(p) == "_id");
        if touches_id {
            return Err(StoreError::InvalidUpdate("'_id' is immutable".to_string()));
        }
        Ok(())
    }

    /// Apply to a document, returning whether it changed
    pub fn apply(&self, doc: &mut Document) -> StoreResult<bool> {
        let before = doc.clone();

        for (path, by) in &self.inc {
            let current = match get_path(doc, path) {
                None | Some(Value::Null) => 0.0,
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(other) => {
                    return Err(StoreError::InvalidUpdate(format!(
                        "cannot $inc non-numeric field '{path}' ({other})"
                    )));
                }
            };
            set_path(doc, path, number_value(current + by));
        }
        for (path, value) in &self.set {
            set_path(doc, path, value.clone());
        }
        for path in &self.unset {
            remove_path(doc, path);
        }

        Ok(*doc != before)
    }
}
