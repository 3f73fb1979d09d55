//! Reusable whole-snapshot migration steps.

use super::MigrationStep;
use crate::storage::Snapshot;
use serde_json::Value;
use std::sync::Arc;

/// Inserts `field` with `default` when the snapshot does not carry it yet.
pub fn add_field(field: impl Into<String>, default: Value) -> MigrationStep {
    let field = field.into();
    Arc::new(move |input: &Snapshot| -> Result<Snapshot, String> {
        let mut next = input.clone();
        next.entry(field.clone()).or_insert_with(|| default.clone());
        Ok(next)
    })
}

/// Moves `from` to `to`. Snapshots without `from` pass through unchanged.
pub fn rename_field(from: impl Into<String>, to: impl Into<String>) -> MigrationStep {
    let from = from.into();
    let to = to.into();
    Arc::new(move |input: &Snapshot| -> Result<Snapshot, String> {
        let mut next = input.clone();
        if let Some(value) = next.remove(&from) {
            next.insert(to.clone(), value);
        }
        Ok(next)
    })
}

pub fn remove_field(field: impl Into<String>) -> MigrationStep {
    let field = field.into();
    Arc::new(move |input: &Snapshot| -> Result<Snapshot, String> {
        let mut next = input.clone();
        next.remove(&field);
        Ok(next)
    })
}

/// Applies `step` to every object element of the array stored at `field`.
///
/// An absent field is left alone; a non-array field or a non-object element
/// fails the step.
pub fn each_in_array(field: impl Into<String>, step: MigrationStep) -> MigrationStep {
    let field = field.into();
    Arc::new(move |input: &Snapshot| -> Result<Snapshot, String> {
        let items = match input.get(&field) {
            None => return Ok(input.clone()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(format!(
                    "field `{field}` should be an array, got {}",
                    kind_label(other)
                ))
            }
        };

        let mut migrated = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let Value::Object(element) = item else {
                return Err(format!(
                    "element {index} of `{field}` should be an object, got {}",
                    kind_label(item)
                ));
            };
            migrated.push(Value::Object(step(element)?));
        }

        let mut next = input.clone();
        next.insert(field.clone(), Value::Array(migrated));
        Ok(next)
    })
}

fn kind_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
