//! Best-effort snapshot shape validation.
//!
//! # Responsibility
//! - Compare snapshot fields against declared field kinds.
//! - Report mismatches as diagnostics for logging.
//!
//! # Invariants
//! - Validation never fails and never mutates the snapshot.
//! - Undeclared fields pass through; declared fields that are absent or
//!   `null` are treated as not yet set and are not flagged.

use crate::storage::Snapshot;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Closed set of field kinds a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Kind of a JSON value, `None` for `null`.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(_) => Some(Self::Number),
            Value::String(_) => Some(Self::String),
            Value::Array(_) => Some(Self::Array),
            Value::Object(_) => Some(Self::Object),
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-kind declarations for one store's snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: BTreeMap<String, FieldKind>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Non-fatal diagnostic for one declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMismatch {
    pub field: String,
    pub expected: FieldKind,
    pub actual: FieldKind,
}

impl Display for SchemaMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.field, self.expected, self.actual
        )
    }
}

/// Checks `snapshot` against `schema` and hands the snapshot back unchanged.
pub fn validate(snapshot: Snapshot, schema: &Schema) -> (Snapshot, Vec<SchemaMismatch>) {
    let mut warnings = Vec::new();
    for (field, &expected) in &schema.fields {
        let Some(actual) = snapshot.get(field).and_then(FieldKind::of) else {
            continue;
        };
        if actual != expected {
            warnings.push(SchemaMismatch {
                field: field.clone(),
                expected,
                actual,
            });
        }
    }
    (snapshot, warnings)
}
