//! A read-only projection over a JSON-Schema-like shape descriptor, used
//! by post-parse value coercion in the XML and YAML-in-XML protocols.
//!
//! `SchemaView` never validates — that is out of scope here; it
//! only answers "what shape is this property" so that a tolerant parser
//! can decide whether a single repeated child element should become a
//! scalar or a one-element array, etc.

use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaView<'a> {
    schema: &'a Value,
}

impl<'a> SchemaView<'a> {
    pub fn new(schema: &'a Value) -> Self {
        Self { schema }
    }

    pub fn kind(&self) -> SchemaKind {
        match self.schema.get("type").and_then(Value::as_str) {
            Some("object") => SchemaKind::Object,
            Some("array") => SchemaKind::Array,
            Some("string") => SchemaKind::String,
            Some("number") | Some("integer") => SchemaKind::Number,
            Some("boolean") => SchemaKind::Boolean,
            _ => {
                if self.schema.get("properties").is_some() {
                    SchemaKind::Object
                } else if self.schema.get("items").is_some() || self.schema.get("prefixItems").is_some()
                {
                    SchemaKind::Array
                } else {
                    SchemaKind::Unknown
                }
            }
        }
    }

    pub fn property(&self, name: &str) -> Option<SchemaView<'a>> {
        self.schema
            .get("properties")
            .and_then(|p| p.get(name))
            .map(SchemaView::new)
    }

    pub fn items(&self) -> Option<SchemaView<'a>> {
        self.schema.get("items").map(SchemaView::new)
    }

    pub fn prefix_item(&self, idx: usize) -> Option<SchemaView<'a>> {
        self.schema
            .get("prefixItems")
            .and_then(Value::as_array)
            .and_then(|arr| arr.get(idx))
            .map(SchemaView::new)
    }

    pub fn required(&self) -> HashSet<&'a str> {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn description(&self) -> Option<&'a str> {
        self.schema.get("description").and_then(Value::as_str)
    }

    pub fn properties(&self) -> Vec<(&'a str, SchemaView<'a>)> {
        self.schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.as_str(), SchemaView::new(v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Coerce a value parsed from text into the shape the schema expects.
    /// Only handles the mismatches a tolerant text parser actually produces:
    /// a lone scalar where an array of one element was meant, and vice
    /// versa. Never rejects a value outright — that is validation, which is
    /// out of scope.
    pub fn coerce(&self, value: Value) -> Value {
        match self.kind() {
            SchemaKind::Array => match value {
                Value::Array(_) => value,
                Value::Null => Value::Array(vec![]),
                other => Value::Array(vec![other]),
            },
            SchemaKind::Object => match value {
                Value::Object(_) => value,
                other => other,
            },
            _ => value,
        }
    }
}
