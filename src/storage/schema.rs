use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IndexerError, Result};
use crate::types::FlatNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Boolean,
    Number,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Number => "number",
        }
    }

    /// Canonical key for the exact-filter index, or `None` on a type mismatch.
    fn key_for(self, value: &Value) -> Option<String> {
        match (self, value) {
            (FieldType::String, Value::String(s)) => Some(s.clone()),
            (FieldType::Boolean, Value::Bool(b)) => Some(b.to_string()),
            (FieldType::Number, Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Record layout the index accepts. Field names use the serialized
/// (camelCase) names of [`FlatNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<(String, FieldType)>,
    searchable: Vec<String>,
}

impl Default for Schema {
    fn default() -> Self {
        let mut schema = Self::empty();
        for field in ["parentType", "parentId", "nodeId", "field", "name", "type", "kind"] {
            schema = schema.with_field(field, FieldType::String);
        }
        schema.with_searchable("name").with_searchable("kind")
    }
}

impl Schema {
    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            searchable: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = field_type,
            None => self.fields.push((name, field_type)),
        }
        self
    }

    /// Mark a declared string field as a default target of term search.
    pub fn with_searchable(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.searchable.contains(&name) {
            self.searchable.push(name);
        }
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> + '_ {
        self.fields.iter().map(|(n, t)| (n.as_str(), *t))
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| *t)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn searchable(&self) -> &[String] {
        &self.searchable
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve a field name, rejecting names the schema does not declare.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.position(name)
            .ok_or_else(|| IndexerError::UnknownField(name.to_string()))
    }

    /// Project a record onto the schema, one entry per declared field in
    /// declaration order. Absent attributes project to `None`; present ones
    /// must match the declared type.
    pub fn project(&self, node: &FlatNode) -> Result<Vec<Option<String>>> {
        let value = serde_json::to_value(node)?;
        let object = match &value {
            Value::Object(map) => map,
            other => {
                return Err(IndexerError::SchemaMismatch {
                    node_id: node.node_id.clone(),
                    field: "<record>".to_string(),
                    expected: "object".to_string(),
                    found: json_type_name(other).to_string(),
                })
            }
        };

        self.fields
            .iter()
            .map(|(name, field_type)| match object.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => field_type.key_for(v).map(Some).ok_or_else(|| {
                    IndexerError::SchemaMismatch {
                        node_id: node.node_id.clone(),
                        field: name.clone(),
                        expected: field_type.name().to_string(),
                        found: json_type_name(v).to_string(),
                    }
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_schema() {
        let schema = Schema::default();
        let names: Vec<&str> = schema.fields().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["parentType", "parentId", "nodeId", "field", "name", "type", "kind"]
        );
        assert!(schema.fields().all(|(_, t)| t == FieldType::String));
        assert_eq!(schema.searchable(), &["name".to_string(), "kind".to_string()]);
    }

    #[test]
    fn test_project_absent_fields() {
        let mut node = FlatNode::new("n0", "Identifier");
        node.name = Some("greet".to_string());
        let row = Schema::default().project(&node).unwrap();
        assert_eq!(
            row,
            vec![
                None,
                None,
                Some("n0".to_string()),
                None,
                Some("greet".to_string()),
                Some("Identifier".to_string()),
                None,
            ]
        );
    }

    #[test]
    fn test_project_rejects_wrong_type() {
        let mut node = FlatNode::new("n7", "StringLiteral");
        node.value = Some(json!("hi"));
        let schema = Schema::default().with_field("value", FieldType::Number);

        let err = schema.project(&node).unwrap_err();
        match err {
            IndexerError::SchemaMismatch {
                node_id,
                field,
                expected,
                found,
            } => {
                assert_eq!(node_id, "n7");
                assert_eq!(field, "value");
                assert_eq!(expected, "number");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_boolean_and_number_keys() {
        let mut node = FlatNode::new("n1", "NumericLiteral");
        node.root = true;
        node.value = Some(json!(42));
        let schema = Schema::empty()
            .with_field("root", FieldType::Boolean)
            .with_field("value", FieldType::Number);

        let row = schema.project(&node).unwrap();
        assert_eq!(row, vec![Some("true".to_string()), Some("42".to_string())]);
    }

    #[test]
    fn test_require_unknown_field() {
        let err = Schema::default().require("colour").unwrap_err();
        assert!(matches!(err, IndexerError::UnknownField(f) if f == "colour"));
    }
}
