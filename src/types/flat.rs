use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::syntax::SourceLocation;

/// One flattened syntax node, addressable on its own and linked to its
/// parent by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatNode {
    pub node_id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl FlatNode {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            loc: None,
            root: false,
            parent_id: None,
            parent_type: None,
            field: None,
            name: None,
            kind: None,
            value: None,
        }
    }

    /// Short human-readable form used by the CLI and log lines.
    pub fn summary(&self) -> String {
        let mut out = self.node_type.clone();
        if let Some(name) = &self.name {
            out.push_str(&format!(" '{}'", name));
        }
        if let Some(kind) = &self.kind {
            out.push_str(&format!(" [{}]", kind));
        }
        if let Some(loc) = &self.loc {
            out.push_str(&format!(" @{}:{}", loc.start.line, loc.start.column));
        }
        out
    }
}
