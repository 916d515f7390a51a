use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A point in a source file. Lines are 1-based, columns 0-based, `index` is
/// the byte offset from the start of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start: Position,
    pub end: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Children hanging off a node under one field name.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    One(Box<SyntaxNode>),
    Many(Vec<SyntaxNode>),
}

impl Slot {
    /// View the slot as an ordered list regardless of arity.
    pub fn as_slice(&self) -> &[SyntaxNode] {
        match self {
            Slot::One(node) => std::slice::from_ref(node.as_ref()),
            Slot::Many(nodes) => nodes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// A parsed syntax node in Babel/ESTree vocabulary.
///
/// Every variant shares the same shape: a `node_type` discriminant, a few
/// optional scalar attributes and a set of named child slots. Which slots a
/// node exposes depends on its type; [`SyntaxNode::slot`] answers `None` for
/// a field the node does not carry.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    pub node_type: String,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub value: Option<Value>,
    pub loc: Option<SourceLocation>,
    slots: Vec<(&'static str, Slot)>,
}

impl SyntaxNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            name: None,
            kind: None,
            value: None,
            loc: None,
            slots: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_loc(mut self, loc: SourceLocation) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn with_child(mut self, field: &'static str, child: SyntaxNode) -> Self {
        self.set_child(field, Some(child));
        self
    }

    pub fn with_children(mut self, field: &'static str, children: Vec<SyntaxNode>) -> Self {
        self.set_children(field, children);
        self
    }

    /// Attach a single child; `None` leaves the field absent.
    pub fn set_child(&mut self, field: &'static str, child: Option<SyntaxNode>) {
        if let Some(child) = child {
            self.put(field, Slot::One(Box::new(child)));
        }
    }

    pub fn set_children(&mut self, field: &'static str, children: Vec<SyntaxNode>) {
        self.put(field, Slot::Many(children));
    }

    fn put(&mut self, field: &'static str, slot: Slot) {
        match self.slots.iter_mut().find(|(name, _)| *name == field) {
            Some(existing) => existing.1 = slot,
            None => self.slots.push((field, slot)),
        }
    }

    pub fn slot(&self, field: &str) -> Option<&Slot> {
        self.slots
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, slot)| slot)
    }

    pub fn take_slot(&mut self, field: &str) -> Option<Slot> {
        let pos = self.slots.iter().position(|(name, _)| *name == field)?;
        Some(self.slots.remove(pos).1)
    }

    /// Field names this node carries, in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|(name, _)| *name)
    }

    pub fn is(&self, node_type: &str) -> bool {
        self.node_type == node_type
    }
}

// Children are released from a heap stack; the derived glue would recurse
// once per nesting level.
impl Drop for SyntaxNode {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let mut pending: Vec<Slot> = self.slots.drain(..).map(|(_, slot)| slot).collect();
        while let Some(slot) = pending.pop() {
            match slot {
                Slot::One(mut node) => pending.extend(node.slots.drain(..).map(|(_, s)| s)),
                Slot::Many(nodes) => {
                    for mut node in nodes {
                        pending.extend(node.slots.drain(..).map(|(_, s)| s));
                    }
                }
            }
        }
    }
}

/// Truthiness of a scalar attribute: empty strings, zero, `false` and null
/// count as absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
