//! Syntax tree flattening.
//!
//! Turns one parsed tree into an ordered list of [`FlatNode`] records in
//! depth-first preorder. Parents are always emitted before their children,
//! and the binding kind of a `VariableDeclaration` is stamped onto every
//! node below it until the next nested declaration.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{IndexerError, Result};
use crate::types::{is_truthy, FlatNode, SyntaxNode};

/// Child slots the walk descends into, in visiting order. Children reachable
/// only through other fields are not visited.
pub const TRAVERSAL_FIELDS: &[&str] = &[
    "body",
    "declarations",
    "arguments",
    "expressions",
    "quasis",
    "property",
    "object",
    "id",
    "init",
    "expression",
    "callee",
    "params",
    "key",
    "value",
    "left",
    "right",
    "program",
];

/// Node type whose `kind` is inherited by its descendants.
pub const BINDING_DECLARATION: &str = "VariableDeclaration";

/// Source of node identifiers. One allocator is shared by a whole
/// collection run, so ids stay unique across files.
pub trait IdAllocator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidAllocator;

impl IdAllocator for UuidAllocator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Monotonic counter ids (`n0`, `n1`, ...), deterministic for a given input.
#[derive(Debug, Default)]
pub struct SequentialAllocator {
    next: AtomicU64,
}

impl SequentialAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdAllocator for SequentialAllocator {
    fn next_id(&self) -> String {
        format!("n{}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Pending visit: the node, the output index of its parent with the field it
/// hangs under, and the kind inherited from the closest enclosing declaration.
struct Frame<'a> {
    node: &'a SyntaxNode,
    parent: Option<(usize, &'static str)>,
    inherited_kind: Option<&'a str>,
}

#[derive(Clone)]
pub struct Flattener {
    ids: Arc<dyn IdAllocator>,
}

impl Default for Flattener {
    fn default() -> Self {
        Self::new()
    }
}

impl Flattener {
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(UuidAllocator))
    }

    pub fn with_allocator(ids: Arc<dyn IdAllocator>) -> Self {
        Self { ids }
    }

    /// Flatten one tree. The walk keeps its own stack, so arbitrarily deep
    /// trees do not grow the call stack.
    pub fn flatten(&self, root: &SyntaxNode) -> Vec<FlatNode> {
        let mut out: Vec<FlatNode> = Vec::new();
        let mut stack = vec![Frame {
            node: root,
            parent: None,
            inherited_kind: None,
        }];

        while let Some(frame) = stack.pop() {
            let node = frame.node;
            let mut record = FlatNode::new(self.ids.next_id(), node.node_type.clone());

            match frame.parent {
                None => record.root = true,
                Some((parent_idx, field)) => {
                    let parent = &out[parent_idx];
                    record.parent_id = Some(parent.node_id.clone());
                    record.parent_type = Some(parent.node_type.clone());
                    record.field = Some(field.to_string());
                }
            }

            project_attributes(node, &mut record);

            let passed_kind = if node.is(BINDING_DECLARATION) {
                node.kind.as_deref().filter(|k| !k.is_empty())
            } else {
                if let Some(kind) = frame.inherited_kind {
                    record.kind = Some(kind.to_string());
                }
                frame.inherited_kind
            };

            let index = out.len();
            out.push(record);

            // Reverse push keeps children popping in traversal order.
            let children = TRAVERSAL_FIELDS
                .iter()
                .filter_map(|&field| node.slot(field).map(|slot| (field, slot.as_slice())));
            let mut pending: Vec<Frame<'_>> = Vec::new();
            for (field, nodes) in children {
                for child in nodes {
                    pending.push(Frame {
                        node: child,
                        parent: Some((index, field)),
                        inherited_kind: passed_kind,
                    });
                }
            }
            stack.extend(pending.into_iter().rev());
        }

        debug!("Flattened {} nodes from {}", out.len(), root.node_type);
        out
    }
}

/// Copy `name`, `kind`, `value` and `loc` when present and truthy.
fn project_attributes(node: &SyntaxNode, record: &mut FlatNode) {
    record.name = node.name.clone().filter(|s| !s.is_empty());
    record.kind = node.kind.clone().filter(|s| !s.is_empty());
    record.value = node.value.clone().filter(is_truthy);
    record.loc = node.loc.clone();
}

/// Number of nodes reachable from `root` through [`TRAVERSAL_FIELDS`],
/// including the root itself.
pub fn reachable_count(root: &SyntaxNode) -> usize {
    let mut count = 0;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        count += 1;
        for field in TRAVERSAL_FIELDS {
            if let Some(slot) = node.slot(field) {
                stack.extend(slot.as_slice());
            }
        }
    }
    count
}

/// Verify lineage of a corpus made of one or more concatenated files: ids are
/// unique, each file starts with its single root, and every other node points
/// at a parent emitted earlier in the same file.
pub fn check_lineage(nodes: &[FlatNode]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(nodes.len());
    let mut file_start = 0usize;
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());

    for (i, node) in nodes.iter().enumerate() {
        if !seen.insert(node.node_id.as_str()) {
            return Err(IndexerError::InvariantViolation(format!(
                "duplicate node id {}",
                node.node_id
            )));
        }

        if node.root {
            if node.parent_id.is_some() {
                return Err(IndexerError::InvariantViolation(format!(
                    "root node {} has a parent",
                    node.node_id
                )));
            }
            file_start = i;
        } else {
            if i == 0 {
                return Err(IndexerError::InvariantViolation(
                    "corpus does not start with a root node".to_string(),
                ));
            }
            let parent_id = node.parent_id.as_deref().ok_or_else(|| {
                IndexerError::InvariantViolation(format!(
                    "non-root node {} has no parent",
                    node.node_id
                ))
            })?;
            match positions.get(parent_id) {
                Some(&p) if p >= file_start => {}
                Some(_) => {
                    return Err(IndexerError::InvariantViolation(format!(
                        "node {} refers to parent {} from another file",
                        node.node_id, parent_id
                    )))
                }
                None => {
                    return Err(IndexerError::InvariantViolation(format!(
                        "node {} refers to parent {} that was not emitted before it",
                        node.node_id, parent_id
                    )))
                }
            }
        }

        positions.insert(node.node_id.as_str(), i);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(name: &str) -> SyntaxNode {
        SyntaxNode::new("Identifier").with_name(name)
    }

    fn declaration(kind: &str, name: &str, init: Option<SyntaxNode>) -> SyntaxNode {
        let mut declarator = SyntaxNode::new("VariableDeclarator").with_child("id", ident(name));
        declarator.set_child("init", init);
        SyntaxNode::new("VariableDeclaration")
            .with_kind(kind)
            .with_children("declarations", vec![declarator])
    }

    fn program(body: Vec<SyntaxNode>) -> SyntaxNode {
        SyntaxNode::new("File").with_child("program", SyntaxNode::new("Program").with_children("body", body))
    }

    fn sequential() -> Flattener {
        Flattener::with_allocator(Arc::new(SequentialAllocator::new()))
    }

    #[test]
    fn test_root_and_parent_links() {
        let tree = program(vec![declaration("let", "greet", None)]);
        let nodes = sequential().flatten(&tree);

        let types: Vec<&str> = nodes.iter().map(|n| n.node_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["File", "Program", "VariableDeclaration", "VariableDeclarator", "Identifier"]
        );

        assert!(nodes[0].root);
        assert!(nodes[0].parent_id.is_none());
        assert!(nodes[0].field.is_none());
        assert_eq!(nodes.iter().filter(|n| n.root).count(), 1);

        assert_eq!(nodes[1].parent_id.as_deref(), Some("n0"));
        assert_eq!(nodes[1].parent_type.as_deref(), Some("File"));
        assert_eq!(nodes[1].field.as_deref(), Some("program"));
        assert_eq!(nodes[3].field.as_deref(), Some("declarations"));
        assert_eq!(nodes[4].field.as_deref(), Some("id"));
        assert_eq!(nodes[4].parent_type.as_deref(), Some("VariableDeclarator"));

        check_lineage(&nodes).unwrap();
    }

    #[test]
    fn test_kind_is_inherited_by_descendants() {
        let tree = program(vec![
            declaration("let", "greet", Some(SyntaxNode::new("StringLiteral").with_value(json!("hi")))),
            declaration("const", "greet", None),
        ]);
        let nodes = sequential().flatten(&tree);

        let let_block: Vec<&FlatNode> = nodes[2..6].iter().collect();
        assert_eq!(let_block[0].node_type, "VariableDeclaration");
        for node in &let_block {
            assert_eq!(node.kind.as_deref(), Some("let"), "{}", node.summary());
        }

        let const_block: Vec<&FlatNode> = nodes[6..].iter().collect();
        for node in &const_block {
            assert_eq!(node.kind.as_deref(), Some("const"), "{}", node.summary());
        }

        assert!(nodes[0].kind.is_none());
        assert!(nodes[1].kind.is_none());
    }

    #[test]
    fn test_nested_declaration_resets_inherited_kind() {
        let body = SyntaxNode::new("BlockStatement")
            .with_children("body", vec![declaration("const", "inner", None)]);
        let function = SyntaxNode::new("FunctionExpression").with_child("body", body);
        let tree = program(vec![declaration("var", "outer", Some(function))]);
        let nodes = sequential().flatten(&tree);

        let function = nodes.iter().find(|n| n.node_type == "FunctionExpression").unwrap();
        assert_eq!(function.kind.as_deref(), Some("var"));

        let inner = nodes.iter().find(|n| n.name.as_deref() == Some("inner")).unwrap();
        assert_eq!(inner.kind.as_deref(), Some("const"));

        let outer = nodes.iter().find(|n| n.name.as_deref() == Some("outer")).unwrap();
        assert_eq!(outer.kind.as_deref(), Some("var"));
    }

    #[test]
    fn test_inherited_kind_overwrites_own_kind() {
        let method = SyntaxNode::new("ClassMethod")
            .with_kind("method")
            .with_child("key", ident("run"));
        let class = SyntaxNode::new("ClassExpression").with_child(
            "body",
            SyntaxNode::new("ClassBody").with_children("body", vec![method]),
        );
        let tree = program(vec![declaration("const", "Runner", Some(class))]);
        let nodes = sequential().flatten(&tree);

        let method = nodes.iter().find(|n| n.node_type == "ClassMethod").unwrap();
        assert_eq!(method.kind.as_deref(), Some("const"));

        // Outside a declaration the node keeps its own kind.
        let standalone = program(vec![SyntaxNode::new("ClassMethod").with_kind("get")]);
        let nodes = sequential().flatten(&standalone);
        assert_eq!(nodes[2].kind.as_deref(), Some("get"));
    }

    #[test]
    fn test_falsy_attributes_are_omitted() {
        let tree = program(vec![
            SyntaxNode::new("NumericLiteral").with_value(json!(0)),
            SyntaxNode::new("NumericLiteral").with_value(json!(42)),
            SyntaxNode::new("BooleanLiteral").with_value(json!(false)),
            SyntaxNode::new("StringLiteral").with_value(json!("")),
            SyntaxNode::new("Identifier").with_name(""),
        ]);
        let nodes = sequential().flatten(&tree);

        assert!(nodes[2].value.is_none());
        assert_eq!(nodes[3].value, Some(json!(42)));
        assert!(nodes[4].value.is_none());
        assert!(nodes[5].value.is_none());
        assert!(nodes[6].name.is_none());

        let json = serde_json::to_value(&nodes[2]).unwrap();
        assert!(json.get("value").is_none());
    }

    #[test]
    fn test_untraversed_fields_are_not_reached() {
        let if_statement = SyntaxNode::new("IfStatement")
            .with_child("test", ident("ready"))
            .with_child("consequent", SyntaxNode::new("BlockStatement"));
        let object = SyntaxNode::new("ObjectExpression").with_children(
            "properties",
            vec![SyntaxNode::new("ObjectProperty").with_child("key", ident("a"))],
        );
        let tree = program(vec![if_statement, object]);
        let nodes = sequential().flatten(&tree);

        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes.len(), reachable_count(&tree));
    }

    #[test]
    fn test_children_follow_traversal_field_order() {
        // `callee` precedes `arguments` in the tree but not in the field list.
        let call = SyntaxNode::new("CallExpression")
            .with_child("callee", ident("sayHello"))
            .with_children("arguments", vec![ident("a"), ident("b")]);
        let nodes = sequential().flatten(&call);

        let order: Vec<(&str, &str)> = nodes[1..]
            .iter()
            .map(|n| (n.field.as_deref().unwrap(), n.name.as_deref().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![("arguments", "a"), ("arguments", "b"), ("callee", "sayHello")]
        );
    }

    #[test]
    fn test_deep_tree_does_not_overflow() {
        let mut node = ident("leaf");
        for _ in 0..100_000 {
            node = SyntaxNode::new("ExpressionStatement").with_child("expression", node);
        }
        let nodes = sequential().flatten(&node);
        assert_eq!(nodes.len(), 100_001);
        check_lineage(&nodes).unwrap();
    }

    #[test]
    fn test_uuid_ids_are_unique() {
        let tree = program(vec![declaration("let", "a", None), declaration("let", "b", None)]);
        let flattener = Flattener::new();
        let mut nodes = flattener.flatten(&tree);
        nodes.extend(flattener.flatten(&tree));

        let ids: HashSet<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids.len(), nodes.len());
        check_lineage(&nodes).unwrap();
    }

    #[test]
    fn test_check_lineage_rejects_bad_corpora() {
        let mut root = FlatNode::new("r", "File");
        root.root = true;
        let mut orphan = FlatNode::new("c", "Program");
        orphan.parent_id = Some("missing".to_string());
        assert!(check_lineage(&[root.clone(), orphan]).is_err());

        let dup = root.clone();
        assert!(check_lineage(&[root.clone(), dup]).is_err());

        let mut child = FlatNode::new("c", "Program");
        child.parent_id = Some("r".to_string());
        assert!(check_lineage(&[child.clone()]).is_err());

        let mut second_root = FlatNode::new("r2", "File");
        second_root.root = true;
        let mut cross = FlatNode::new("c2", "Program");
        cross.parent_id = Some("r".to_string());
        assert!(check_lineage(&[root.clone(), child.clone(), second_root.clone(), cross]).is_err());

        assert!(check_lineage(&[root, child, second_root]).is_ok());
    }
}
