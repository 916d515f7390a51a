//! Property-based tests for the flattener.
//!
//! Synthetic trees exercise the walk itself; generated JavaScript exercises
//! the same properties through the real parser.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use proptest::prelude::*;
use treedex::flatten::{reachable_count, BINDING_DECLARATION};
use treedex::{
    check_lineage, FlatNode, Flattener, ParseOptions, SequentialAllocator, SourceParser,
    SyntaxNode, TreeSitterParser,
};

const LEAF_TYPES: &[&str] = &["Identifier", "StringLiteral", "ThisExpression"];
const INNER_TYPES: &[&str] = &[
    "VariableDeclaration",
    "VariableDeclarator",
    "CallExpression",
    "BlockStatement",
    "ClassMethod",
    "FunctionDeclaration",
];
const KINDS: &[&str] = &["let", "const", "var", "method", ""];
// "consequent" and "test" are deliberately outside the traversal list.
const FIELDS: &[&str] = &[
    "body",
    "declarations",
    "id",
    "init",
    "callee",
    "arguments",
    "key",
    "params",
    "consequent",
    "test",
];

fn arb_tree() -> impl Strategy<Value = SyntaxNode> {
    let leaf = (prop::sample::select(LEAF_TYPES), "[a-z]{0,6}").prop_map(|(node_type, name)| {
        SyntaxNode::new(node_type).with_name(name)
    });

    leaf.prop_recursive(8, 128, 4, |inner| {
        (
            prop::sample::select(INNER_TYPES),
            prop::option::of(prop::sample::select(KINDS)),
            prop::collection::vec((prop::sample::select(FIELDS), inner), 0..4),
        )
            .prop_map(|(node_type, kind, children)| {
                let mut node = SyntaxNode::new(node_type);
                if let Some(kind) = kind {
                    node = node.with_kind(kind);
                }
                let mut grouped: BTreeMap<&'static str, Vec<SyntaxNode>> = BTreeMap::new();
                for (field, child) in children {
                    grouped.entry(field).or_default().push(child);
                }
                for (field, mut nodes) in grouped {
                    if nodes.len() == 1 {
                        node.set_child(field, nodes.pop());
                    } else {
                        node.set_children(field, nodes);
                    }
                }
                node
            })
    })
}

fn js_identifier() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,8}".prop_filter("not a keyword", |s| {
        !matches!(
            s.as_str(),
            "do" | "if" | "in" | "for" | "let" | "new" | "try" | "var" | "case" | "else"
                | "enum" | "null" | "this" | "true" | "void" | "with" | "break" | "catch"
                | "class" | "const" | "false" | "super" | "throw" | "while" | "yield"
                | "delete" | "export" | "import" | "return" | "static" | "switch"
                | "typeof" | "default" | "extends" | "finally" | "package" | "private"
                | "continue" | "debugger" | "function" | "interface" | "protected"
                | "implements" | "instanceof" | "await" | "async" | "of" | "get" | "set"
                | "public"
        )
    })
}

fn js_statement() -> impl Strategy<Value = String> {
    prop_oneof![
        (prop::sample::select(&["let", "const", "var"][..]), js_identifier(), 0..1000u32)
            .prop_map(|(kind, id, n)| format!("{kind} {id} = {n};")),
        (js_identifier(), js_identifier(), js_identifier())
            .prop_map(|(a, b, c)| format!("const {a} = {b}({c}, `x${{{c}}}y`);")),
        (js_identifier(), js_identifier())
            .prop_map(|(f, p)| format!("function {f}({p}) {{ let inner = {p}; return inner; }}")),
        (js_identifier(), js_identifier())
            .prop_map(|(c, m)| format!("class K{c} {{ {m}() {{ return this.{m}; }} }}")),
        (js_identifier(), js_identifier())
            .prop_map(|(o, m)| format!("{o}.{m}(new K{o}());")),
    ]
}

fn js_source() -> impl Strategy<Value = String> {
    prop::collection::vec(js_statement(), 0..8).prop_map(|s| s.join("\n"))
}

fn sequential() -> Flattener {
    Flattener::with_allocator(Arc::new(SequentialAllocator::new()))
}

/// Per record, the binding kind inherited from the nearest enclosing
/// declaration, derived only from the parent links.
fn expected_inherited(nodes: &[FlatNode]) -> Vec<Option<String>> {
    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.node_id.as_str(), i))
        .collect();
    let mut inherited: Vec<Option<String>> = Vec::with_capacity(nodes.len());

    for node in nodes {
        let value = node.parent_id.as_deref().and_then(|pid| {
            let p = position[pid];
            let parent = &nodes[p];
            if parent.node_type == BINDING_DECLARATION {
                parent.kind.clone()
            } else {
                inherited[p].clone()
            }
        });
        inherited.push(value);
    }
    inherited
}

fn assert_structure(tree: &SyntaxNode, nodes: &[FlatNode]) -> Result<(), TestCaseError> {
    prop_assert_eq!(nodes.len(), reachable_count(tree));

    prop_assert_eq!(nodes.iter().filter(|n| n.root).count(), 1);
    prop_assert!(nodes[0].root);
    prop_assert!(check_lineage(nodes).is_ok());

    for (i, node) in nodes.iter().enumerate().skip(1) {
        let parent_id = node.parent_id.as_deref().unwrap();
        prop_assert!(nodes[..i].iter().any(|p| p.node_id == parent_id));
        prop_assert!(node.field.is_some());
    }

    for (node, inherited) in nodes.iter().zip(expected_inherited(nodes)) {
        if node.node_type != BINDING_DECLARATION {
            if let Some(kind) = inherited {
                prop_assert_eq!(node.kind.as_deref(), Some(kind.as_str()));
            }
        }
    }
    Ok(())
}

fn shape(nodes: &[FlatNode]) -> Vec<(String, Option<String>, Option<String>, Option<String>, Option<String>)> {
    nodes
        .iter()
        .map(|n| {
            (
                n.node_type.clone(),
                n.field.clone(),
                n.parent_type.clone(),
                n.kind.clone(),
                n.name.clone(),
            )
        })
        .collect()
}

proptest! {
    /// Node count, single root, preorder parents and kind inheritance on
    /// arbitrary trees.
    #[test]
    fn prop_synthetic_tree_structure(tree in arb_tree()) {
        let nodes = sequential().flatten(&tree);
        assert_structure(&tree, &nodes)?;
    }

    /// Falsy attributes never reach a record.
    #[test]
    fn prop_no_empty_attributes(tree in arb_tree()) {
        for node in Flattener::new().flatten(&tree) {
            prop_assert!(node.name.as_deref() != Some(""));
            prop_assert!(node.kind.as_deref() != Some(""));
        }
    }

    /// Flattening twice gives the same shape; only ids differ.
    #[test]
    fn prop_idempotent(tree in arb_tree()) {
        let first = Flattener::new().flatten(&tree);
        let second = Flattener::new().flatten(&tree);
        prop_assert_eq!(shape(&first), shape(&second));
        prop_assert!(first.iter().zip(&second).all(|(a, b)| a.node_id != b.node_id));
    }

    /// The same properties hold for trees produced by the parser.
    #[test]
    fn prop_parsed_source_structure(source in js_source()) {
        let parsed = TreeSitterParser::new()
            .parse(&source, &ParseOptions::default())
            .unwrap();
        let nodes = sequential().flatten(&parsed.tree);
        assert_structure(&parsed.tree, &nodes)?;
        prop_assert_eq!(nodes[0].node_type.as_str(), "File");
    }

    /// Every identifier declared by `let x = n;` is tagged with `let`.
    #[test]
    fn prop_let_binding_identifier_is_tagged(
        id in js_identifier().prop_filter("distinct from the const binding", |s| s != "other"),
        n in 0..1000u32,
    ) {
        let source = format!("const other = 1;\nlet {id} = {n};");
        let parsed = TreeSitterParser::new()
            .parse(&source, &ParseOptions::default())
            .unwrap();
        let nodes = Flattener::new().flatten(&parsed.tree);

        let binding = nodes
            .iter()
            .find(|n| n.node_type == "Identifier" && n.name.as_deref() == Some(id.as_str()))
            .unwrap();
        prop_assert_eq!(binding.kind.as_deref(), Some("let"));
        prop_assert_eq!(binding.parent_type.as_deref(), Some("VariableDeclarator"));
    }
}
