//! Lowering from tree-sitter concrete syntax to Babel-shaped nodes.
//!
//! Only the structure the index cares about is rebuilt: node types use the
//! Babel names (`VariableDeclaration`, `CallExpression`, `ClassMethod`, ...)
//! and children are attached under Babel's field names (`declarations`,
//! `callee`, `arguments`, ...). Grammar nodes without a mapping become a leaf
//! whose type is the PascalCase form of the tree-sitter kind.
//!
//! Each grammar node is first turned into a [`Plan`]: the finished scalar
//! part of the Babel node plus the grammar nodes that still have to be
//! lowered into its slots. A driver with its own work stack then lowers and
//! assembles those pieces, so nesting depth is bounded by the heap only.

use serde_json::{json, Value};
use tree_sitter::Node;

use crate::types::{Position, SourceLocation, SyntaxNode};

pub struct Lowerer<'s> {
    src: &'s str,
    filename: Option<String>,
    line_starts: Vec<usize>,
}

/// Something that lowers to at most one node.
enum Source<'t> {
    Cst(Node<'t>),
    Built(Template<'t>),
}

enum Part<'t> {
    /// The first source that lowers to a node, if any.
    One(Vec<Source<'t>>),
    /// Every source that lowers to a node, in order.
    Many(Vec<Source<'t>>),
}

/// A node whose own attributes are known and whose slots are still pending.
struct Template<'t> {
    shell: SyntaxNode,
    parts: Vec<(&'static str, Part<'t>)>,
}

impl<'t> Template<'t> {
    fn new(shell: SyntaxNode) -> Self {
        Self {
            shell,
            parts: Vec::new(),
        }
    }

    fn one(self, field: &'static str, node: Option<Node<'t>>) -> Self {
        self.first_of(field, node)
    }

    fn first_of(mut self, field: &'static str, nodes: impl IntoIterator<Item = Node<'t>>) -> Self {
        let sources = nodes.into_iter().map(Source::Cst).collect();
        self.parts.push((field, Part::One(sources)));
        self
    }

    fn sources(mut self, field: &'static str, sources: Vec<Source<'t>>) -> Self {
        self.parts.push((field, Part::One(sources)));
        self
    }

    /// A list slot. ERROR nodes in `nodes` are replaced by their named
    /// children.
    fn many(mut self, field: &'static str, nodes: Vec<Node<'t>>) -> Self {
        let sources = splice_errors(nodes).into_iter().map(Source::Cst).collect();
        self.parts.push((field, Part::Many(sources)));
        self
    }

    fn nested(mut self, field: &'static str, template: Option<Template<'t>>) -> Self {
        let sources = template.into_iter().map(Source::Built).collect();
        self.parts.push((field, Part::One(sources)));
        self
    }

    fn nested_many(mut self, field: &'static str, templates: Vec<Template<'t>>) -> Self {
        let sources = templates.into_iter().map(Source::Built).collect();
        self.parts.push((field, Part::Many(sources)));
        self
    }
}

enum Plan<'t> {
    Skip,
    /// Stand in for the first source that lowers to a node.
    Forward(Vec<Source<'t>>),
    Build(Template<'t>),
}

fn leaf<'t>(node: SyntaxNode) -> Plan<'t> {
    Plan::Build(Template::new(node))
}

fn forward<'t>(nodes: impl IntoIterator<Item = Node<'t>>) -> Plan<'t> {
    Plan::Forward(nodes.into_iter().map(Source::Cst).collect())
}

#[derive(Debug, Clone, Copy)]
enum Arity {
    One(usize),
    Many(usize),
}

impl Arity {
    fn len(self) -> usize {
        match self {
            Arity::One(n) | Arity::Many(n) => n,
        }
    }
}

/// Driver instructions. Every `Lower` and `Build` leaves exactly one result
/// on the value stack; `Pick` and `Assemble` consume the results of the
/// steps scheduled right after them.
enum Step<'t> {
    Lower(Node<'t>),
    Build(Template<'t>),
    Pick(usize),
    Assemble(SyntaxNode, Vec<(&'static str, Arity)>),
}

impl<'t> From<Source<'t>> for Step<'t> {
    fn from(source: Source<'t>) -> Self {
        match source {
            Source::Cst(node) => Step::Lower(node),
            Source::Built(template) => Step::Build(template),
        }
    }
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let children = node
        .named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect();
    children
}

fn children_of<'t>(node: Option<Node<'t>>) -> Vec<Node<'t>> {
    node.map(named_children).unwrap_or_default()
}

/// Replace ERROR nodes by whatever named children they wrap, recursively.
fn splice_errors<'t>(nodes: Vec<Node<'t>>) -> Vec<Node<'t>> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut stack: Vec<Node<'t>> = nodes.into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        if node.is_error() {
            stack.extend(named_children(node).into_iter().rev());
        } else {
            out.push(node);
        }
    }
    out
}

/// Operands of a comma expression, with nested sequences flattened.
fn sequence_items<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    let mut stack: Vec<Node<'t>> = named_children(node).into_iter().rev().collect();
    while let Some(item) = stack.pop() {
        if item.kind() == "sequence_expression" {
            stack.extend(named_children(item).into_iter().rev());
        } else {
            out.push(item);
        }
    }
    out
}

fn has_token(node: Node<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| !child.is_named() && child.kind() == token);
    found
}

fn pascal_case(kind: &str) -> String {
    kind.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

impl<'s> Lowerer<'s> {
    pub fn new(src: &'s str, filename: Option<String>) -> Self {
        let line_starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            src,
            filename,
            line_starts,
        }
    }

    /// Wrap the program in a `File` node, the single root of every tree.
    pub fn lower_file(&self, root: Node<'_>) -> SyntaxNode {
        let file = Template::new(SyntaxNode::new("File").with_loc(self.loc(root)))
            .nested("program", Some(self.program(root)));
        self.run(Step::Build(file))
            .unwrap_or_else(|| SyntaxNode::new("File"))
    }

    /// Lower one grammar node; `None` for nodes with no Babel counterpart.
    pub fn lower(&self, node: Node<'_>) -> Option<SyntaxNode> {
        self.run(Step::Lower(node))
    }

    fn run<'t>(&self, start: Step<'t>) -> Option<SyntaxNode> {
        let mut steps = vec![start];
        let mut values: Vec<Option<SyntaxNode>> = Vec::new();

        while let Some(step) = steps.pop() {
            match step {
                Step::Lower(node) => match self.plan(node) {
                    Plan::Skip => values.push(None),
                    Plan::Forward(candidates) => {
                        steps.push(Step::Pick(candidates.len()));
                        steps.extend(candidates.into_iter().rev().map(Step::from));
                    }
                    Plan::Build(template) => steps.push(Step::Build(template)),
                },
                Step::Build(Template { shell, parts }) => {
                    let mut layout = Vec::with_capacity(parts.len());
                    let mut sources = Vec::new();
                    for (field, part) in parts {
                        let (arity, mut items) = match part {
                            Part::One(items) => (Arity::One(items.len()), items),
                            Part::Many(items) => (Arity::Many(items.len()), items),
                        };
                        layout.push((field, arity));
                        sources.append(&mut items);
                    }
                    steps.push(Step::Assemble(shell, layout));
                    steps.extend(sources.into_iter().rev().map(Step::from));
                }
                Step::Pick(count) => {
                    let split = values.len().saturating_sub(count);
                    let first = values.split_off(split).into_iter().flatten().next();
                    values.push(first);
                }
                Step::Assemble(mut node, layout) => {
                    let total: usize = layout.iter().map(|(_, arity)| arity.len()).sum();
                    let split = values.len().saturating_sub(total);
                    let mut results = values.split_off(split).into_iter();
                    for (field, arity) in layout {
                        match arity {
                            Arity::One(count) => {
                                let candidates: Vec<_> = results.by_ref().take(count).collect();
                                node.set_child(field, candidates.into_iter().flatten().next());
                            }
                            Arity::Many(count) => {
                                let children = results.by_ref().take(count).flatten().collect();
                                node.set_children(field, children);
                            }
                        }
                    }
                    values.push(Some(node));
                }
            }
        }

        values.pop().flatten()
    }

    fn program<'t>(&self, node: Node<'t>) -> Template<'t> {
        self.build("Program", node).many("body", named_children(node))
    }

    fn position_at(&self, byte: usize) -> Position {
        let line = match self.line_starts.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        Position {
            line: line + 1,
            column: byte - self.line_starts[line],
            index: byte,
        }
    }

    fn span(&self, start: usize, end: usize) -> SourceLocation {
        SourceLocation {
            start: self.position_at(start),
            end: self.position_at(end),
            filename: self.filename.clone(),
        }
    }

    fn loc(&self, node: Node<'_>) -> SourceLocation {
        let start = node.start_position();
        let end = node.end_position();
        SourceLocation {
            start: Position {
                line: start.row + 1,
                column: start.column,
                index: node.start_byte(),
            },
            end: Position {
                line: end.row + 1,
                column: end.column,
                index: node.end_byte(),
            },
            filename: self.filename.clone(),
        }
    }

    fn make(&self, node_type: &str, node: Node<'_>) -> SyntaxNode {
        SyntaxNode::new(node_type).with_loc(self.loc(node))
    }

    fn build<'t>(&self, node_type: &str, node: Node<'_>) -> Template<'t> {
        Template::new(self.make(node_type, node))
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        self.src.get(node.start_byte()..node.end_byte()).unwrap_or("")
    }

    fn plan<'t>(&self, node: Node<'t>) -> Plan<'t> {
        if node.is_error() || node.is_missing() {
            return Plan::Skip;
        }
        let field = |name: &str| node.child_by_field_name(name);

        let template = match node.kind() {
            "comment" | "hash_bang_line" | "decorator" | "type_annotation" => return Plan::Skip,
            "program" => self.program(node),
            "parenthesized_expression" | "computed_property_name" | "template_substitution"
            | "else_clause" => return forward(named_children(node)),

            "expression_statement" => self
                .build("ExpressionStatement", node)
                .first_of("expression", named_children(node)),
            "variable_declaration" | "lexical_declaration" => self.declaration(node),
            "variable_declarator" => self
                .build("VariableDeclarator", node)
                .one("id", field("name"))
                .one("init", field("value")),

            "identifier"
            | "property_identifier"
            | "shorthand_property_identifier"
            | "shorthand_property_identifier_pattern"
            | "statement_identifier"
            | "type_identifier"
            | "undefined" => return leaf(self.make("Identifier", node).with_name(self.text(node))),
            "private_property_identifier" => {
                let name = self.text(node).trim_start_matches('#');
                return leaf(
                    self.make("PrivateName", node)
                        .with_child("id", self.make("Identifier", node).with_name(name)),
                );
            }
            "this" => return leaf(self.make("ThisExpression", node)),
            "super" => return leaf(self.make("Super", node)),
            "import" => return leaf(self.make("Import", node)),

            "string" => {
                return leaf(
                    self.make("StringLiteral", node)
                        .with_value(Value::String(cook(unquote(self.text(node))))),
                )
            }
            "number" => return leaf(self.number(node)),
            "true" => return leaf(self.make("BooleanLiteral", node).with_value(json!(true))),
            "false" => return leaf(self.make("BooleanLiteral", node).with_value(json!(false))),
            "null" => return leaf(self.make("NullLiteral", node)),
            "regex" => return leaf(self.make("RegExpLiteral", node)),
            "template_string" => self.template(node),

            "call_expression" => self.call(node),
            "new_expression" => self
                .build("NewExpression", node)
                .one("callee", field("constructor"))
                .many("arguments", children_of(field("arguments"))),
            "member_expression" | "subscript_expression" => {
                let node_type = if field("optional_chain").is_some() || has_token(node, "?.") {
                    "OptionalMemberExpression"
                } else {
                    "MemberExpression"
                };
                let property = if node.kind() == "member_expression" { "property" } else { "index" };
                self.build(node_type, node)
                    .one("object", field("object"))
                    .one("property", field(property))
            }
            "await_expression" => self.with_argument("AwaitExpression", node),
            "yield_expression" => self.with_argument("YieldExpression", node),
            "spread_element" => self.with_argument("SpreadElement", node),
            "rest_pattern" | "rest_parameter" => self.with_argument("RestElement", node),
            "return_statement" => self.with_argument("ReturnStatement", node),
            "throw_statement" => self.with_argument("ThrowStatement", node),
            "unary_expression" => self
                .build("UnaryExpression", node)
                .one("argument", field("argument")),
            "update_expression" => self
                .build("UpdateExpression", node)
                .one("argument", field("argument")),
            "binary_expression" => {
                let operator = field("operator").map(|op| self.text(op)).unwrap_or("");
                let node_type = match operator {
                    "&&" | "||" | "??" => "LogicalExpression",
                    _ => "BinaryExpression",
                };
                self.left_right(node_type, node)
            }
            "assignment_expression" | "augmented_assignment_expression" => {
                self.left_right("AssignmentExpression", node)
            }
            "assignment_pattern" | "object_assignment_pattern" => {
                self.left_right("AssignmentPattern", node)
            }
            "ternary_expression" => self
                .build("ConditionalExpression", node)
                .one("test", field("condition"))
                .one("consequent", field("consequence"))
                .one("alternate", field("alternative")),
            "sequence_expression" => self
                .build("SequenceExpression", node)
                .many("expressions", sequence_items(node)),
            "as_expression" | "satisfies_expression" => self
                .build("TSAsExpression", node)
                .first_of("expression", named_children(node)),
            "non_null_expression" => self
                .build("TSNonNullExpression", node)
                .first_of("expression", named_children(node)),

            "object" => self
                .build("ObjectExpression", node)
                .many("properties", named_children(node)),
            "object_pattern" => self
                .build("ObjectPattern", node)
                .many("properties", named_children(node)),
            "array" => self
                .build("ArrayExpression", node)
                .many("elements", named_children(node)),
            "array_pattern" => self
                .build("ArrayPattern", node)
                .many("elements", named_children(node)),
            "pair" | "pair_pattern" => self
                .build("ObjectProperty", node)
                .one("key", field("key"))
                .one("value", field("value")),

            "function_declaration" | "generator_function_declaration" => {
                self.function("FunctionDeclaration", node)
            }
            "function" | "function_expression" | "generator_function" => {
                self.function("FunctionExpression", node)
            }
            "arrow_function" => {
                let params = match field("parameter") {
                    Some(single) => vec![single],
                    None => children_of(field("parameters")),
                };
                self.build("ArrowFunctionExpression", node)
                    .many("params", params)
                    .one("body", field("body"))
            }

            "class_declaration" | "abstract_class_declaration" => self.class("ClassDeclaration", node),
            "class" => self.class("ClassExpression", node),
            "class_body" => self
                .build("ClassBody", node)
                .many("body", named_children(node)),
            "method_definition" => self.method(node),
            "field_definition" | "public_field_definition" => self
                .build("ClassProperty", node)
                .one("key", field("property").or_else(|| field("name")))
                .one("value", field("value")),
            "class_static_block" => self
                .build("StaticBlock", node)
                .many("body", children_of(field("body"))),

            "statement_block" => self
                .build("BlockStatement", node)
                .many("body", named_children(node)),
            "empty_statement" => return leaf(self.make("EmptyStatement", node)),
            "debugger_statement" => return leaf(self.make("DebuggerStatement", node)),
            "if_statement" => self
                .build("IfStatement", node)
                .one("test", field("condition"))
                .one("consequent", field("consequence"))
                .one("alternate", field("alternative")),
            "for_statement" => self
                .build("ForStatement", node)
                .first_of("init", loop_clause(field("initializer")))
                .first_of("test", loop_clause(field("condition")))
                .one("update", field("increment"))
                .one("body", field("body")),
            "for_in_statement" => self.for_in(node),
            "while_statement" => self
                .build("WhileStatement", node)
                .one("test", field("condition"))
                .one("body", field("body")),
            "do_statement" => self
                .build("DoWhileStatement", node)
                .one("body", field("body"))
                .one("test", field("condition")),
            "try_statement" => self
                .build("TryStatement", node)
                .one("block", field("body"))
                .one("handler", field("handler"))
                .one(
                    "finalizer",
                    field("finalizer").and_then(|f| f.child_by_field_name("body")),
                ),
            "catch_clause" => self
                .build("CatchClause", node)
                .one("param", field("parameter"))
                .one("body", field("body")),
            "break_statement" | "continue_statement" => {
                let node_type = if node.kind() == "break_statement" {
                    "BreakStatement"
                } else {
                    "ContinueStatement"
                };
                self.build(node_type, node).one("label", field("label"))
            }
            "labeled_statement" => self
                .build("LabeledStatement", node)
                .one("label", field("label"))
                .one("body", field("body")),
            "switch_statement" => self
                .build("SwitchStatement", node)
                .one("discriminant", field("value"))
                .many("cases", children_of(field("body"))),
            "switch_case" | "switch_default" => {
                let test = field("value");
                let consequent = named_children(node)
                    .into_iter()
                    .filter(|child| Some(child.id()) != test.map(|t| t.id()))
                    .collect();
                self.build("SwitchCase", node)
                    .one("test", test)
                    .many("consequent", consequent)
            }

            "import_statement" => self.import(node),
            "export_statement" => self.export(node),

            "interface_declaration" => {
                let body = field("body").map(|body| {
                    self.build("TSInterfaceBody", body)
                        .many("body", named_children(body))
                });
                self.build("TSInterfaceDeclaration", node)
                    .one("id", field("name"))
                    .nested("body", body)
            }
            "property_signature" | "method_signature" => {
                let node_type = if node.kind() == "property_signature" {
                    "TSPropertySignature"
                } else {
                    "TSMethodSignature"
                };
                self.build(node_type, node).one("key", field("name"))
            }
            "type_alias_declaration" => self
                .build("TSTypeAliasDeclaration", node)
                .one("id", field("name")),
            "enum_declaration" => self
                .build("TSEnumDeclaration", node)
                .one("id", field("name")),
            "internal_module" | "module" => {
                let body = field("body").map(|body| {
                    self.build("TSModuleBlock", body)
                        .many("body", named_children(body))
                });
                self.build("TSModuleDeclaration", node)
                    .one("id", field("name"))
                    .nested("body", body)
            }
            "required_parameter" | "optional_parameter" => return self.typed_parameter(node),

            other => return leaf(self.make(&pascal_case(other), node)),
        };

        Plan::Build(template)
    }

    fn declaration<'t>(&self, node: Node<'t>) -> Template<'t> {
        let kind = node
            .child_by_field_name("kind")
            .or_else(|| node.child(0))
            .map(|token| self.text(token))
            .unwrap_or("var");
        let declarators = named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "variable_declarator" || child.is_error())
            .collect();
        Template::new(self.make("VariableDeclaration", node).with_kind(kind))
            .many("declarations", declarators)
    }

    fn number(&self, node: Node<'_>) -> SyntaxNode {
        let raw = self.text(node);
        if let Some(digits) = raw.strip_suffix('n') {
            return self
                .make("BigIntLiteral", node)
                .with_value(Value::String(digits.replace('_', "")));
        }
        self.make("NumericLiteral", node)
            .with_value(parse_numeric(raw).unwrap_or_else(|| Value::String(raw.to_string())))
    }

    fn template<'t>(&self, node: Node<'t>) -> Template<'t> {
        let substitutions: Vec<Node<'t>> = named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "template_substitution")
            .collect();

        let open = node.start_byte() + 1;
        let close = node.end_byte().saturating_sub(1).max(open);
        let mut quasis = Vec::with_capacity(substitutions.len() + 1);
        let mut cursor = open;

        for substitution in &substitutions {
            quasis.push(self.template_element(cursor, substitution.start_byte()));
            cursor = substitution.end_byte();
        }
        quasis.push(self.template_element(cursor, close));

        Template::new(self.make("TemplateLiteral", node).with_children("quasis", quasis))
            .many("expressions", substitutions)
    }

    fn template_element(&self, start: usize, end: usize) -> SyntaxNode {
        let raw = self.src.get(start..end.max(start)).unwrap_or("");
        SyntaxNode::new("TemplateElement")
            .with_loc(self.span(start, end.max(start)))
            .with_value(json!({ "raw": raw, "cooked": cook(raw) }))
    }

    fn call<'t>(&self, node: Node<'t>) -> Template<'t> {
        let callee = node.child_by_field_name("function");
        let arguments = node.child_by_field_name("arguments");

        if let Some(template) = arguments.filter(|a| a.kind() == "template_string") {
            return self
                .build("TaggedTemplateExpression", node)
                .one("tag", callee)
                .one("quasi", Some(template));
        }

        let node_type = if node.child_by_field_name("optional_chain").is_some() || has_token(node, "?.") {
            "OptionalCallExpression"
        } else {
            "CallExpression"
        };
        self.build(node_type, node)
            .one("callee", callee)
            .many("arguments", children_of(arguments))
    }

    fn with_argument<'t>(&self, node_type: &str, node: Node<'t>) -> Template<'t> {
        let template = self.build(node_type, node);
        match node.child_by_field_name("argument") {
            Some(argument) => template.one("argument", Some(argument)),
            None => template.first_of("argument", named_children(node)),
        }
    }

    fn left_right<'t>(&self, node_type: &str, node: Node<'t>) -> Template<'t> {
        self.build(node_type, node)
            .one("left", node.child_by_field_name("left"))
            .one("right", node.child_by_field_name("right"))
    }

    /// TypeScript wraps each parameter; keep the pattern and its default.
    fn typed_parameter<'t>(&self, node: Node<'t>) -> Plan<'t> {
        let Some(pattern) = node.child_by_field_name("pattern") else {
            return Plan::Skip;
        };
        match node.child_by_field_name("value") {
            Some(default) => Plan::Build(
                self.build("AssignmentPattern", node)
                    .one("left", Some(pattern))
                    .one("right", Some(default)),
            ),
            None => forward([pattern]),
        }
    }

    fn function<'t>(&self, node_type: &str, node: Node<'t>) -> Template<'t> {
        self.build(node_type, node)
            .one("id", node.child_by_field_name("name"))
            .many("params", children_of(node.child_by_field_name("parameters")))
            .one("body", node.child_by_field_name("body"))
    }

    fn class<'t>(&self, node_type: &str, node: Node<'t>) -> Template<'t> {
        let heritage = named_children(node)
            .into_iter()
            .find(|child| child.kind() == "class_heritage");
        // TypeScript nests the superclass one level deeper, under `extends_clause`.
        let super_class: Vec<Node<'t>> = match heritage {
            Some(h) => match h.named_child(0) {
                Some(clause) if clause.kind() == "extends_clause" => clause
                    .child_by_field_name("value")
                    .into_iter()
                    .chain(named_children(clause))
                    .collect(),
                _ => named_children(h),
            },
            None => Vec::new(),
        };
        self.build(node_type, node)
            .one("id", node.child_by_field_name("name"))
            .first_of("superClass", super_class)
            .one("body", node.child_by_field_name("body"))
    }

    fn method<'t>(&self, node: Node<'t>) -> Template<'t> {
        let in_class = node
            .parent()
            .map_or(true, |parent| parent.kind() == "class_body");
        let key = node.child_by_field_name("name");
        let kind = if has_token(node, "get") {
            "get"
        } else if has_token(node, "set") {
            "set"
        } else if in_class && key.map(|k| self.text(k)) == Some("constructor") {
            "constructor"
        } else {
            "method"
        };

        let node_type = if in_class { "ClassMethod" } else { "ObjectMethod" };
        Template::new(self.make(node_type, node).with_kind(kind))
            .one("key", key)
            .many("params", children_of(node.child_by_field_name("parameters")))
            .one("body", node.child_by_field_name("body"))
    }

    fn for_in<'t>(&self, node: Node<'t>) -> Template<'t> {
        let node_type = if has_token(node, "of") {
            "ForOfStatement"
        } else {
            "ForInStatement"
        };

        // `for (const x of xs)` declares its binding inline.
        let left = match (node.child_by_field_name("kind"), node.child_by_field_name("left")) {
            (Some(kind), Some(target)) => {
                let declarator = Template::new(
                    SyntaxNode::new("VariableDeclarator").with_loc(self.loc(target)),
                )
                .one("id", Some(target));
                let declaration = Template::new(
                    SyntaxNode::new("VariableDeclaration")
                        .with_loc(self.span(kind.start_byte(), target.end_byte()))
                        .with_kind(self.text(kind)),
                )
                .nested_many("declarations", vec![declarator]);
                vec![Source::Built(declaration)]
            }
            (_, target) => target.into_iter().map(Source::Cst).collect(),
        };

        self.build(node_type, node)
            .sources("left", left)
            .one("right", node.child_by_field_name("right"))
            .one("body", node.child_by_field_name("body"))
    }

    fn import<'t>(&self, node: Node<'t>) -> Template<'t> {
        let mut specifiers = Vec::new();
        for clause in named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "import_clause")
        {
            for part in named_children(clause) {
                match part.kind() {
                    "identifier" => specifiers.push(Template::new(
                        self.make("ImportDefaultSpecifier", part)
                            .with_child("local", self.make("Identifier", part).with_name(self.text(part))),
                    )),
                    "namespace_import" => specifiers.push(
                        self.build("ImportNamespaceSpecifier", part)
                            .first_of("local", named_children(part)),
                    ),
                    "named_imports" => {
                        for spec in named_children(part) {
                            let imported = spec.child_by_field_name("name");
                            let alias = spec.child_by_field_name("alias");
                            specifiers.push(
                                self.build("ImportSpecifier", spec)
                                    .one("imported", imported)
                                    .first_of("local", alias.into_iter().chain(imported)),
                            );
                        }
                    }
                    _ => {}
                }
            }
        }

        self.build("ImportDeclaration", node)
            .nested_many("specifiers", specifiers)
            .one("source", node.child_by_field_name("source"))
    }

    fn export<'t>(&self, node: Node<'t>) -> Template<'t> {
        let declaration = node.child_by_field_name("declaration");
        if has_token(node, "default") {
            return self
                .build("ExportDefaultDeclaration", node)
                .first_of("declaration", declaration.into_iter().chain(node.child_by_field_name("value")));
        }

        if has_token(node, "*") && declaration.is_none() {
            return self
                .build("ExportAllDeclaration", node)
                .one("source", node.child_by_field_name("source"));
        }

        let specifiers = named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "export_clause")
            .flat_map(named_children)
            .map(|spec| {
                let local = spec.child_by_field_name("name");
                let alias = spec.child_by_field_name("alias");
                self.build("ExportSpecifier", spec)
                    .one("local", local)
                    .first_of("exported", alias.into_iter().chain(local))
            })
            .collect();

        self.build("ExportNamedDeclaration", node)
            .one("declaration", declaration)
            .nested_many("specifiers", specifiers)
            .one("source", node.child_by_field_name("source"))
    }
}

/// `for` clauses arrive as statements; Babel stores the bare expression.
fn loop_clause(node: Option<Node<'_>>) -> Vec<Node<'_>> {
    match node {
        Some(n) if n.kind() == "expression_statement" => named_children(n),
        Some(n) if n.kind() == "empty_statement" => Vec::new(),
        other => other.into_iter().collect(),
    }
}

fn unquote(raw: &str) -> &str {
    let mut chars = raw.chars();
    match (chars.next(), chars.next_back()) {
        (Some(open), Some(close)) if open == close && matches!(open, '"' | '\'' | '`') => {
            &raw[1..raw.len() - 1]
        }
        _ => raw,
    }
}

/// Numeric literal text to a JSON number; `None` when it does not fit.
fn parse_numeric(raw: &str) -> Option<Value> {
    let cleaned = raw.replace('_', "");
    let lower = cleaned.to_ascii_lowercase();
    let radix = |prefix: &str, base: u32| {
        lower
            .strip_prefix(prefix)
            .and_then(|digits| u64::from_str_radix(digits, base).ok())
    };

    if let Some(v) = radix("0x", 16).or_else(|| radix("0o", 8)).or_else(|| radix("0b", 2)) {
        return Some(json!(v));
    }
    if let Ok(v) = lower.parse::<u64>() {
        return Some(json!(v));
    }
    lower
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Interpret the escape sequences of a string or template chunk. Malformed
/// escapes keep the escaped character.
fn cook(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('0') => out.push('\0'),
            Some('\r') => {
                if chars.as_str().starts_with('\n') {
                    chars.next();
                }
            }
            Some('\n') | Some('\u{2028}') | Some('\u{2029}') => {}
            Some(marker @ ('x' | 'u')) => {
                let rest = chars.as_str();
                let (digits, consumed) = match (marker, rest.strip_prefix('{')) {
                    ('u', Some(braced)) => match braced.find('}') {
                        Some(end) => (&braced[..end], end + 2),
                        None => ("", 0),
                    },
                    ('u', None) => (rest.get(..4).unwrap_or(""), 4),
                    _ => (rest.get(..2).unwrap_or(""), 2),
                };
                let decoded = Some(digits)
                    .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_hexdigit()))
                    .and_then(|d| u32::from_str_radix(d, 16).ok())
                    .and_then(char::from_u32);
                match decoded {
                    Some(ch) => {
                        out.push(ch);
                        chars = rest[consumed..].chars();
                    }
                    None => out.push(marker),
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
