//! Parser boundary.
//!
//! Source text goes in, a Babel-shaped [`SyntaxNode`] tree comes out. The
//! concrete syntax tree comes from tree-sitter; [`lower`] maps it onto the
//! node vocabulary the flattener and the index speak.

pub mod lower;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tree_sitter::{Language, Node, Parser};
use tracing::{debug, warn};

use crate::error::{IndexerError, Result};
use crate::types::SyntaxNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    #[default]
    JavaScript,
    TypeScript,
    Tsx,
}

impl SourceLanguage {
    /// Pick a grammar from a file extension. Unknown extensions fall back to
    /// JavaScript.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("ts" | "mts" | "cts") => SourceLanguage::TypeScript,
            Some("tsx") => SourceLanguage::Tsx,
            _ => SourceLanguage::JavaScript,
        }
    }

    fn grammar(self) -> Language {
        match self {
            SourceLanguage::JavaScript => tree_sitter_javascript::language(),
            SourceLanguage::TypeScript => tree_sitter_typescript::language_typescript(),
            SourceLanguage::Tsx => tree_sitter_typescript::language_tsx(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceLanguage::JavaScript => "javascript",
            SourceLanguage::TypeScript => "typescript",
            SourceLanguage::Tsx => "tsx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Return a partial tree for syntactically broken input instead of failing.
    pub error_recovery: bool,
    /// Name recorded in every node location and in diagnostics.
    pub source_filename: Option<String>,
    /// Grammar override; detected from `source_filename` when unset.
    pub language: Option<SourceLanguage>,
    /// Per-file parse budget.
    pub timeout_micros: Option<u64>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            error_recovery: true,
            source_filename: None,
            language: None,
            timeout_micros: None,
        }
    }
}

impl ParseOptions {
    pub fn for_file(&self, path: &Path) -> Self {
        Self {
            source_filename: Some(path.display().to_string()),
            ..self.clone()
        }
    }

    fn resolved_language(&self) -> SourceLanguage {
        self.language.unwrap_or_else(|| {
            self.source_filename
                .as_deref()
                .map(|name| SourceLanguage::from_path(Path::new(name)))
                .unwrap_or_default()
        })
    }

    fn display_name(&self) -> &str {
        self.source_filename.as_deref().unwrap_or("<source>")
    }
}

/// A syntax problem the parser recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub tree: SyntaxNode,
    pub language: SourceLanguage,
    pub diagnostics: Vec<Diagnostic>,
}

pub trait SourceParser: Send + Sync {
    fn parse(&self, source: &str, options: &ParseOptions) -> Result<ParsedFile>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterParser;

impl TreeSitterParser {
    pub fn new() -> Self {
        Self
    }
}

impl SourceParser for TreeSitterParser {
    fn parse(&self, source: &str, options: &ParseOptions) -> Result<ParsedFile> {
        let language = options.resolved_language();
        let name = options.display_name();

        let mut parser = Parser::new();
        parser
            .set_language(language.grammar())
            .map_err(|e| IndexerError::parse(name, format!("incompatible grammar: {:?}", e)))?;
        if let Some(timeout) = options.timeout_micros {
            parser.set_timeout_micros(timeout);
        }

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| IndexerError::parse(name, "parser produced no tree (timed out)"))?;
        let root = tree.root_node();

        let diagnostics = if root.has_error() {
            collect_diagnostics(root)
        } else {
            Vec::new()
        };

        if let Some(first) = diagnostics.first() {
            if !options.error_recovery {
                return Err(IndexerError::parse(
                    name,
                    format!("{} at {}:{}", first.message, first.line, first.column),
                ));
            }
            warn!(
                "Recovered from {} syntax error(s) in {}, first at {}:{}",
                diagnostics.len(),
                name,
                first.line,
                first.column
            );
        }

        let lowerer = lower::Lowerer::new(source, options.source_filename.clone());
        let tree = lowerer.lower_file(root);
        debug!("Parsed {} as {}", name, language.name());

        Ok(ParsedFile {
            tree,
            language,
            diagnostics,
        })
    }
}

/// Walk only the error-bearing branches and report each ERROR or MISSING node.
fn collect_diagnostics(root: Node<'_>) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut cursor = root.walk();

    loop {
        let node = cursor.node();
        let position = node.start_position();
        if node.is_error() {
            diagnostics.push(Diagnostic {
                message: "unexpected syntax".to_string(),
                line: position.row + 1,
                column: position.column,
            });
        } else if node.is_missing() {
            diagnostics.push(Diagnostic {
                message: format!("missing {}", node.kind()),
                line: position.row + 1,
                column: position.column,
            });
        }

        if !node.is_error() && node.has_error() && cursor.goto_first_child() {
            continue;
        }

        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return diagnostics;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Slot;

    fn body(tree: &SyntaxNode) -> Vec<SyntaxNode> {
        let program = &tree.slot("program").unwrap().as_slice()[0];
        assert!(program.is("Program"));
        program.slot("body").map(|s| s.as_slice().to_vec()).unwrap_or_default()
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(SourceLanguage::from_path(Path::new("a/b.js")), SourceLanguage::JavaScript);
        assert_eq!(SourceLanguage::from_path(Path::new("a/b.mjs")), SourceLanguage::JavaScript);
        assert_eq!(SourceLanguage::from_path(Path::new("a/b.ts")), SourceLanguage::TypeScript);
        assert_eq!(SourceLanguage::from_path(Path::new("a/b.tsx")), SourceLanguage::Tsx);
        assert_eq!(SourceLanguage::from_path(Path::new("README")), SourceLanguage::JavaScript);
    }

    #[test]
    fn test_parse_produces_file_root() {
        let parsed = TreeSitterParser::new()
            .parse("let greet = 'hi';", &ParseOptions::default())
            .unwrap();

        assert!(parsed.tree.is("File"));
        assert!(parsed.diagnostics.is_empty());

        let statements = body(&parsed.tree);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].is("VariableDeclaration"));
        assert_eq!(statements[0].kind.as_deref(), Some("let"));
    }

    #[test]
    fn test_strict_mode_rejects_broken_source() {
        let options = ParseOptions {
            error_recovery: false,
            source_filename: Some("broken.js".to_string()),
            ..ParseOptions::default()
        };
        let err = TreeSitterParser::new()
            .parse("function ( {", &options)
            .unwrap_err();
        assert!(matches!(err, IndexerError::ParseFailure { ref path, .. } if path == "broken.js"));
    }

    #[test]
    fn test_lenient_mode_returns_partial_tree() {
        let parsed = TreeSitterParser::new()
            .parse("let ok = 1;\nlet = ;\nsayHello();", &ParseOptions::default())
            .unwrap();

        assert!(!parsed.diagnostics.is_empty());
        let statements = body(&parsed.tree);
        assert!(statements.iter().any(|s| s.is("VariableDeclaration")));
    }

    #[test]
    fn test_filename_is_recorded_in_locations() {
        let options = ParseOptions {
            source_filename: Some("src/app.js".to_string()),
            ..ParseOptions::default()
        };
        let parsed = TreeSitterParser::new().parse("x;", &options).unwrap();
        let loc = parsed.tree.loc.as_ref().unwrap();
        assert_eq!(loc.filename.as_deref(), Some("src/app.js"));
        assert_eq!(loc.start.line, 1);

        match parsed.tree.slot("program") {
            Some(Slot::One(program)) => {
                assert_eq!(program.loc.as_ref().unwrap().filename.as_deref(), Some("src/app.js"))
            }
            other => panic!("unexpected program slot: {:?}", other),
        }
    }

    #[test]
    fn test_typescript_grammar() {
        let options = ParseOptions {
            source_filename: Some("greeter.ts".to_string()),
            ..ParseOptions::default()
        };
        let parsed = TreeSitterParser::new()
            .parse("const greet: string = 'hi';\ninterface Greeter { greet(): void }", &options)
            .unwrap();

        assert_eq!(parsed.language, SourceLanguage::TypeScript);
        let statements = body(&parsed.tree);
        assert!(statements[0].is("VariableDeclaration"));
        assert!(statements[1].is("TSInterfaceDeclaration"));
    }
}
