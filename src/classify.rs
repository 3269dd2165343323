//! Tree-sitter based classification of single Python source lines
//!
//! Each executed line is parsed on its own. A line is worth recording when it
//! assigns, asserts, compares, returns, or calls; the identifiers it reads are
//! what the tracer resolves from the live frame.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::BTreeSet;
use tree_sitter::{Node, Parser, Tree};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - a parser without a language yields no tree
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Node kinds that make a line interesting.
const INTERESTING_KINDS: &[&str] = &[
    "assignment",
    "augmented_assignment",
    "assert_statement",
    "comparison_operator",
    "return_statement",
    "call",
];

/// Statement kinds whose names are bindings, never reads.
const OPAQUE_KINDS: &[&str] = &[
    "import_statement",
    "import_from_statement",
    "future_import_statement",
    "global_statement",
    "nonlocal_statement",
];

/// Hard keywords. The grammar's error recovery can surface these as plain
/// identifiers, as in `else: pass` read as an annotated assignment.
const HARD_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

fn parse(text: &str) -> Option<Tree> {
    PYTHON_PARSER.with(|p| p.borrow_mut().parse(text, None))
}

/// Parse `text` as a standalone unit, rejecting anything with syntax errors
/// or with a keyword standing in for a name.
fn parse_clean(text: &str) -> Option<Tree> {
    parse(text).filter(|tree| {
        let root = tree.root_node();
        !root.has_error() && !names_keyword(root, text)
    })
}

fn names_keyword(node: Node, source: &str) -> bool {
    if node.kind() == "identifier" {
        return node
            .utf8_text(source.as_bytes())
            .map(|name| HARD_KEYWORDS.contains(&name))
            .unwrap_or(false);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    children.into_iter().any(|child| names_keyword(child, source))
}

/// Make a block header parseable on its own.
///
/// `if x:` is not a complete statement, so a `pass` body is appended. The
/// suffix is only ever used for parsing; rendered output keeps the original.
pub fn parseable_form(line: &str) -> Cow<'_, str> {
    let trimmed = line.trim_end();
    if trimmed.ends_with(':') {
        Cow::Owned(format!("{} pass", trimmed))
    } else {
        Cow::Borrowed(line)
    }
}

/// Returns true if the line contains an assignment, assertion, comparison,
/// return, or call anywhere in its tree. Unparsable lines are never interesting.
pub fn identifies(line: &str) -> bool {
    match parse_clean(line) {
        Some(tree) => contains_interesting(tree.root_node()),
        None => false,
    }
}

fn contains_interesting(node: Node) -> bool {
    if INTERESTING_KINDS.contains(&node.kind()) {
        return true;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    children.into_iter().any(contains_interesting)
}

/// Collect the names and dotted attribute paths a line reads.
///
/// Plain assignment targets are skipped since the interesting value is the one
/// held before the line runs. Attribute chains such as `a.b.c` are reported as
/// one identifier and their base name is not listed separately.
pub fn extract_identifiers(line: &str) -> BTreeSet<String> {
    let mut identifiers = BTreeSet::new();
    if let Some(tree) = parse_clean(line) {
        IdentifierVisitor {
            source: line,
            identifiers: &mut identifiers,
        }
        .visit(tree.root_node());
    }
    identifiers
}

struct IdentifierVisitor<'a> {
    source: &'a str,
    identifiers: &'a mut BTreeSet<String>,
}

impl IdentifierVisitor<'_> {
    fn text(&self, node: Node) -> Option<String> {
        node.utf8_text(self.source.as_bytes())
            .ok()
            .map(str::to_string)
    }

    fn add(&mut self, node: Node) {
        if let Some(name) = self.text(node) {
            self.identifiers.insert(name);
        }
    }

    fn visit(&mut self, node: Node) {
        match node.kind() {
            "identifier" => self.add(node),
            "assignment" => self.visit_assignment(node),
            "attribute" => self.visit_attribute(node),
            "call" => self.visit_call(node),
            "keyword_argument" => self.visit_field(node, "value"),
            "function_definition" => {
                self.visit_field(node, "parameters");
                self.visit_field(node, "return_type");
                self.visit_field(node, "body");
            }
            "class_definition" => {
                self.visit_field(node, "superclasses");
                self.visit_field(node, "body");
            }
            "lambda" => {
                self.visit_field(node, "parameters");
                self.visit_field(node, "body");
            }
            "parameters" | "lambda_parameters" => self.visit_parameters(node),
            kind if OPAQUE_KINDS.contains(&kind) => {}
            _ => self.visit_children(node),
        }
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit_field(&mut self, node: Node, field: &str) {
        if let Some(child) = node.child_by_field_name(field) {
            self.visit(child);
        }
    }

    fn visit_assignment(&mut self, node: Node) {
        // `x: int = y` reads its target and annotation too
        if node.child_by_field_name("type").is_some() {
            self.visit_children(node);
        } else {
            self.visit_field(node, "right");
        }
    }

    fn visit_attribute(&mut self, node: Node) {
        match self.dotted_path(node) {
            Some(path) => {
                self.identifiers.insert(path);
            }
            None => self.visit_field(node, "object"),
        }
    }

    fn visit_call(&mut self, node: Node) {
        self.visit_field(node, "function");
        self.visit_field(node, "arguments");
    }

    /// Parameter names are bindings; only defaults and annotations are read.
    fn visit_parameters(&mut self, node: Node) {
        let mut cursor = node.walk();
        let params: Vec<Node> = node.named_children(&mut cursor).collect();
        for param in params {
            match param.kind() {
                "default_parameter" => self.visit_field(param, "value"),
                "typed_default_parameter" => {
                    self.visit_field(param, "type");
                    self.visit_field(param, "value");
                }
                "typed_parameter" => self.visit_field(param, "type"),
                _ => {}
            }
        }
    }

    /// `a.b.c` as a single string, or None when the chain is not rooted at a name.
    fn dotted_path(&self, node: Node) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = node;
        loop {
            match current.kind() {
                "attribute" => {
                    parts.push(self.text(current.child_by_field_name("attribute")?)?);
                    current = current.child_by_field_name("object")?;
                }
                "identifier" => {
                    parts.push(self.text(current)?);
                    break;
                }
                _ => return None,
            }
        }
        parts.reverse();
        Some(parts.join("."))
    }
}

/// Location of the first syntax error in a whole program (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "syntax error at line {}, column {}", self.line, self.column)
    }
}

/// Returns the first syntax error in `source`, if any.
pub fn syntax_issue(source: &str) -> Option<SyntaxIssue> {
    let tree = parse(source)?;
    first_error(tree.root_node()).map(|node| {
        let position = node.start_position();
        SyntaxIssue {
            line: position.row + 1,
            column: position.column + 1,
        }
    })
}

fn first_error(node: Node) -> Option<Node> {
    if !node.has_error() {
        return None;
    }
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error).or(Some(node))
}
