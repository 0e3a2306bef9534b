//! Tagged syntax model projected from the tree-sitter Python tree.
//!
//! Only the structure symbol extraction cares about survives projection:
//! class and function definitions, import statements, and the nesting
//! between them. Everything else collapses into [`SyntaxNode::Other`], or
//! disappears entirely when it contains nothing of interest.

use tree_sitter::Node;

use crate::models::ParseFailure;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    fn of(node: &Node) -> Self {
        Self {
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassNode {
    pub name: String,
    pub span: Span,
    pub body: Vec<SyntaxNode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionNode {
    pub name: String,
    pub span: Span,
    pub parameters: Vec<String>,
    pub is_async: bool,
    pub body: Vec<SyntaxNode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportBinding {
    pub module: String,
    pub alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportNode {
    pub line: usize,
    pub bindings: Vec<ImportBinding>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyntaxNode {
    Class(ClassNode),
    Function(FunctionNode),
    Import(ImportNode),
    /// Any other construct that still contains interesting descendants,
    /// e.g. an `if TYPE_CHECKING:` block holding imports.
    Other(Vec<SyntaxNode>),
}

// ---------------------------------------------------------------------------
// Visitor
// ---------------------------------------------------------------------------

pub trait SyntaxVisitor {
    fn visit_class(&mut self, class: &ClassNode);
    fn visit_function(&mut self, function: &FunctionNode);
    fn visit_import(&mut self, import: &ImportNode);

    fn visit_other(&mut self, children: &[SyntaxNode]) {
        walk(self, children);
    }
}

/// Dispatch every node of `nodes`, in order, to `visitor`.
pub fn walk<V: SyntaxVisitor + ?Sized>(visitor: &mut V, nodes: &[SyntaxNode]) {
    for node in nodes {
        match node {
            SyntaxNode::Class(class) => visitor.visit_class(class),
            SyntaxNode::Function(function) => visitor.visit_function(function),
            SyntaxNode::Import(import) => visitor.visit_import(import),
            SyntaxNode::Other(children) => visitor.visit_other(children),
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Deepest block nesting accepted before a file is reported as invalid.
pub const MAX_NESTING: usize = 100;

/// Statement kinds whose children can hold definitions or imports.
/// Expressions never can, so projection never descends into them.
const CONTAINERS: &[&str] = &[
    "block",
    "if_statement",
    "elif_clause",
    "else_clause",
    "for_statement",
    "while_statement",
    "try_statement",
    "except_clause",
    "except_group_clause",
    "finally_clause",
    "with_statement",
    "match_statement",
    "case_clause",
];

/// Project the children of a `module` node.
///
/// Fails with a [`ParseFailure`] when definitions nest deeper than
/// [`MAX_NESTING`] levels.
pub fn project(root: Node, source: &[u8]) -> Result<Vec<SyntaxNode>, ParseFailure> {
    project_children(root, source, 0)
}

fn project_children(
    node: Node,
    source: &[u8],
    depth: usize,
) -> Result<Vec<SyntaxNode>, ParseFailure> {
    if depth > MAX_NESTING {
        let position = node.start_position();
        return Err(ParseFailure::at(
            format!("nesting deeper than {MAX_NESTING} levels"),
            position.row + 1,
            position.column + 1,
        ));
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    let mut projected = Vec::new();
    for child in children {
        if let Some(node) = project_node(child, source, depth)? {
            projected.push(node);
        }
    }
    Ok(projected)
}

fn project_body(
    node: Node,
    source: &[u8],
    depth: usize,
) -> Result<Vec<SyntaxNode>, ParseFailure> {
    match node.child_by_field_name("body") {
        Some(body) => project_children(body, source, depth + 1),
        None => Ok(Vec::new()),
    }
}

fn project_node(
    node: Node,
    source: &[u8],
    depth: usize,
) -> Result<Option<SyntaxNode>, ParseFailure> {
    let projected = match node.kind() {
        "class_definition" => {
            let Some(name) = field_text(node, "name", source) else {
                return Ok(None);
            };
            Some(SyntaxNode::Class(ClassNode {
                name,
                span: Span::of(&node),
                body: project_body(node, source, depth)?,
            }))
        }
        "function_definition" => {
            let Some(name) = field_text(node, "name", source) else {
                return Ok(None);
            };
            let parameters = node
                .child_by_field_name("parameters")
                .map(|params| parameter_names(params, source))
                .unwrap_or_default();
            Some(SyntaxNode::Function(FunctionNode {
                name,
                span: Span::of(&node),
                parameters,
                is_async: is_async_definition(node),
                body: project_body(node, source, depth)?,
            }))
        }
        "decorated_definition" => match node.child_by_field_name("definition") {
            Some(definition) => project_node(definition, source, depth)?,
            None => None,
        },
        "import_statement" => Some(SyntaxNode::Import(ImportNode {
            line: node.start_position().row + 1,
            bindings: plain_import_bindings(node, source),
        })),
        "import_from_statement" | "future_import_statement" => {
            Some(SyntaxNode::Import(ImportNode {
                line: node.start_position().row + 1,
                bindings: from_import_bindings(node, source),
            }))
        }
        kind if CONTAINERS.contains(&kind) => {
            let depth = if kind == "block" { depth + 1 } else { depth };
            let children = project_children(node, source, depth)?;
            if children.is_empty() {
                None
            } else {
                Some(SyntaxNode::Other(children))
            }
        }
        _ => None,
    };
    Ok(projected)
}

fn node_text(node: Node, source: &[u8]) -> Option<String> {
    node.utf8_text(source)
        .ok()
        .map(|text| text.split_whitespace().collect::<String>())
}

fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|child| node_text(child, source))
}

fn is_async_definition(node: Node) -> bool {
    let mut cursor = node.walk();
    let is_async = node
        .children(&mut cursor)
        .take_while(|child| child.kind() != "def")
        .any(|child| child.kind() == "async");
    is_async
}

fn parameter_names(params: Node, source: &[u8]) -> Vec<String> {
    let mut cursor = params.walk();
    let mut names = Vec::new();
    for param in params.named_children(&mut cursor) {
        let name = match param.kind() {
            "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" | "tuple_pattern" => {
                node_text(param, source)
            }
            "default_parameter" | "typed_default_parameter" => field_text(param, "name", source),
            "typed_parameter" => {
                let mut inner = param.walk();
                let first = param.named_children(&mut inner).next();
                first.and_then(|n| node_text(n, source))
            }
            // Bare `*` and `/` markers, comments.
            _ => None,
        };
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            names.push(name);
        }
    }
    names
}

fn plain_import_bindings(node: Node, source: &[u8]) -> Vec<ImportBinding> {
    let mut cursor = node.walk();
    let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
    names
        .into_iter()
        .filter_map(|name| imported_name(name, source))
        .map(|(module, alias)| ImportBinding { module, alias })
        .collect()
}

fn from_import_bindings(node: Node, source: &[u8]) -> Vec<ImportBinding> {
    let module = if node.kind() == "future_import_statement" {
        "__future__".to_string()
    } else {
        match field_text(node, "module_name", source) {
            Some(module) => module,
            None => return Vec::new(),
        }
    };

    let mut cursor = node.walk();
    let wildcard = node
        .named_children(&mut cursor)
        .any(|child| child.kind() == "wildcard_import");
    if wildcard {
        return vec![ImportBinding {
            module: join_module(&module, "*"),
            alias: None,
        }];
    }

    let mut cursor = node.walk();
    let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
    names
        .into_iter()
        .filter_map(|name| imported_name(name, source))
        .map(|(name, alias)| ImportBinding {
            module: join_module(&module, &name),
            alias,
        })
        .collect()
}

/// `dotted_name` or `aliased_import` to `(name, alias)`.
fn imported_name(node: Node, source: &[u8]) -> Option<(String, Option<String>)> {
    match node.kind() {
        "aliased_import" => {
            let name = field_text(node, "name", source)?;
            Some((name, field_text(node, "alias", source)))
        }
        _ => node_text(node, source).map(|name| (name, None)),
    }
}

/// `from . import x` gives `.x`; `from a import b` gives `a.b`.
fn join_module(module: &str, name: &str) -> String {
    if module.ends_with('.') {
        format!("{module}{name}")
    } else {
        format!("{module}.{name}")
    }
}
