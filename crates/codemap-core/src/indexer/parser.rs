//! Python parsing with tree-sitter, reporting syntax errors as data.

use tree_sitter::{Node, Parser};

use crate::indexer::symbols::{ParsedSymbols, SymbolCollector};
use crate::indexer::syntax;
use crate::models::ParseFailure;

const SNIPPET_CHARS: usize = 40;

/// Parse one Python source file and collect its symbols.
///
/// Never panics on malformed input: invalid UTF-8 and syntax errors come back
/// as a [`ParseFailure`] pointing at the first problem.
pub fn parse_source(bytes: &[u8]) -> Result<ParsedSymbols, ParseFailure> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let source = std::str::from_utf8(bytes).map_err(|e| {
        let (line, column) = line_column(bytes, e.valid_up_to());
        ParseFailure::at(
            format!("invalid UTF-8 at byte {}", e.valid_up_to()),
            line,
            column,
        )
    })?;

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ParseFailure::new(format!("Python grammar unavailable: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ParseFailure::new("parser produced no tree"))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(describe_error(root, source.as_bytes()));
    }
    let nodes = syntax::project(root, source.as_bytes())?;
    Ok(SymbolCollector::collect(&nodes))
}

fn describe_error(root: Node, source: &[u8]) -> ParseFailure {
    let Some(node) = first_error(root) else {
        return ParseFailure::new("invalid syntax");
    };
    let position = node.start_position();
    let message = if node.is_missing() {
        format!("missing `{}`", node.kind())
    } else {
        let snippet = node
            .utf8_text(source)
            .ok()
            .and_then(|text| text.lines().map(str::trim).find(|line| !line.is_empty()))
            .map(|line| line.chars().take(SNIPPET_CHARS).collect::<String>());
        match snippet {
            Some(snippet) => format!("invalid syntax near `{snippet}`"),
            None => "invalid syntax".to_string(),
        }
    };
    ParseFailure::at(message, position.row + 1, position.column + 1)
}

/// Depth-first, source-ordered search for the first ERROR or MISSING node.
/// Only subtrees flagged with an error are entered.
fn first_error(root: Node) -> Option<Node> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

/// 1-based line and byte column of `offset`.
fn line_column(bytes: &[u8], offset: usize) -> (usize, usize) {
    let prefix = &bytes[..offset.min(bytes.len())];
    let line = prefix.iter().filter(|b| **b == b'\n').count() + 1;
    let line_start = prefix
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    (line, offset - line_start + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_classes_functions_and_imports() {
        let source = b"import os\n\nclass A:\n    def m(self, x):\n        return x\n\ndef top():\n    pass\n";
        let symbols = parse_source(source).unwrap();
        assert_eq!(symbols.classes.len(), 1);
        assert_eq!(symbols.classes[0].start_line, 3);
        assert_eq!(symbols.functions.len(), 2);
        assert_eq!(symbols.functions[0].qualified_name, "A.m");
        assert_eq!(symbols.functions[0].parameters, vec!["self", "x"]);
        assert!(symbols.functions[0].is_method);
        assert_eq!(symbols.functions[1].qualified_name, "top");
        assert_eq!(symbols.imports[0].module, "os");
    }

    #[test]
    fn unmatched_parenthesis_is_a_syntax_error() {
        let failure = parse_source(b"def f():\n    return (1 + 2\n").unwrap_err();
        assert!(failure.line.is_some());
        assert!(failure.column.is_some());
        assert!(!failure.message.is_empty());
    }

    #[test]
    fn invalid_utf8_reports_position() {
        let failure = parse_source(b"x = 1\ny = '\xff'\n").unwrap_err();
        assert_eq!(failure.line, Some(2));
        assert_eq!(failure.column, Some(6));
        assert!(failure.message.contains("UTF-8"));
    }

    #[test]
    fn empty_file_has_no_symbols() {
        assert_eq!(parse_source(b"").unwrap(), ParsedSymbols::default());
    }

    fn nested_list(depth: usize) -> String {
        format!("x = {}{}\n", "[".repeat(depth), "]".repeat(depth))
    }

    #[test]
    fn deeply_nested_expression_parses() {
        let source = nested_list(50_000) + "def after():\n    pass\n";
        let symbols = parse_source(source.as_bytes()).unwrap();
        assert_eq!(symbols.functions.len(), 1);
        assert_eq!(symbols.functions[0].qualified_name, "after");
    }

    #[test]
    fn deeply_nested_expression_with_error_is_reported() {
        let source = nested_list(50_000) + "y = (\n";
        let failure = parse_source(source.as_bytes()).unwrap_err();
        assert!(failure.line.is_some());
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let symbols = parse_source(b"\xEF\xBB\xBFdef f():\n    pass\n").unwrap();
        assert_eq!(symbols.functions[0].start_line, 1);
    }
}
