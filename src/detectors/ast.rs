//! detectors/ast.rs
//!
//! Thin tree-sitter helpers shared by the resolver.

use std::cell::RefCell;

use tree_sitter::{Node, Parser, Tree};

use crate::detectors::language::Language;

thread_local! {
    static PY_PARSER: RefCell<Option<Parser>> = RefCell::new(make_parser(Language::Python));
    static RS_PARSER: RefCell<Option<Parser>> = RefCell::new(make_parser(Language::Rust));
}

fn make_parser(lang: Language) -> Option<Parser> {
    let grammar = match lang {
        Language::Python => tree_sitter_python::language(),
        Language::Rust => tree_sitter_rust::language(),
    };

    let mut p = Parser::new();
    match p.set_language(&grammar) {
        Ok(()) => Some(p),
        Err(e) => {
            tracing::error!(%lang, error = %e, "grammar/runtime version mismatch");
            None
        }
    }
}

/// Parse `source`. `None` if the grammar is unavailable or parsing aborted.
pub fn parse_source(lang: Language, source: &str) -> Option<Tree> {
    let parse = |cell: &RefCell<Option<Parser>>| {
        cell.borrow_mut()
            .as_mut()
            .and_then(|p| p.parse(source, None))
    };

    match lang {
        Language::Python => PY_PARSER.with(parse),
        Language::Rust => RS_PARSER.with(parse),
    }
}

/// Source text covered by `node`; empty on invalid UTF-8 boundaries.
pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// Text of a named field child, e.g. `name` on a function.
pub fn field_text<'s>(node: Node<'_>, field: &str, source: &'s str) -> Option<&'s str> {
    node.child_by_field_name(field).map(|n| node_text(n, source))
}

/// 1-based inclusive line span.
pub fn line_span(node: Node<'_>) -> (u32, u32) {
    let first = node.start_position().row + 1;
    let last = node.end_position().row + 1;
    (to_line(first), to_line(last))
}

fn to_line(row: usize) -> u32 {
    u32::try_from(row).unwrap_or(u32::MAX)
}

/// Named children of `node`, in source order.
pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Depth-first search for the first descendant (or self) of one of `kinds`.
pub fn contains_kind(node: Node<'_>, kinds: &[&str]) -> bool {
    if kinds.contains(&node.kind()) {
        return true;
    }

    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| contains_kind(c, kinds));
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_languages() {
        let tree = parse_source(Language::Rust, "fn a() -> u8 { 1 }").unwrap();
        assert!(!tree.root_node().has_error());

        let tree = parse_source(Language::Python, "def a(:\n").unwrap();
        assert!(tree.root_node().has_error());
    }

    #[test]
    fn spans_and_names() {
        let src = "\nfn first() {}\n\nfn second() {\n    if x {}\n}\n";
        let tree = parse_source(Language::Rust, src).unwrap();
        let fns = named_children(tree.root_node());

        assert_eq!(field_text(fns[1], "name", src), Some("second"));
        assert_eq!(line_span(fns[1]), (4, 6));
        assert!(contains_kind(fns[1], &["if_expression"]));
        assert!(!contains_kind(fns[0], &["if_expression"]));
    }
}
