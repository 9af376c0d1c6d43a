//! resolve/extract.rs
//!
//! Callable extraction from a parsed source file.
//!
//! Rust: free functions, inherent impl methods and trait impl methods
//! (`#[cfg(test)]` modules and `#[test]` functions skipped).
//! Python: module functions and class methods (decorated or not).

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tree_sitter::Node;

use crate::detectors::ast::{contains_kind, field_text, line_span, named_children, node_text, parse_source};
use crate::detectors::language::Language;
use crate::error::ResolutionError;
use crate::resolve::target::MethodInfo;

/// Everything the resolver needs from one file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub language: Language,
    pub imports: Vec<String>,
    pub callables: Vec<Callable>,
}

#[derive(Debug, Clone)]
pub struct Callable {
    pub class: String,
    pub info: MethodInfo,
    /// Visible to tests per the language's rules
    pub visible: bool,
    pub accessor: bool,
    pub branching: bool,
}

impl Callable {
    pub fn is_testable(&self, include_accessors: bool) -> bool {
        self.visible && (include_accessors || !self.accessor || self.branching)
    }
}

/// Parse and extract. `file` is used for diagnostics and free-function class names.
pub fn extract(file: &Path, source: &str) -> Result<ParsedFile, ResolutionError> {
    let language = Language::from_path(file)
        .ok_or_else(|| ResolutionError::UnsupportedLanguage(file.to_path_buf()))?;

    let tree = parse_source(language, source)
        .ok_or_else(|| ResolutionError::NotCompilable(file.to_path_buf()))?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(ResolutionError::NotCompilable(file.to_path_buf()));
    }

    let module = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module")
        .to_string();

    let mut out = ParsedFile {
        language,
        imports: Vec::new(),
        callables: Vec::new(),
    };

    match language {
        Language::Rust => rust_items(root, source, &module, &mut out),
        Language::Python => python_items(root, source, &module, &mut out),
    }

    Ok(out)
}

/* ============================================================
   Rust
   ============================================================ */

const RS_BRANCHES: &[&str] = &[
    "if_expression",
    "match_expression",
    "while_expression",
    "for_expression",
    "loop_expression",
];

fn rust_items(scope: Node<'_>, source: &str, module: &str, out: &mut ParsedFile) {
    let mut skip_next = false;

    for node in named_children(scope) {
        if node.kind() == "attribute_item" {
            skip_next |= is_test_attribute(node_text(node, source));
            continue;
        }
        if std::mem::take(&mut skip_next) {
            continue;
        }

        match node.kind() {
            "use_declaration" => out.imports.push(node_text(node, source).to_string()),
            "function_item" => {
                let vis = visibility(node, source);
                if let Some(c) = rust_callable(node, source, module, vis) {
                    out.callables.push(c);
                }
            }
            "impl_item" => rust_impl(node, source, out),
            "mod_item" => {
                if let Some(body) = node.child_by_field_name("body") {
                    rust_items(body, source, module, out);
                }
            }
            _ => {}
        }
    }
}

fn rust_impl(node: Node<'_>, source: &str, out: &mut ParsedFile) {
    let Some(ty) = node.child_by_field_name("type") else {
        return;
    };
    let class = match ty.kind() {
        "generic_type" => field_text(ty, "type", source).unwrap_or_else(|| node_text(ty, source)),
        _ => node_text(ty, source),
    }
    .to_string();

    let trait_impl = node.child_by_field_name("trait").is_some();
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };

    let mut skip_next = false;
    for item in named_children(body) {
        if item.kind() == "attribute_item" {
            skip_next |= is_test_attribute(node_text(item, source));
            continue;
        }
        if std::mem::take(&mut skip_next) || item.kind() != "function_item" {
            continue;
        }

        let vis = if trait_impl {
            Visibility::Public
        } else {
            visibility(item, source)
        };
        if let Some(c) = rust_callable(item, source, &class, vis) {
            out.callables.push(c);
        }
    }
}

/// `#[test]`, `#[cfg(test)]` and `#[cfg(all(test, ..))]` style attributes.
fn is_test_attribute(attr: &str) -> bool {
    attr.contains("#[test]") || attr.contains("cfg(test") || attr.contains("cfg(all(test")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Private,
    Public,
    /// `pub(crate)`, `pub(super)`, `pub(in path)`
    Crate,
}

fn visibility(node: Node<'_>, source: &str) -> Visibility {
    match named_children(node)
        .into_iter()
        .find(|c| c.kind() == "visibility_modifier")
    {
        None => Visibility::Private,
        Some(v) if node_text(v, source).trim() == "pub" => Visibility::Public,
        Some(_) => Visibility::Crate,
    }
}

fn rust_callable(node: Node<'_>, source: &str, class: &str, vis: Visibility) -> Option<Callable> {
    let name = field_text(node, "name", source)?.to_string();
    let body = node.child_by_field_name("body");
    let (first_line, last_line) = line_span(node);

    let mut declared_errors = Vec::new();
    if let Some(ret) = field_text(node, "return_type", source) {
        if let Some(err) = result_error_type(ret) {
            declared_errors.push(err);
        }
    }
    if let Some(b) = body {
        let text = node_text(b, source);
        if text.contains("panic!(") || text.contains("unreachable!(") {
            declared_errors.push("panic".to_string());
        }
    }

    let body_text = body.map(|b| node_text(b, source)).unwrap_or("");

    Some(Callable {
        class: class.to_string(),
        accessor: is_accessor_name(&name) || rust_trivial_body(body_text),
        branching: body.is_some_and(|b| contains_kind(b, RS_BRANCHES)),
        visible: vis != Visibility::Private,
        info: MethodInfo {
            signature: signature(node, body, source),
            name,
            first_line,
            last_line,
            declared_errors,
            source: node_text(node, source).to_string(),
            crate_private: vis == Visibility::Crate,
        },
    })
}

/// Error type of a `Result<T, E>` return; aliases like `io::Result<T>` keep
/// the alias path.
fn result_error_type(ret: &str) -> Option<String> {
    let start = ret.find("Result<")?;
    let prefix = ret[..start].trim_end_matches("::");
    let inner = &ret[start + "Result<".len()..];

    let mut depth = 0i32;
    let mut comma = None;
    let mut end = inner.len();
    for (i, ch) in inner.char_indices() {
        match ch {
            '<' | '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            '>' if depth == 0 => {
                end = i;
                break;
            }
            '>' => depth -= 1,
            ',' if depth == 0 && comma.is_none() => comma = Some(i),
            _ => {}
        }
    }

    match comma {
        Some(c) => Some(inner[c + 1..end].trim().to_string()),
        None if !prefix.is_empty() => Some(format!("{prefix}::Error")),
        None => None,
    }
}

fn rust_trivial_body(body: &str) -> bool {
    static READ: OnceLock<Regex> = OnceLock::new();
    static WRITE: OnceLock<Regex> = OnceLock::new();

    let read = READ.get_or_init(|| {
        Regex::new(r"^\{\s*(&\s*(mut\s+)?)?self\.\w+(\.clone\(\))?\s*\}$").expect("valid regex")
    });
    let write = WRITE.get_or_init(|| {
        Regex::new(r"^\{\s*self\.\w+\s*=\s*[\w.]+\s*;?\s*\}$").expect("valid regex")
    });

    read.is_match(body) || write.is_match(body)
}

/* ============================================================
   Python
   ============================================================ */

const PY_BRANCHES: &[&str] = &[
    "if_statement",
    "for_statement",
    "while_statement",
    "try_statement",
    "match_statement",
    "conditional_expression",
];

fn python_items(root: Node<'_>, source: &str, module: &str, out: &mut ParsedFile) {
    for node in named_children(root) {
        match node.kind() {
            "import_statement" | "import_from_statement" => {
                out.imports.push(node_text(node, source).to_string())
            }
            "class_definition" => python_class(node, source, out),
            _ => {
                if let Some(f) = unwrap_decorated(node, "function_definition") {
                    if let Some(c) = python_callable(f, source, module) {
                        out.callables.push(c);
                    }
                } else if let Some(c) = unwrap_decorated(node, "class_definition") {
                    python_class(c, source, out);
                }
            }
        }
    }
}

fn python_class(node: Node<'_>, source: &str, out: &mut ParsedFile) {
    let Some(class) = field_text(node, "name", source) else {
        return;
    };
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };

    for item in named_children(body) {
        if let Some(f) = unwrap_decorated(item, "function_definition") {
            if let Some(c) = python_callable(f, source, class) {
                out.callables.push(c);
            }
        }
    }
}

fn unwrap_decorated<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    if node.kind() == kind {
        return Some(node);
    }
    if node.kind() == "decorated_definition" {
        return node
            .child_by_field_name("definition")
            .filter(|d| d.kind() == kind);
    }
    None
}

fn python_callable(node: Node<'_>, source: &str, class: &str) -> Option<Callable> {
    static RAISE: OnceLock<Regex> = OnceLock::new();
    let raise = RAISE.get_or_init(|| Regex::new(r"\braise\s+([A-Za-z_][\w.]*)").expect("valid regex"));

    let name = field_text(node, "name", source)?.to_string();
    let body = node.child_by_field_name("body");
    let body_text = body.map(|b| node_text(b, source)).unwrap_or("");
    let (first_line, last_line) = line_span(node);

    let mut declared_errors: Vec<String> = raise
        .captures_iter(body_text)
        .map(|c| c[1].to_string())
        .collect();
    declared_errors.dedup();

    Some(Callable {
        class: class.to_string(),
        visible: !name.starts_with('_'),
        accessor: is_accessor_name(&name) || python_trivial_body(body_text),
        branching: body.is_some_and(|b| contains_kind(b, PY_BRANCHES)),
        info: MethodInfo {
            signature: signature(node, body, source),
            name,
            first_line,
            last_line,
            declared_errors,
            source: node_text(node, source).to_string(),
            crate_private: false,
        },
    })
}

fn python_trivial_body(body: &str) -> bool {
    static TRIVIAL: OnceLock<Regex> = OnceLock::new();
    let re = TRIVIAL.get_or_init(|| {
        Regex::new(r"^(return\s+self\.\w+|self\.\w+\s*=\s*[\w.]+)\s*$").expect("valid regex")
    });
    re.is_match(body.trim())
}

/* ============================================================
   Shared
   ============================================================ */

fn is_accessor_name(name: &str) -> bool {
    ["get_", "set_", "is_", "has_"]
        .iter()
        .any(|p| name.starts_with(p))
}

/// Declaration text up to the body, whitespace collapsed.
fn signature(node: Node<'_>, body: Option<Node<'_>>, source: &str) -> String {
    let end = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());
    let raw = source.get(node.start_byte()..end).unwrap_or("");
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(':')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUST_SRC: &str = r#"
use std::collections::HashMap;

pub struct Account {
    balance: i64,
}

impl Account {
    pub fn new() -> Self { Account { balance: 0 } }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn get_limit(&self) -> i64 {
        if self.balance > 0 { 100 } else { 0 }
    }

    pub fn withdraw(&mut self, amount: i64) -> Result<i64, LedgerError> {
        if amount > self.balance {
            return Err(LedgerError::Insufficient);
        }
        self.balance -= amount;
        Ok(self.balance)
    }

    #[cfg(test)]
    pub fn seeded(balance: i64) -> Self {
        Account { balance }
    }

    fn audit(&self) {}
}

impl Default for Account {
    fn default() -> Self { Self::new() }
}

pub(crate) fn helper(x: u32) -> u32 { x + 1 }

fn private_helper() {}

#[cfg(test)]
mod tests {
    pub fn not_a_target() {}
}
"#;

    #[test]
    fn rust_callables_and_visibility() {
        let parsed = extract(Path::new("src/account.rs"), RUST_SRC).unwrap();
        let names: Vec<(&str, &str, bool)> = parsed
            .callables
            .iter()
            .map(|c| (c.class.as_str(), c.info.name.as_str(), c.visible))
            .collect();

        assert_eq!(
            names,
            vec![
                ("Account", "new", true),
                ("Account", "balance", true),
                ("Account", "get_limit", true),
                ("Account", "withdraw", true),
                ("Account", "audit", false),
                ("Account", "default", true),
                ("account", "helper", true),
                ("account", "private_helper", false),
            ]
        );
        assert_eq!(parsed.imports, vec!["use std::collections::HashMap;"]);
    }

    #[test]
    fn restricted_visibility_is_marked() {
        let parsed = extract(Path::new("src/account.rs"), RUST_SRC).unwrap();
        let by_name = |n: &str| parsed.callables.iter().find(|c| c.info.name == n).unwrap();

        assert!(by_name("helper").is_testable(false));
        assert!(by_name("helper").info.crate_private);
        assert!(!by_name("withdraw").info.crate_private);
        // trait impl methods follow the trait
        assert!(!by_name("default").info.crate_private);
        // test-only helpers inside an impl are not targets
        assert!(parsed.callables.iter().all(|c| c.info.name != "seeded"));
    }

    #[test]
    fn rust_accessor_policy() {
        let parsed = extract(Path::new("src/account.rs"), RUST_SRC).unwrap();
        let by_name = |n: &str| parsed.callables.iter().find(|c| c.info.name == n).unwrap();

        assert!(!by_name("balance").is_testable(false));
        assert!(by_name("balance").is_testable(true));
        // accessor name, but it branches
        assert!(by_name("get_limit").is_testable(false));
        assert!(by_name("withdraw").is_testable(false));
        assert_eq!(by_name("withdraw").info.declared_errors, vec!["LedgerError"]);
        assert_eq!(
            by_name("withdraw").info.signature,
            "pub fn withdraw(&mut self, amount: i64) -> Result<i64, LedgerError>"
        );
    }

    #[test]
    fn result_error_types() {
        assert_eq!(result_error_type("Result<Vec<u8>, Error>"), Some("Error".into()));
        assert_eq!(
            result_error_type("Result<HashMap<String, u8>, Box<dyn std::error::Error>>"),
            Some("Box<dyn std::error::Error>".into())
        );
        assert_eq!(result_error_type("io::Result<()>"), Some("io::Error".into()));
        assert_eq!(result_error_type("Option<u8>"), None);
    }

    #[test]
    fn python_callables() {
        let src = "import math\nfrom typing import List\n\n\
class Stack:\n    def __init__(self):\n        self._items = []\n\n    def push(self, x):\n        self._items.append(x)\n\n    def pop(self):\n        if not self._items:\n            raise IndexError('empty')\n        return self._items.pop()\n\n    def get_size(self):\n        return self.size\n\n    @property\n    def top(self):\n        return self.top_item\n\n\
def area(r):\n    return math.pi * r * r\n";

        let parsed = extract(Path::new("pkg/stack.py"), src).unwrap();
        let testable: Vec<(&str, &str)> = parsed
            .callables
            .iter()
            .filter(|c| c.is_testable(false))
            .map(|c| (c.class.as_str(), c.info.name.as_str()))
            .collect();

        assert_eq!(testable, vec![("Stack", "push"), ("Stack", "pop"), ("stack", "area")]);
        assert_eq!(parsed.imports.len(), 2);

        let pop = parsed.callables.iter().find(|c| c.info.name == "pop").unwrap();
        assert_eq!(pop.info.declared_errors, vec!["IndexError"]);
        assert_eq!(pop.info.signature, "def pop(self)");
    }

    #[test]
    fn broken_source_is_not_compilable() {
        let err = extract(Path::new("bad.py"), "def f(:\n").unwrap_err();
        assert_eq!(err, ResolutionError::NotCompilable("bad.py".into()));

        let err = extract(Path::new("Main.java"), "class A {}").unwrap_err();
        assert!(matches!(err, ResolutionError::UnsupportedLanguage(_)));
    }
}
