use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::detectors::language::{is_ignored_dir, Language};
use crate::resolve::target::display_path;

/* ============================================================
   Resolution result
   ============================================================ */

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestResolution {
    Found {
        file: String,
        test_fn: Option<String>, // Python may refine later
    },
    Ambiguous {
        files: Vec<String>,
    },
    NotFound,
}

/* ============================================================
   Public entry
   ============================================================ */

/// Look for tests that already exercise `symbols` of `file`.
///
/// `file` is relative to `root`. Hits are reported relative to `root`.
pub fn find_existing_tests(
    root: &Path,
    language: Language,
    file: &Path,
    source: &str,
    symbols: &[&str],
) -> TestResolution {
    match language {
        Language::Rust => resolve_rust_test(root, file, source, symbols),
        Language::Python => resolve_python_test(root, symbols),
    }
}

/* ============================================================
   Rust resolution (inline tests first, then tests/)
   ============================================================ */

fn resolve_rust_test(root: &Path, file: &Path, source: &str, symbols: &[&str]) -> TestResolution {
    if let Some(idx) = source.find("#[cfg(test)]") {
        // crude but safe: test must reference the symbol
        let tests = &source[idx..];
        if let Some(sym) = symbols.iter().find(|s| references(tests, s)) {
            return TestResolution::Found {
                file: display_path(file),
                test_fn: enclosing_test_fn(tests, sym),
            };
        }
    }

    collect_hits(root, &["tests"], "rs", symbols)
}

/* ============================================================
   Python resolution (search tests/ recursively)
   ============================================================ */

fn resolve_python_test(root: &Path, symbols: &[&str]) -> TestResolution {
    // common pytest roots
    collect_hits(root, &["tests", "test", "testing"], "py", symbols)
}

fn collect_hits(root: &Path, dirs: &[&str], ext: &str, symbols: &[&str]) -> TestResolution {
    let mut hits: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        let base = root.join(dir);
        if !base.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e.file_name().to_str()))
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }

            let content = match fs::read_to_string(path) {
                Ok(c) => c,
                Err(_) => continue,
            };

            if symbols.iter().any(|s| references(&content, s)) {
                hits.push(path.strip_prefix(root).unwrap_or(path).to_path_buf());
            }
        }
    }

    match hits.len() {
        0 => TestResolution::NotFound,
        1 => TestResolution::Found {
            file: display_path(&hits[0]),
            test_fn: None, // refine later if needed
        },
        _ => TestResolution::Ambiguous {
            files: hits.iter().map(|p| display_path(p)).collect(),
        },
    }
}

/// Call or constructor reference: `name(` or `Name::` / `Name.`
fn references(haystack: &str, symbol: &str) -> bool {
    haystack.contains(&format!("{symbol}("))
        || haystack.contains(&format!("{symbol}::"))
        || haystack.contains(&format!("{symbol}."))
}

/// Name of the `fn` that first references `symbol` inside a test module.
fn enclosing_test_fn(tests: &str, symbol: &str) -> Option<String> {
    let mut current = None;
    for line in tests.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("fn ") {
            current = rest
                .split(|c: char| c == '(' || c == '<')
                .next()
                .map(|s| s.trim().to_string());
        }
        if references(line, symbol) && current.is_some() {
            return current;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_rust_tests_are_found() {
        let src = "pub fn add(a: i32, b: i32) -> i32 { a + b }\n\
                   #[cfg(test)]\nmod tests {\n    use super::*;\n    #[test]\n    fn adds() {\n        assert_eq!(add(1, 2), 3);\n    }\n}\n";
        let dir = tempfile::tempdir().unwrap();

        let r = find_existing_tests(dir.path(), Language::Rust, Path::new("src/calc.rs"), src, &["add"]);
        assert_eq!(
            r,
            TestResolution::Found {
                file: "src/calc.rs".into(),
                test_fn: Some("adds".into())
            }
        );
    }

    #[test]
    fn python_hits_in_several_roots_are_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        for d in ["tests", "test"] {
            std::fs::create_dir_all(dir.path().join(d)).unwrap();
            std::fs::write(dir.path().join(d).join("test_stack.py"), "s.push(1)\n").unwrap();
        }

        let r = find_existing_tests(dir.path(), Language::Python, Path::new("stack.py"), "", &["push"]);
        assert_eq!(
            r,
            TestResolution::Ambiguous {
                files: vec!["tests/test_stack.py".into(), "test/test_stack.py".into()]
            }
        );
    }

    #[test]
    fn nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let r = find_existing_tests(dir.path(), Language::Python, Path::new("x.py"), "", &["pop"]);
        assert_eq!(r, TestResolution::NotFound);
    }
}
