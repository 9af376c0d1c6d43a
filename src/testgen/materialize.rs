use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::detectors::language::Language;
use crate::resolve::{GenerationTarget, TestPlacement};

/* ============================================================
   Public entry
   ============================================================ */

/// Prefix of every test module appended to a source file; the default
/// inline run filters on it.
pub const INLINE_TEST_MODULE: &str = "unitforge_tests";

/// Write `test_code` for `target` under the tree at `root`.
///
/// Returns the path relative to `root`. Integration tests replace any file
/// of the same name. Inline tests are appended to the target's source file,
/// so `root` must be a scratch copy.
pub fn materialize_test(root: &Path, target: &GenerationTarget, test_code: &str) -> io::Result<PathBuf> {
    let code = tidy(test_code);

    match target.placement() {
        TestPlacement::Integration => {
            let rel = test_file_for(root, target);
            let path = root.join(&rel);
            ensure_parent_dir(&path)?;
            fs::write(&path, code)?;
            Ok(rel)
        }
        TestPlacement::Inline => {
            let path = root.join(&target.file);
            let mut source = fs::read_to_string(&path)?;
            if !source.ends_with('\n') {
                source.push('\n');
            }
            source.push('\n');
            source.push_str(&inline_module(&inline_module_name(target), &code));
            fs::write(&path, source)?;
            Ok(target.file.clone())
        }
    }
}

/// Relative test path for `target`: `tests/<name>.rs` or `tests/test_<name>.py`.
/// Inline targets use their source file.
pub fn test_file_for(root: &Path, target: &GenerationTarget) -> PathBuf {
    if target.placement() == TestPlacement::Inline {
        return target.file.clone();
    }

    let dir = find_test_root(root);
    let name = sanitize_name(target);

    match target.language {
        Language::Python => dir.join(format!("test_{name}.py")),
        Language::Rust => dir.join(format!("{name}.rs")),
    }
}

/// Leading blank lines and trailing whitespace go; indentation stays.
fn tidy(code: &str) -> String {
    let start = code
        .char_indices()
        .find(|&(_, c)| !c.is_whitespace())
        .map_or(code.len(), |(i, _)| code[..i].rfind('\n').map_or(0, |n| n + 1));
    format!("{}\n", code[start..].trim_end())
}

/// `unitforge_tests_<method>`, or `unitforge_tests_<class>` for class
/// targets, so several targets can share one source file.
pub fn inline_module_name(target: &GenerationTarget) -> String {
    let subject = match (target.kind, target.methods.first()) {
        (crate::resolve::TargetKind::Method, Some(m)) => m.name.as_str(),
        _ => target.class.as_str(),
    };
    let subject: String = subject
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{INLINE_TEST_MODULE}_{subject}")
}

/// Wrap bare test functions in a `#[cfg(test)]` module; a reply that already
/// declares its own test module is kept as is.
fn inline_module(name: &str, code: &str) -> String {
    if code.contains("#[cfg(test)]") {
        return code.to_string();
    }

    let body: Vec<String> = code
        .lines()
        .map(|l| if l.trim().is_empty() { String::new() } else { format!("    {l}") })
        .collect();
    format!(
        "#[cfg(test)]\nmod {name} {{\n    use super::*;\n\n{}\n}}\n",
        body.join("\n")
    )
}

/* ============================================================
   Test root resolution
   ============================================================ */

fn find_test_root(root: &Path) -> PathBuf {
    for name in ["tests", "test"] {
        if root.join(name).is_dir() {
            return PathBuf::from(name);
        }
    }
    PathBuf::from("tests")
}

/* ============================================================
   Helpers
   ============================================================ */

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// `unitforge_<stem>_<class>[_<method>]`, lowercase identifier characters only.
fn sanitize_name(target: &GenerationTarget) -> String {
    let stem = target
        .file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("test");

    let mut name = format!("unitforge_{stem}");
    if target.class != stem {
        name.push('_');
        name.push_str(&target.class);
    }
    if let (crate::resolve::TargetKind::Method, Some(m)) = (target.kind, target.methods.first()) {
        name.push('_');
        name.push_str(&m.name);
    }

    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{MethodInfo, TestResolution};

    fn target(lang: Language, file: &str) -> GenerationTarget {
        GenerationTarget::method_target(
            lang,
            Path::new(file),
            "Calc",
            MethodInfo {
                name: "add".into(),
                signature: String::new(),
                first_line: 1,
                last_line: 1,
                declared_errors: vec![],
                source: String::new(),
                crate_private: false,
            },
            vec![],
            TestResolution::NotFound,
        )
    }

    #[test]
    fn writes_into_existing_test_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("test")).unwrap();

        let rel = materialize_test(dir.path(), &target(Language::Python, "pkg/calc.py"), "def test_x():\n    pass\n").unwrap();
        assert_eq!(rel, PathBuf::from("test/test_unitforge_calc_calc_add.py"));
        assert_eq!(fs::read_to_string(dir.path().join(&rel)).unwrap(), "def test_x():\n    pass\n");
    }

    #[test]
    fn keeps_first_line_indentation() {
        let dir = tempfile::tempdir().unwrap();
        let rel = materialize_test(
            dir.path(),
            &target(Language::Python, "pkg/calc.py"),
            "\n\n    x = 1\ndef test_x():\n    pass\n\n",
        )
        .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join(&rel)).unwrap(),
            "    x = 1\ndef test_x():\n    pass\n"
        );
    }

    #[test]
    fn crate_private_targets_are_tested_inline() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/account.rs"),
            "pub(crate) fn helper(x: u32) -> u32 { x + 1 }",
        )
        .unwrap();

        let mut t = target(Language::Rust, "src/account.rs");
        t.methods[0].crate_private = true;
        let rel = materialize_test(
            dir.path(),
            &t,
            "#[test]\nfn should_helper_correctly() {\n    assert_eq!(helper(1), 2);\n}\n",
        )
        .unwrap();

        assert_eq!(rel, PathBuf::from("src/account.rs"));
        assert_eq!(
            fs::read_to_string(dir.path().join(&rel)).unwrap(),
            "pub(crate) fn helper(x: u32) -> u32 { x + 1 }\n\n\
             #[cfg(test)]\nmod unitforge_tests_add {\n    use super::*;\n\n\
             \x20   #[test]\n    fn should_helper_correctly() {\n        assert_eq!(helper(1), 2);\n    }\n}\n"
        );
        assert!(!dir.path().join("tests").exists());
    }

    #[test]
    fn inline_reply_with_its_own_module_is_kept() {
        let module = "#[cfg(test)]\nmod unitforge_tests_add {\n    use super::*;\n}\n";
        assert_eq!(inline_module("unitforge_tests_add", module), module);
    }

    #[test]
    fn rust_tests_go_to_tests_dir() {
        let dir = tempfile::tempdir().unwrap();
        let rel = test_file_for(dir.path(), &target(Language::Rust, "src/calc.rs"));
        assert_eq!(rel, PathBuf::from("tests/unitforge_calc_calc_add.rs"));
    }
}
