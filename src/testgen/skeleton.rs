//! testgen/skeleton.rs
//!
//! Deterministic test skeletons. Used as a starting point in prompts and as
//! the fallback output of `unitforge targets --skeleton`.

use std::fs;
use std::path::{Component, Path};

use crate::detectors::language::Language;
use crate::resolve::{GenerationTarget, TestPlacement};
use crate::testgen::materialize::inline_module_name;

/// `should_<method>_correctly`
pub fn test_name(method: &str) -> String {
    format!("should_{}_correctly", method.trim_start_matches('_'))
}

/// Package name from `<root>/Cargo.toml`, as a Rust identifier.
pub fn crate_name(root: &Path) -> Option<String> {
    let text = fs::read_to_string(root.join("Cargo.toml")).ok()?;
    let value: toml::Value = toml::from_str(&text).ok()?;
    let name = value.get("package")?.get("name")?.as_str()?;
    Some(name.replace('-', "_"))
}

pub fn skeleton(target: &GenerationTarget, crate_name: Option<&str>) -> String {
    match target.language {
        Language::Rust => rust_skeleton(target, crate_name),
        Language::Python => python_skeleton(target),
    }
}

fn rust_skeleton(target: &GenerationTarget, crate_name: Option<&str>) -> String {
    let free = is_module_level(target);
    let mut tests = String::new();
    for m in &target.methods {
        tests.push_str("#[test]\n");
        tests.push_str(&format!("fn {}() {{\n", test_name(&m.name)));
        tests.push_str("    // arrange\n");
        let call = if free {
            format!("{}(/* args */)", m.name)
        } else {
            format!("{}::{}(/* args */)", target.class, m.name)
        };
        tests.push_str(&format!("    let result = {call};\n"));
        tests.push_str("    // assert on `result`\n");
        tests.push_str("}\n\n");
    }
    let tests = tests.trim_end();

    let out = match target.placement() {
        TestPlacement::Inline => {
            let body: Vec<String> = tests
                .lines()
                .map(|l| if l.is_empty() { String::new() } else { format!("    {l}") })
                .collect();
            format!(
                "#[cfg(test)]\nmod {} {{\n    use super::*;\n\n{}\n}}",
                inline_module_name(target),
                body.join("\n")
            )
        }
        TestPlacement::Integration => {
            let krate = crate_name.unwrap_or("crate_under_test");
            let import = match rust_module_path(&target.file) {
                Some(m) => format!("use {krate}::{m}::*;"),
                None => format!("use {krate}::*;"),
            };
            format!("{import}\n\n{tests}")
        }
    };

    out + "\n"
}

fn python_skeleton(target: &GenerationTarget) -> String {
    let mut out = String::new();

    let module = python_module_path(&target.file);
    let free = is_module_level(target);
    if free {
        let names: Vec<&str> = target.method_names().collect();
        out.push_str(&format!("from {} import {}\n\n\n", module, names.join(", ")));
    } else {
        out.push_str(&format!("from {} import {}\n\n\n", module, target.class));
    }

    for m in &target.methods {
        out.push_str(&format!("def test_{}():\n", test_name(&m.name)));
        if free {
            out.push_str(&format!("    result = {}(...)\n", m.name));
        } else {
            out.push_str(&format!("    subject = {}()\n", target.class));
            out.push_str(&format!("    result = subject.{}(...)\n", m.name));
        }
        out.push_str("    assert result is not None\n\n\n");
    }

    out.trim_end().to_string() + "\n"
}

/// Free functions carry the module stem as their class.
fn is_module_level(target: &GenerationTarget) -> bool {
    target.file.file_stem().and_then(|s| s.to_str()) == Some(target.class.as_str())
}

/// `src/a/b.rs` → `a::b`; crate roots and `mod.rs` collapse to their parent.
fn rust_module_path(file: &Path) -> Option<String> {
    let mut parts: Vec<String> = file
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str().map(str::to_string),
            _ => None,
        })
        .collect();

    if parts.first().map(String::as_str) == Some("src") {
        parts.remove(0);
    }
    if matches!(parts.last().map(String::as_str), Some("lib" | "main" | "mod")) {
        parts.pop();
    }

    (!parts.is_empty()).then(|| parts.join("::"))
}

fn python_module_path(file: &Path) -> String {
    let parts: Vec<String> = file
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str().map(str::to_string),
            _ => None,
        })
        .filter(|p| p != "src")
        .collect();

    let mut path = parts.join(".");
    if let Some(pkg) = path.strip_suffix(".__init__") {
        path = pkg.to_string();
    }
    path
}
