use sha2::{Digest, Sha256};

use crate::detectors::language::Language;
use crate::repair::session::Attempt;
use crate::resolve::{GenerationTarget, TargetKind, TestPlacement, TestResolution};
use crate::verify::diagnostic::DiagnosticKind;

const PROMPT_ABI_VERSION: &str = "v1-unitforge-repair";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

impl LlmPrompt {
    pub fn len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.user.is_empty()
    }

    /// Stable identity of this prompt, used as candidate lineage.
    pub fn hash(&self) -> String {
        let mut h = Sha256::new();
        h.update(PROMPT_ABI_VERSION.as_bytes());
        h.update(self.system.as_bytes());
        h.update(self.user.as_bytes());
        hex::encode(h.finalize())
    }
}

/// `history` is already windowed, oldest first.
pub fn build_prompt(target: &GenerationTarget, skeleton: &str, history: &[&Attempt]) -> LlmPrompt {
    LlmPrompt {
        system: system_prompt(target.language, target.placement()),
        user: user_prompt(target, skeleton, history),
    }
}

/* ============================================================
   System prompt (stable, reused)
   ============================================================ */

fn system_prompt(language: Language, placement: TestPlacement) -> String {
    let (runner, output) = match (language, placement) {
        (Language::Rust, TestPlacement::Inline) => (
            "cargo test (a #[cfg(test)] module appended to the source file)",
            "the complete test module",
        ),
        (Language::Rust, TestPlacement::Integration) => {
            ("cargo test (integration test file under tests/)", "the complete test file")
        }
        (Language::Python, _) => ("pytest", "the complete test file"),
    };

    format!(
        r#"
You are an expert software engineer writing unit tests.

Rules:
- Do NOT modify production code
- Tests must compile, pass, and be deterministic
- No network, no sleeping, no reliance on wall-clock time
- Cover normal paths, edge cases and declared error paths
- Tests run with {runner}
- Output exactly one fenced code block containing {output}
"#
    )
    .trim()
    .to_string()
}

/* ============================================================
   User prompt
   ============================================================ */

fn user_prompt(target: &GenerationTarget, skeleton: &str, history: &[&Attempt]) -> String {
    let fence = target.language.fence();
    let mut out = String::new();

    /* ---------- CONTEXT ---------- */
    out.push_str("CONTEXT\n");
    out.push_str(&format!("File: {}\n", target.file.display()));
    out.push_str(&format!("Language: {}\n", target.language));
    match target.kind {
        TargetKind::Method => out.push_str(&format!("Target: method {}\n", target.qualified_name())),
        TargetKind::Class => out.push_str(&format!("Target: class {}\n", target.class)),
    }

    let errors = target.declared_errors();
    if !errors.is_empty() {
        out.push_str(&format!("Declared errors: {}\n", errors.join(", ")));
    }

    if !target.imports.is_empty() {
        out.push_str("\nImports in scope:\n");
        for i in &target.imports {
            out.push_str(&format!("{i}\n"));
        }
    }

    /* ---------- CODE ---------- */
    out.push_str("\nCODE UNDER TEST\n");
    for m in &target.methods {
        out.push_str(&format!(
            "// {} (lines {}-{})\n```{fence}\n{}\n```\n",
            m.signature, m.first_line, m.last_line, m.source
        ));
    }

    /* ---------- TEST RESOLUTION ---------- */
    out.push_str("\nTEST STATUS\n");
    match &target.existing_tests {
        TestResolution::Found { file, test_fn } => {
            out.push_str(&format!("An existing test was found at: {file}\n"));
            if let Some(name) = test_fn {
                out.push_str(&format!("Relevant test function: {name}\n"));
            }
            out.push_str("Do not duplicate what it already covers.\n");
        }
        TestResolution::Ambiguous { files } => {
            out.push_str("Several existing test files reference this code:\n");
            for f in files {
                out.push_str(&format!("- {f}\n"));
            }
        }
        TestResolution::NotFound => out.push_str("No existing test was found.\n"),
    }

    /* ---------- SKELETON ---------- */
    out.push_str(&format!("\nSTART FROM THIS SKELETON\n```{fence}\n{}\n```\n", skeleton.trim_end()));

    /* ---------- PRIOR ATTEMPTS ---------- */
    if !history.is_empty() {
        out.push_str("\nPREVIOUS ATTEMPTS (oldest first)\n");
        for a in history {
            out.push_str(&format!(
                "\nAttempt {} failed with {}\n",
                a.candidate.attempt, a.diagnostic.kind
            ));
            if let Some(loc) = &a.diagnostic.location {
                out.push_str(&format!("At: {loc}\n"));
            }
            out.push_str(&format!("Message:\n{}\n", a.diagnostic.message));
            if !a.diagnostic.stack.is_empty() {
                out.push_str("Stack:\n");
                for f in a.diagnostic.stack.iter().take(8) {
                    out.push_str(&format!("  {f}\n"));
                }
            }
            out.push_str(&format!("Code:\n```{fence}\n{}\n```\n", a.candidate.source.trim_end()));
        }

        if let Some(last) = history.last() {
            out.push_str("\nREPAIR GUIDANCE\n");
            out.push_str(repair_guidance(last.diagnostic.kind));
        }
    }

    out
}

fn repair_guidance(kind: DiagnosticKind) -> &'static str {
    match kind {
        DiagnosticKind::Timeout => {
            "- The tests ran too long: simplify inputs, avoid infinite loops and blocking calls\n"
        }
        DiagnosticKind::CompileError => {
            "- Fix compilation: check imports, paths, visibility, types and signatures exactly as declared\n"
        }
        DiagnosticKind::AssertionFailure => {
            "- Fix expectations: derive expected values from the code under test, not from guesses\n"
        }
        DiagnosticKind::RuntimeException => {
            "- Fix setup or logic: construct valid inputs and expect declared errors explicitly\n"
        }
        DiagnosticKind::Success => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::MethodInfo;
    use crate::testgen::candidate::{PromptLineage, TestCandidate};
    use crate::verify::diagnostic::Diagnostic;
    use std::path::Path;

    fn target() -> GenerationTarget {
        GenerationTarget::method_target(
            Language::Rust,
            Path::new("src/calc.rs"),
            "Calc",
            MethodInfo {
                name: "div".into(),
                signature: "pub fn div(a: i32, b: i32) -> Result<i32, MathError>".into(),
                first_line: 3,
                last_line: 6,
                declared_errors: vec!["MathError".into()],
                source: "pub fn div(a: i32, b: i32) -> Result<i32, MathError> { todo!() }".into(),
                crate_private: false,
            },
            vec!["use crate::error::MathError;".into()],
            TestResolution::NotFound,
        )
    }

    fn attempt(n: u32, kind: DiagnosticKind) -> Attempt {
        Attempt {
            candidate: TestCandidate::new(
                "t",
                n,
                format!("// attempt {n}"),
                PromptLineage {
                    prompt_hash: String::new(),
                    parent: None,
                    folded_attempts: vec![],
                },
            ),
            diagnostic: Diagnostic::new(kind, "boom"),
        }
    }

    #[test]
    fn first_prompt_has_context_but_no_history() {
        let p = build_prompt(&target(), "// skeleton", &[]);
        assert!(p.user.contains("Target: method Calc::div"));
        assert!(p.user.contains("Declared errors: MathError"));
        assert!(p.user.contains("// skeleton"));
        assert!(!p.user.contains("PREVIOUS ATTEMPTS"));
    }

    #[test]
    fn guidance_follows_last_diagnostic() {
        let a1 = attempt(1, DiagnosticKind::CompileError);
        let a2 = attempt(2, DiagnosticKind::Timeout);
        let p = build_prompt(&target(), "", &[&a1, &a2]);

        let first = p.user.find("Attempt 1 failed with compile error").unwrap();
        let second = p.user.find("Attempt 2 failed with timeout").unwrap();
        assert!(first < second);
        assert!(p.user.contains("avoid infinite loops"));
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = build_prompt(&target(), "", &[]);
        let b = build_prompt(&target(), "", &[]);
        let c = build_prompt(&target(), "x", &[]);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
