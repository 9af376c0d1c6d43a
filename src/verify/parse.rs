//! verify/parse.rs
//!
//! Interpretation of raw compiler and test-runner output.

use std::sync::OnceLock;

use regex::Regex;

use crate::detectors::language::Language;
use crate::verify::diagnostic::{Diagnostic, DiagnosticKind, SourceLocation};

const OUTPUT_LIMIT: usize = 10_000;
const MAX_FRAMES: usize = 20;

macro_rules! regex {
    ($re:literal) => {{
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new($re).expect("valid regex"))
    }};
}

/// Keep the tail, where runners print their verdicts.
pub fn truncate_output(s: &str) -> String {
    if s.chars().count() <= OUTPUT_LIMIT {
        return s.to_string();
    }

    let tail: String = s
        .chars()
        .rev()
        .take(OUTPUT_LIMIT)
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    format!("...truncated...\n{}", tail)
}

/// stdout then stderr, separated by a newline.
pub fn combine(stdout: &str, stderr: &str) -> String {
    let mut text = String::from(stdout);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(stderr);
    }
    text
}

/* ============================================================
   Compile failures
   ============================================================ */

pub fn compile_failure(language: Language, output: &str) -> Diagnostic {
    let (message, location) = match language {
        Language::Rust => rustc_error(output),
        Language::Python => python_syntax_error(output),
    };

    Diagnostic::new(DiagnosticKind::CompileError, message.unwrap_or_else(|| truncate_output(output.trim())))
        .with_location(location)
}

fn rustc_error(output: &str) -> (Option<String>, Option<SourceLocation>) {
    let head = regex!(r"(?m)^error(\[E\d+\])?: (.+)$");
    let arrow = regex!(r"(?m)^\s*--> ([^:\s]+):(\d+):(\d+)");

    let Some(m) = head.captures(output) else {
        return (None, None);
    };

    let message = format!("error{}: {}", m.get(1).map_or("", |c| c.as_str()), &m[2]);
    let rest = &output[m.get(0).map_or(0, |c| c.end())..];
    let location = arrow.captures(rest).map(|c| SourceLocation {
        file: c[1].to_string(),
        line: c[2].parse().unwrap_or(0),
        column: c[3].parse().ok(),
    });

    (Some(message), location)
}

fn python_syntax_error(output: &str) -> (Option<String>, Option<SourceLocation>) {
    let file_line = regex!(r#"File "([^"]+)", line (\d+)"#);
    let err = regex!(r"(?m)^(\w*(?:Syntax|Indentation|Tab)Error): (.+)$");

    let message = err.captures(output).map(|c| format!("{}: {}", &c[1], &c[2]));
    let location = file_line.captures_iter(output).last().map(|c| SourceLocation {
        file: c[1].to_string(),
        line: c[2].parse().unwrap_or(0),
        column: None,
    });

    (message, location)
}

/* ============================================================
   Execution outcomes
   ============================================================ */

/// Classify a finished (not timed out) test run.
pub fn execution_outcome(language: Language, success: bool, output: &str) -> Diagnostic {
    let (passed, failed) = parse_counts(language, output);

    if runner_timed_out(output) {
        return Diagnostic::new(DiagnosticKind::Timeout, "a test exceeded the per-test timeout")
            .with_counts(passed, failed);
    }

    // pytest exits with 5 when it collects nothing
    if passed == 0 && failed == 0 && (success || output.contains("no tests ran")) {
        return Diagnostic::new(
            DiagnosticKind::AssertionFailure,
            "no tests were executed; the file must define at least one test",
        );
    }

    if success && failed == 0 {
        return Diagnostic::success(passed);
    }

    let diag = match language {
        Language::Rust => rust_failure(output),
        Language::Python => python_failure(output),
    };

    diag.with_counts(passed, failed)
}

fn runner_timed_out(output: &str) -> bool {
    // pytest-timeout, and our own per-test watchdog convention
    output.contains("Failed: Timeout >") || output.contains("UNITFORGE_TEST_TIMEOUT")
}

fn rust_failure(output: &str) -> Diagnostic {
    let panic = regex!(r"(?m)^thread '([^']+)' panicked at ([^:\s]+):(\d+):(\d+):\s*$");
    let panic_inline = regex!(r"(?m)^thread '([^']+)' panicked at '(.+)', ([^:\s]+):(\d+):(\d+)");

    if let Some(c) = panic.captures(output) {
        let after = &output[c.get(0).map_or(0, |m| m.end())..];
        let message: String = after
            .lines()
            .skip_while(|l| l.trim().is_empty())
            .take_while(|l| !l.trim().is_empty() && !l.starts_with("note:") && !l.starts_with("stack backtrace"))
            .collect::<Vec<_>>()
            .join("\n");

        let location = SourceLocation {
            file: c[2].to_string(),
            line: c[3].parse().unwrap_or(0),
            column: c[4].parse().ok(),
        };
        return rust_panic_diag(&c[1], message, location, output);
    }

    if let Some(c) = panic_inline.captures(output) {
        let location = SourceLocation {
            file: c[3].to_string(),
            line: c[4].parse().unwrap_or(0),
            column: c[5].parse().ok(),
        };
        return rust_panic_diag(&c[1], c[2].to_string(), location, output);
    }

    Diagnostic::new(DiagnosticKind::RuntimeException, truncate_output(output.trim()))
}

fn rust_panic_diag(test: &str, message: String, location: SourceLocation, output: &str) -> Diagnostic {
    let kind = if message.starts_with("assertion") {
        DiagnosticKind::AssertionFailure
    } else {
        DiagnosticKind::RuntimeException
    };

    Diagnostic::new(kind, format!("{test}: {message}"))
        .with_location(Some(location))
        .with_stack(rust_frames(output))
}

fn rust_frames(output: &str) -> Vec<String> {
    let frame = regex!(r"(?m)^\s+\d+: (.+)$");
    frame
        .captures_iter(output)
        .map(|c| c[1].trim().to_string())
        .take(MAX_FRAMES)
        .collect()
}

fn python_failure(output: &str) -> Diagnostic {
    let short = regex!(r"(?m)^FAILED (\S+?)(?: - (.+))?$");
    let err_line = regex!(r"(?m)^E\s+(\w+(?:\.\w+)*(?:Error|Exception|Exit|Interrupt)?)(?::\s*(.*))?$");
    let frame = regex!(r"(?m)^([^\s:][^:]*\.py):(\d+): (.*)$");

    let frames: Vec<(String, u32, String)> = frame
        .captures_iter(output)
        .map(|c| (c[1].to_string(), c[2].parse().unwrap_or(0), c[3].trim().to_string()))
        .collect();

    let location = frames.last().map(|(file, line, _)| SourceLocation {
        file: file.clone(),
        line: *line,
        column: None,
    });
    let stack: Vec<String> = frames
        .iter()
        .take(MAX_FRAMES)
        .map(|(f, l, what)| format!("{f}:{l} {what}"))
        .collect();

    let summary = short
        .captures(output)
        .map(|c| match c.get(2) {
            Some(reason) => format!("{}: {}", &c[1], reason.as_str()),
            None => c[1].to_string(),
        });

    let error_name = err_line.captures(output).map(|c| c[1].to_string());
    let assertion = error_name.as_deref() == Some("AssertionError")
        || summary.as_deref().is_some_and(|s| s.contains("AssertionError") || s.contains("assert "));

    let kind = if assertion {
        DiagnosticKind::AssertionFailure
    } else {
        DiagnosticKind::RuntimeException
    };

    let message = summary
        .or(error_name)
        .unwrap_or_else(|| truncate_output(output.trim()));

    Diagnostic::new(kind, message)
        .with_location(location)
        .with_stack(stack)
}

/* ============================================================
   Counts
   ============================================================ */

pub fn parse_counts(language: Language, output: &str) -> (usize, usize) {
    match language {
        Language::Rust => parse_cargo_counts(output),
        Language::Python => parse_pytest_counts(output),
    }
}

/// Sum over every `test result:` line (one per test binary).
fn parse_cargo_counts(output: &str) -> (usize, usize) {
    let re = regex!(r"test result:\s+\w+\.\s+(\d+) passed;\s+(\d+) failed;");
    re.captures_iter(output).fold((0, 0), |(p, f), c| {
        (
            p + c[1].parse::<usize>().unwrap_or(0),
            f + c[2].parse::<usize>().unwrap_or(0),
        )
    })
}

fn parse_pytest_counts(output: &str) -> (usize, usize) {
    let pass = regex!(r"(\d+)\s+passed");
    let fail = regex!(r"(\d+)\s+(?:failed|error)");

    let last = |re: &Regex| {
        re.captures_iter(output)
            .last()
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(0)
    };

    (last(pass), last(fail))
}
