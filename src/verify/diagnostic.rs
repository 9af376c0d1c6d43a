//! verify/diagnostic.rs
//!
//! Structured outcome of one verification. Diagnostics are data: a failing
//! test is a `Diagnostic`, never an `Err`.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    CompileError,
    AssertionFailure,
    RuntimeException,
    Timeout,
    Success,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::CompileError => "compile error",
            DiagnosticKind::AssertionFailure => "assertion failure",
            DiagnosticKind::RuntimeException => "runtime exception",
            DiagnosticKind::Timeout => "timeout",
            DiagnosticKind::Success => "success",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(c) => write!(f, "{}:{}:{}", self.file, self.line, c),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub location: Option<SourceLocation>,
    pub stack: Vec<String>,
    /// Pass/fail counts reported by the runner, when it reports them
    pub passed: usize,
    pub failed: usize,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            stack: Vec::new(),
            passed: 0,
            failed: 0,
        }
    }

    pub fn success(passed: usize) -> Self {
        Self {
            passed,
            ..Self::new(DiagnosticKind::Success, format!("{passed} passed"))
        }
    }

    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_counts(mut self, passed: usize, failed: usize) -> Self {
        self.passed = passed;
        self.failed = failed;
        self
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind == DiagnosticKind::Success
    }

    /// One-line form for logs and reports.
    pub fn headline(&self) -> String {
        let first = self.message.lines().next().unwrap_or("");
        match &self.location {
            Some(loc) => format!("{}: {} ({})", self.kind, first, loc),
            None => format!("{}: {}", self.kind, first),
        }
    }
}
