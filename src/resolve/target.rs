//! resolve/target.rs
//!
//! Requested scopes and the concrete targets they expand to.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::detectors::language::Language;
use crate::resolve::existing::TestResolution;

/// What the caller asked to cover.
///
/// String forms: `project`, `class:[file#]Name`, `method:[file#][Class::]name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum ScopeSpec {
    Method {
        file: Option<PathBuf>,
        class: Option<String>,
        name: String,
    },
    Class {
        file: Option<PathBuf>,
        name: String,
    },
    Project,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scope `{input}`: {reason}")]
pub struct ScopeParseError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for ScopeSpec {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ScopeParseError {
            input: s.to_string(),
            reason,
        };

        let s = s.trim();
        if s == "project" {
            return Ok(ScopeSpec::Project);
        }

        let (kind, rest) = s.split_once(':').ok_or_else(|| fail("expected `kind:name`"))?;
        let (file, name) = match rest.rsplit_once('#') {
            Some((f, n)) if !f.is_empty() => (Some(PathBuf::from(f)), n),
            _ => (None, rest),
        };
        if name.is_empty() {
            return Err(fail("empty name"));
        }

        match kind {
            "class" => {
                if name.contains("::") {
                    return Err(fail("class names cannot be qualified"));
                }
                Ok(ScopeSpec::Class {
                    file,
                    name: name.to_string(),
                })
            }
            "method" => {
                let (class, name) = match name.rsplit_once("::") {
                    Some((c, n)) if !c.is_empty() && !n.is_empty() => (Some(c.to_string()), n),
                    Some(_) => return Err(fail("empty class or method")),
                    None => (None, name),
                };
                Ok(ScopeSpec::Method {
                    file,
                    class,
                    name: name.to_string(),
                })
            }
            _ => Err(fail("kind must be `method`, `class` or `project`")),
        }
    }
}

impl fmt::Display for ScopeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file_prefix = |file: &Option<PathBuf>| {
            file.as_ref()
                .map(|p| format!("{}#", p.display()))
                .unwrap_or_default()
        };

        match self {
            ScopeSpec::Project => f.write_str("project"),
            ScopeSpec::Class { file, name } => write!(f, "class:{}{}", file_prefix(file), name),
            ScopeSpec::Method { file, class, name } => {
                write!(f, "method:{}", file_prefix(file))?;
                if let Some(c) = class {
                    write!(f, "{c}::")?;
                }
                f.write_str(name)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Method,
    Class,
}

/// One callable with its extracted context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub signature: String,
    pub first_line: u32,
    pub last_line: u32,
    /// Error types or panics the callable declares or raises
    pub declared_errors: Vec<String>,
    pub source: String,
    /// `pub(crate)` and friends: out of reach for integration tests
    pub crate_private: bool,
}

/// Where a generated test lives in the project tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPlacement {
    /// Separate file in the test root (`tests/`, `test/`)
    Integration,
    /// `#[cfg(test)]` module appended to the source file itself
    Inline,
}

/// Immutable, fully resolved unit of work for one repair loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationTarget {
    pub id: String,
    pub kind: TargetKind,
    pub language: Language,
    /// Source file relative to the project root
    pub file: PathBuf,
    pub class: String,
    /// One entry for method targets; every testable method for class targets
    pub methods: Vec<MethodInfo>,
    pub imports: Vec<String>,
    pub existing_tests: TestResolution,
}

impl GenerationTarget {
    pub fn method_target(
        language: Language,
        file: &Path,
        class: &str,
        method: MethodInfo,
        imports: Vec<String>,
        existing_tests: TestResolution,
    ) -> Self {
        Self {
            id: format!("{}::{}::{}", display_path(file), class, method.name),
            kind: TargetKind::Method,
            language,
            file: file.to_path_buf(),
            class: class.to_string(),
            methods: vec![method],
            imports,
            existing_tests,
        }
    }

    pub fn class_target(
        language: Language,
        file: &Path,
        class: &str,
        methods: Vec<MethodInfo>,
        imports: Vec<String>,
        existing_tests: TestResolution,
    ) -> Self {
        Self {
            id: qualified_class(file, class),
            kind: TargetKind::Class,
            language,
            file: file.to_path_buf(),
            class: class.to_string(),
            methods,
            imports,
            existing_tests,
        }
    }

    /// `Class::method` for method targets, `Class` otherwise.
    pub fn qualified_name(&self) -> String {
        match (self.kind, self.methods.first()) {
            (TargetKind::Method, Some(m)) => format!("{}::{}", self.class, m.name),
            _ => self.class.clone(),
        }
    }

    /// Rust targets touching crate-private items are tested from inside
    /// the source file.
    pub fn placement(&self) -> TestPlacement {
        if self.language == Language::Rust && self.methods.iter().any(|m| m.crate_private) {
            TestPlacement::Inline
        } else {
            TestPlacement::Integration
        }
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.name.as_str())
    }

    pub fn declared_errors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .methods
            .iter()
            .flat_map(|m| m.declared_errors.iter().map(String::as_str))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// `file::Class`, the stable ordering key for project scope.
pub fn qualified_class(file: &Path, class: &str) -> String {
    format!("{}::{}", display_path(file), class)
}

/// Forward-slash path, identical on every platform.
pub fn display_path(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
