//! Target resolution: scope → ordered generation targets.

pub mod existing;
pub mod extract;
pub mod target;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::detectors::language::{is_ignored_dir, Language};
use crate::error::ResolutionError;

pub use existing::TestResolution;
pub use target::{GenerationTarget, MethodInfo, ScopeSpec, ScopeParseError, TargetKind, TestPlacement};

use existing::find_existing_tests;
use extract::{extract, Callable, ParsedFile};
use target::{display_path, qualified_class};

/// Directories holding tests, never sources under test.
const TEST_DIRS: &[&str] = &["tests", "test", "testing"];

#[derive(Debug, Clone)]
pub struct TargetResolver {
    root: PathBuf,
    include_accessors: bool,
}

struct Loaded {
    rel: PathBuf,
    source: String,
    parsed: ParsedFile,
}

impl TargetResolver {
    pub fn new(root: impl Into<PathBuf>, include_accessors: bool) -> Self {
        Self {
            root: root.into(),
            include_accessors,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expand `scope` into targets. Same tree, same scope → same output.
    pub fn resolve(&self, scope: &ScopeSpec) -> Result<Vec<GenerationTarget>, ResolutionError> {
        let targets = match scope {
            ScopeSpec::Method { file, class, name } => {
                vec![self.resolve_method(file.as_deref(), class.as_deref(), name)?]
            }
            ScopeSpec::Class { file, name } => self.resolve_class(file.as_deref(), name)?,
            ScopeSpec::Project => self.resolve_project()?,
        };

        tracing::info!(scope = %scope, targets = targets.len(), "resolved scope");
        Ok(targets)
    }

    /* ============================================================
       Scopes
       ============================================================ */

    /// An explicit method request bypasses the testability filter.
    fn resolve_method(
        &self,
        file: Option<&Path>,
        class: Option<&str>,
        name: &str,
    ) -> Result<GenerationTarget, ResolutionError> {
        let files = self.candidate_files(file)?;
        let mut matches: Vec<(&Loaded, &Callable)> = Vec::new();

        for loaded in &files {
            for c in &loaded.parsed.callables {
                if c.info.name == name && class.map_or(true, |k| k == c.class) {
                    matches.push((loaded, c));
                }
            }
        }

        match matches.as_slice() {
            [] => Err(ResolutionError::NotFound {
                kind: "method",
                name: match class {
                    Some(k) => format!("{k}::{name}"),
                    None => name.to_string(),
                },
            }),
            [(loaded, c)] => Ok(GenerationTarget::method_target(
                loaded.parsed.language,
                &loaded.rel,
                &c.class,
                c.info.clone(),
                loaded.parsed.imports.clone(),
                self.existing(loaded, &[&c.info.name]),
            )),
            many => Err(ResolutionError::Ambiguous {
                name: name.to_string(),
                candidates: many
                    .iter()
                    .map(|(l, c)| format!("{}::{}::{}", display_path(&l.rel), c.class, c.info.name))
                    .collect(),
            }),
        }
    }

    /// One method target per testable method, in source order.
    fn resolve_class(&self, file: Option<&Path>, name: &str) -> Result<Vec<GenerationTarget>, ResolutionError> {
        let files = self.candidate_files(file)?;
        let owners: Vec<&Loaded> = files
            .iter()
            .filter(|l| l.parsed.callables.iter().any(|c| c.class == name))
            .collect();

        let loaded = match owners.as_slice() {
            [] => {
                return Err(ResolutionError::NotFound {
                    kind: "class",
                    name: name.to_string(),
                })
            }
            [one] => *one,
            many => {
                return Err(ResolutionError::Ambiguous {
                    name: name.to_string(),
                    candidates: many.iter().map(|l| qualified_class(&l.rel, name)).collect(),
                })
            }
        };

        let targets: Vec<GenerationTarget> = loaded
            .parsed
            .callables
            .iter()
            .filter(|c| c.class == name && c.is_testable(self.include_accessors))
            .map(|c| {
                GenerationTarget::method_target(
                    loaded.parsed.language,
                    &loaded.rel,
                    name,
                    c.info.clone(),
                    loaded.parsed.imports.clone(),
                    self.existing(loaded, &[&c.info.name]),
                )
            })
            .collect();

        if targets.is_empty() {
            tracing::warn!(class = name, "class has no testable methods");
        }
        Ok(targets)
    }

    /// One class target per class with at least one testable method,
    /// ordered by `file::Class`.
    fn resolve_project(&self) -> Result<Vec<GenerationTarget>, ResolutionError> {
        let mut by_key: BTreeMap<String, GenerationTarget> = BTreeMap::new();

        for loaded in self.load_all()? {
            let mut classes: Vec<&str> = Vec::new();
            for c in &loaded.parsed.callables {
                if !classes.contains(&c.class.as_str()) {
                    classes.push(&c.class);
                }
            }

            for class in classes {
                let methods: Vec<MethodInfo> = loaded
                    .parsed
                    .callables
                    .iter()
                    .filter(|c| c.class == class && c.is_testable(self.include_accessors))
                    .map(|c| c.info.clone())
                    .collect();
                if methods.is_empty() {
                    continue;
                }

                let mut symbols: Vec<&str> = vec![class];
                symbols.extend(methods.iter().map(|m| m.name.as_str()));
                let existing = self.existing(&loaded, &symbols);

                let target = GenerationTarget::class_target(
                    loaded.parsed.language,
                    &loaded.rel,
                    class,
                    methods,
                    loaded.parsed.imports.clone(),
                    existing,
                );
                by_key.insert(target.id.clone(), target);
            }
        }

        Ok(by_key.into_values().collect())
    }

    /* ============================================================
       Files
       ============================================================ */

    fn candidate_files(&self, file: Option<&Path>) -> Result<Vec<Loaded>, ResolutionError> {
        match file {
            Some(f) => Ok(vec![self.load(f)?]),
            None => self.load_all(),
        }
    }

    /// Every supported source file, sorted. Files that cannot be read or
    /// parsed are skipped with a warning; only a file named in the scope
    /// fails the resolution.
    fn load_all(&self) -> Result<Vec<Loaded>, ResolutionError> {
        let mut out = Vec::new();

        for rel in self.source_files()? {
            match self.load(&rel) {
                Ok(l) => out.push(l),
                Err(e @ (ResolutionError::NotCompilable(_) | ResolutionError::Io { .. })) => {
                    tracing::warn!(file = %rel.display(), error = %e, "skipping file");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }

    fn source_files(&self) -> Result<Vec<PathBuf>, ResolutionError> {
        if !self.root.is_dir() {
            return Err(ResolutionError::Io {
                path: self.root.clone(),
                message: "not a directory".into(),
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(is_ignored_dir(e.file_name().to_str())
                        || (e.file_type().is_dir() && TEST_DIRS.iter().any(|d| e.file_name() == *d)))
            })
        {
            let entry = entry.map_err(|e| ResolutionError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone()),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() || Language::from_path(entry.path()).is_none() {
                continue;
            }
            if is_test_file(entry.path()) {
                continue;
            }

            let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            files.push(rel.to_path_buf());
        }

        Ok(files)
    }

    fn load(&self, rel: &Path) -> Result<Loaded, ResolutionError> {
        let rel = rel.strip_prefix(&self.root).unwrap_or(rel).to_path_buf();
        if Language::from_path(&rel).is_none() {
            return Err(ResolutionError::UnsupportedLanguage(rel));
        }

        let abs = self.root.join(&rel);
        let source = fs::read_to_string(&abs).map_err(|e| ResolutionError::Io {
            path: abs.clone(),
            message: e.to_string(),
        })?;
        let parsed = extract(&rel, &source)?;

        Ok(Loaded { rel, source, parsed })
    }

    fn existing(&self, loaded: &Loaded, symbols: &[&str]) -> TestResolution {
        find_existing_tests(&self.root, loaded.parsed.language, &loaded.rel, &loaded.source, symbols)
    }
}

/// `test_*.py`, `*_test.py`, `*_tests.rs`, `conftest.py`.
fn is_test_file(path: &Path) -> bool {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    stem.starts_with("test_") || stem.ends_with("_test") || stem.ends_with("_tests") || stem == "conftest"
}
