//! detectors/language.rs
//!
//! Source language detection, per file and per repository.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

/// Languages with a grammar for target resolution.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Rust,
}

impl Language {
    /// Language of a single source file, by extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("rs") => Some(Language::Rust),
            Some("py") => Some(Language::Python),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Language::Rust => "rs",
            Language::Python => "py",
        }
    }

    /// Fence tag used when talking to the model.
    pub fn fence(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
        }
    }
}

/* ============================================================
   Public API
   ============================================================ */

/// Dominant supported language under `root`, if any.
pub fn detect_language(root: &Path) -> Option<Language> {
    let mut py = 0usize;
    let mut rs = 0usize;

    for entry in WalkDir::new(root)
        .max_depth(6) // enough signal, avoids full scan
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e.file_name().to_str()))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        match Language::from_path(entry.path()) {
            Some(Language::Rust) => rs += 1,
            Some(Language::Python) => py += 1,
            None => {}
        }

        // Early exit for strong Rust or Python repos
        if rs >= 10 {
            return Some(Language::Rust);
        }
        if py >= 10 {
            return Some(Language::Python);
        }
    }

    match (rs, py) {
        (0, 0) => None,
        (r, p) if r >= p => Some(Language::Rust),
        _ => Some(Language::Python),
    }
}

/// Build output, VCS metadata and virtualenvs never hold sources under test.
pub fn is_ignored_dir(name: Option<&str>) -> bool {
    matches!(
        name,
        Some("target")
            | Some("node_modules")
            | Some(".git")
            | Some(".venv")
            | Some("dist")
            | Some("build")
            | Some("__pycache__")
            | Some(".unitforge")
    )
}

/// True if any component of `path` is an ignored directory.
pub fn is_ignored(path: &Path) -> bool {
    path.components()
        .any(|c| is_ignored_dir(c.as_os_str().to_str()))
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn by_extension() {
        assert_eq!(Language::from_path(Path::new("a/b.rs")), Some(Language::Rust));
        assert_eq!(Language::from_path(Path::new("x.py")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("Main.java")), None);
    }

    #[test]
    fn ignores_build_dirs() {
        assert!(is_ignored(&PathBuf::from("target/debug/foo.rs")));
        assert!(is_ignored(&PathBuf::from("pkg/.venv/lib/x.py")));
        assert!(!is_ignored(&PathBuf::from("src/lib.rs")));
    }

    #[test]
    fn detects_majority() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "").unwrap();
        std::fs::write(dir.path().join("b.py"), "").unwrap();
        std::fs::write(dir.path().join("c.rs"), "").unwrap();
        assert_eq!(detect_language(dir.path()), Some(Language::Python));
    }
}
