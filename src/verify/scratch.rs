//! verify/scratch.rs
//!
//! Per-verification scratch copies of the project tree. The directory is
//! removed when the [`ScratchArea`] is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::detectors::language::is_ignored_dir;

#[derive(Debug)]
pub struct ScratchArea {
    dir: TempDir,
}

impl ScratchArea {
    /// Create a fresh directory under `scratch_root` holding a copy of
    /// `project_root` (build output, VCS data and the scratch root excluded).
    pub fn create(scratch_root: &Path, project_root: &Path) -> io::Result<Self> {
        fs::create_dir_all(scratch_root)?;
        let dir = tempfile::Builder::new()
            .prefix("verify-")
            .tempdir_in(scratch_root)?;

        let files = copy_tree(project_root, dir.path(), scratch_root)?;
        tracing::debug!(scratch = %dir.path().display(), files, "scratch area ready");

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove now, surfacing errors that `Drop` would swallow.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

fn copy_tree(src: &Path, dst: &Path, skip: &Path) -> io::Result<usize> {
    let skip = canonical(skip);
    let mut copied = 0;

    let walker = WalkDir::new(src).follow_links(false).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e.file_type().is_dir()
            || !(is_ignored_dir(e.file_name().to_str()) || canonical(e.path()) == skip)
    });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(r) if !r.as_os_str().is_empty() => r,
            _ => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn canonical(p: &Path) -> PathBuf {
    p.canonicalize().unwrap_or_else(|_| p.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_sources_and_cleans_up() {
        let project = tempfile::tempdir().unwrap();
        fs::create_dir_all(project.path().join("src")).unwrap();
        fs::create_dir_all(project.path().join("target/debug")).unwrap();
        fs::write(project.path().join("src/lib.rs"), "pub fn a() {}").unwrap();
        fs::write(project.path().join("target/debug/junk"), "x").unwrap();

        // scratch root nested inside the project must not be copied into itself
        let root = project.path().join("scratch");

        let scratch = ScratchArea::create(&root, project.path()).unwrap();
        let path = scratch.path().to_path_buf();

        assert!(path.join("src/lib.rs").is_file());
        assert!(!path.join("target").exists());
        assert!(!path.join("scratch").exists());

        drop(scratch);
        assert!(!path.exists());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }
}
