//! coverage/collector.rs
//!
//! Runs a compiled test unit with the recorder enabled and decodes what it
//! wrote.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::coverage::model::CoverageReport;
use crate::coverage::record::decode;
use crate::error::{CollectionError, ToolchainError};
use crate::verify::toolchain::{bounded, Bounded, CompiledUnit, ExecOptions, Toolchain};

pub const RECORD_DIR: &str = ".unitforge";
pub const RECORD_FILE: &str = "coverage.ufcv";

/// Conventional places a recorder drops its file, searched in order.
const SEARCH_DIRS: &[&str] = &["target/unitforge", "build/unitforge", RECORD_DIR, ""];

pub fn record_path(workdir: &Path) -> PathBuf {
    workdir.join(RECORD_DIR).join(RECORD_FILE)
}

#[derive(Debug, Clone)]
pub struct CoverageCollector {
    accumulate: bool,
    suite_timeout: Duration,
}

impl CoverageCollector {
    pub fn new(accumulate: bool, suite_timeout: Duration) -> Self {
        Self {
            accumulate,
            suite_timeout,
        }
    }

    /// One collection pass over `unit`.
    pub async fn collect(
        &self,
        toolchain: &dyn Toolchain,
        unit: &CompiledUnit,
        per_test_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CoverageReport, CollectionError> {
        let path = record_path(&unit.workdir);
        prepare_record(&path, self.accumulate).map_err(|e| {
            CollectionError::InstrumentationFailure(format!("cannot prepare {}: {e}", path.display()))
        })?;

        let options = ExecOptions {
            per_test_timeout,
            coverage_file: Some(path.clone()),
        };

        let run = bounded(self.suite_timeout, cancel, |c| async move {
            toolchain.execute(unit, &options, &c).await
        })
        .await;

        let output = match run {
            Ok(Bounded::Finished(out)) => out,
            Ok(Bounded::TimedOut) => {
                return Err(CollectionError::ExecutionFailure(format!(
                    "coverage run exceeded {:?}",
                    self.suite_timeout
                )))
            }
            Err(ToolchainError::Cancelled) => return Err(CollectionError::Cancelled),
            Err(e) => return Err(CollectionError::ExecutionFailure(e.to_string())),
        };

        if !path.is_file() {
            return Err(if output.success {
                CollectionError::InstrumentationFailure(format!(
                    "runner finished but wrote no record at {}",
                    path.display()
                ))
            } else {
                CollectionError::ExecutionFailure(format!(
                    "runner exited with {:?} before writing a record",
                    output.exit_code
                ))
            });
        }

        let report = load_record(&path)?;
        if report.is_partial() {
            tracing::warn!(record = %path.display(), "coverage record truncated, using valid prefix");
        }
        Ok(report)
    }
}

/// Remove a stale record unless accumulating, and make sure the directory exists.
fn prepare_record(path: &Path, accumulate: bool) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    if !accumulate {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(record = %path.display(), "removed stale record"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Decode an existing record. The record may predate this process.
pub fn load_record(path: &Path) -> Result<CoverageReport, CollectionError> {
    let bytes = fs::read(path).map_err(|e| {
        CollectionError::InstrumentationFailure(format!("cannot read {}: {e}", path.display()))
    })?;

    let decoded = decode(&bytes)?;
    tracing::debug!(
        record = %path.display(),
        sessions = decoded.sessions.len(),
        partial = decoded.report.is_partial(),
        "decoded coverage record"
    );
    Ok(decoded.report)
}

/// First record found under the conventional locations of `project_root`.
pub fn find_record(project_root: &Path) -> Option<PathBuf> {
    SEARCH_DIRS
        .iter()
        .map(|d| project_root.join(d).join(RECORD_FILE))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::model::CoverageUnit;
    use crate::coverage::record::{encode, SessionInfo};

    fn record_bytes() -> Vec<u8> {
        let report = CoverageReport::from_units(
            vec![("src/a.rs".into(), CoverageUnit::new("a", "f", 1, 3).with_line(2, 1))],
            false,
        );
        encode(
            &SessionInfo {
                id: "s".into(),
                started_at_ms: 0,
                dumped_at_ms: 1,
            },
            &report,
        )
    }

    #[test]
    fn stale_record_removed_unless_accumulating() {
        let dir = tempfile::tempdir().unwrap();
        let path = record_path(dir.path());

        prepare_record(&path, false).unwrap();
        fs::write(&path, b"old").unwrap();

        prepare_record(&path, true).unwrap();
        assert!(path.exists());

        prepare_record(&path, false).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn finds_record_in_conventional_dirs() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_record(dir.path()), None);

        fs::create_dir_all(dir.path().join("build/unitforge")).unwrap();
        fs::write(dir.path().join(RECORD_FILE), record_bytes()).unwrap();
        fs::write(dir.path().join("build/unitforge").join(RECORD_FILE), record_bytes()).unwrap();

        let found = find_record(dir.path()).unwrap();
        assert!(found.ends_with("build/unitforge/coverage.ufcv"));
        assert!(!load_record(&found).unwrap().is_empty());
    }

    #[test]
    fn garbage_record_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.ufcv");
        fs::write(&path, b"garbage!").unwrap();
        assert!(matches!(load_record(&path), Err(CollectionError::Decode(_))));
    }
}
