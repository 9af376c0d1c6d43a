//! verify/pipeline.rs
//!
//! scratch copy → materialize → compile → execute → (coverage)
//!
//! The real project tree is only ever read. Every exit path releases the
//! scratch area, after any external process has been reaped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::coverage::collector::CoverageCollector;
use crate::coverage::model::CoverageReport;
use crate::error::{CollectionError, ToolchainError, VerifyError};
use crate::resolve::GenerationTarget;
use crate::testgen::candidate::TestCandidate;
use crate::testgen::materialize::materialize_test;
use crate::verify::diagnostic::{Diagnostic, DiagnosticKind};
use crate::verify::parse::{compile_failure, execution_outcome};
use crate::verify::scratch::ScratchArea;
use crate::verify::toolchain::{bounded, Bounded, CompiledUnit, ExecOptions, SourceSet, Toolchain};

/// Result of verifying one candidate.
#[derive(Debug)]
pub struct Verification {
    pub diagnostic: Diagnostic,
    /// `None` when coverage was not requested or the tests did not pass
    pub coverage: Option<Result<CoverageReport, CollectionError>>,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct VerificationPipeline {
    project_root: PathBuf,
    scratch_root: PathBuf,
    toolchain: Arc<dyn Toolchain>,
    collector: CoverageCollector,
    per_test_timeout: Duration,
    per_suite_timeout: Duration,
    collect_coverage: bool,
}

impl VerificationPipeline {
    pub fn new(project_root: impl Into<PathBuf>, toolchain: Arc<dyn Toolchain>, cfg: &EngineConfig) -> Self {
        Self {
            project_root: project_root.into(),
            scratch_root: cfg.scratch_root(),
            toolchain,
            collector: CoverageCollector::new(cfg.accumulate_coverage, cfg.per_suite_timeout()),
            per_test_timeout: cfg.per_test_timeout(),
            per_suite_timeout: cfg.per_suite_timeout(),
            collect_coverage: cfg.collect_coverage,
        }
    }

    pub async fn verify(
        &self,
        target: &GenerationTarget,
        candidate: &TestCandidate,
        cancel: &CancellationToken,
    ) -> Result<Verification, VerifyError> {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }
        let started = Instant::now();

        // not raced against cancel: the blocking copy must finish (and its
        // directory be owned here) before we can release it
        let (scratch, sources) = self.prepare(target, candidate).await?;

        let result = self.run(&sources, cancel).await;
        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "scratch area not fully removed");
        }

        let (diagnostic, coverage) = result?;
        tracing::info!(
            target_id = %target.id,
            attempt = candidate.attempt,
            outcome = %diagnostic.kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "verified candidate"
        );

        Ok(Verification {
            diagnostic,
            coverage,
            elapsed: started.elapsed(),
        })
    }

    async fn prepare(
        &self,
        target: &GenerationTarget,
        candidate: &TestCandidate,
    ) -> Result<(ScratchArea, SourceSet), VerifyError> {
        let scratch_root = self.scratch_root.clone();
        let project_root = self.project_root.clone();
        let target = target.clone();
        let source = candidate.source.clone();

        tokio::task::spawn_blocking(move || {
            let scratch = ScratchArea::create(&scratch_root, &project_root)?;
            let test_file = materialize_test(scratch.path(), &target, &source)?;
            let sources = SourceSet {
                language: target.language,
                workdir: scratch.path().to_path_buf(),
                test_file,
                placement: target.placement(),
            };
            Ok::<_, std::io::Error>((scratch, sources))
        })
        .await
        .map_err(|e| VerifyError::Scratch(std::io::Error::other(e)))?
        .map_err(VerifyError::Scratch)
    }

    async fn run(
        &self,
        sources: &SourceSet,
        cancel: &CancellationToken,
    ) -> Result<(Diagnostic, Option<Result<CoverageReport, CollectionError>>), VerifyError> {
        let toolchain = self.toolchain.as_ref();

        /* ---------- compile ---------- */
        let compiled = bounded(self.per_suite_timeout, cancel, |c| async move {
            toolchain.compile(sources, &c).await
        })
        .await
        .map_err(cancelled_or)?;

        match compiled {
            Bounded::TimedOut => {
                return Ok((self.timeout_diag("compilation"), None));
            }
            Bounded::Finished(out) if !out.success => {
                return Ok((compile_failure(sources.language, &out.text()), None));
            }
            Bounded::Finished(_) => {}
        }

        /* ---------- execute ---------- */
        let unit = CompiledUnit::from(sources);
        let options = ExecOptions {
            per_test_timeout: self.per_test_timeout,
            coverage_file: None,
        };

        let executed = bounded(self.per_suite_timeout, cancel, |c| {
            let (unit, options) = (&unit, &options);
            async move { toolchain.execute(unit, options, &c).await }
        })
        .await
        .map_err(cancelled_or)?;

        let diagnostic = match executed {
            Bounded::TimedOut => self.timeout_diag("test execution"),
            Bounded::Finished(out) => execution_outcome(sources.language, out.success, &out.text()),
        };

        if !diagnostic.is_success() || !self.collect_coverage {
            return Ok((diagnostic, None));
        }

        /* ---------- coverage ---------- */
        let coverage = self
            .collector
            .collect(toolchain, &unit, self.per_test_timeout, cancel)
            .await;

        match &coverage {
            Err(CollectionError::Cancelled) => return Err(VerifyError::Cancelled),
            Err(e) => tracing::warn!(error = %e, "coverage collection failed"),
            Ok(_) => {}
        }

        Ok((diagnostic, Some(coverage)))
    }

    fn timeout_diag(&self, stage: &str) -> Diagnostic {
        Diagnostic::new(
            DiagnosticKind::Timeout,
            format!("{stage} exceeded the suite timeout of {:?}", self.per_suite_timeout),
        )
    }
}

fn cancelled_or(e: ToolchainError) -> VerifyError {
    match e {
        ToolchainError::Cancelled => VerifyError::Cancelled,
        other => VerifyError::Toolchain(other),
    }
}
