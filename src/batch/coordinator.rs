//! batch/coordinator.rs
//!
//! Runs many repair loops under a shared concurrency limit and aggregates
//! their outcomes once every loop has finished.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::batch::report::{BatchReport, CoverageDelta};
use crate::config::EngineConfig;
use crate::coverage::model::CoverageReport;
use crate::error::{BatchError, ConfigError};
use crate::repair::orchestrator::RepairLoop;
use crate::repair::session::{AbandonReason, RepairSession};
use crate::resolve::{GenerationTarget, ScopeSpec, TargetResolver};

pub struct BatchCoordinator {
    repair: Arc<RepairLoop>,
    config: EngineConfig,
    project_root: PathBuf,
    cancel: CancellationToken,
    baseline: Option<CoverageReport>,
}

impl BatchCoordinator {
    pub fn new(repair: RepairLoop, config: EngineConfig, project_root: impl Into<PathBuf>) -> Self {
        Self {
            repair: Arc::new(repair),
            config,
            project_root: project_root.into(),
            cancel: CancellationToken::new(),
            baseline: None,
        }
    }

    /// Cancelling `token` stops every running loop.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_baseline(mut self, baseline: Option<CoverageReport>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    fn validate(&self, concurrency_limit: usize) -> Result<(), ConfigError> {
        self.config.validate()?;
        if concurrency_limit < 1 {
            return Err(ConfigError::invalid("concurrency_limit", "must be at least 1"));
        }
        if !self.project_root.is_dir() {
            return Err(ConfigError::ProjectRoot(self.project_root.clone()));
        }
        Ok(())
    }

    pub async fn run(
        &self,
        targets: Vec<GenerationTarget>,
        concurrency_limit: usize,
    ) -> Result<BatchReport, BatchError> {
        self.validate(concurrency_limit)?;
        Ok(self.execute(targets, Vec::new(), concurrency_limit).await)
    }

    /// Resolve each scope then run everything it yields. A scope that fails
    /// to resolve becomes an abandoned session instead of failing the batch.
    pub async fn run_scopes(
        &self,
        resolver: &TargetResolver,
        scopes: &[ScopeSpec],
        concurrency_limit: usize,
    ) -> Result<BatchReport, BatchError> {
        self.validate(concurrency_limit)?;

        let mut targets = Vec::new();
        let mut unresolved = Vec::new();
        let mut seen = HashSet::new();

        for scope in scopes {
            match resolver.resolve(scope) {
                Ok(found) => {
                    if found.is_empty() {
                        tracing::warn!(scope = %scope, "scope resolved to no targets");
                    }
                    targets.extend(found.into_iter().filter(|t| seen.insert(t.id.clone())));
                }
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "scope did not resolve");
                    unresolved.push(RepairSession::abandoned(
                        scope.to_string(),
                        AbandonReason::Resolution(e.to_string()),
                    ));
                }
            }
        }

        Ok(self.execute(targets, unresolved, concurrency_limit).await)
    }

    async fn execute(
        &self,
        targets: Vec<GenerationTarget>,
        unresolved: Vec<RepairSession>,
        concurrency_limit: usize,
    ) -> BatchReport {
        let started = Instant::now();
        let batch_cancel = self.cancel.child_token();
        let deadline = self.config.batch_deadline().map(|limit| {
            let token = batch_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!(deadline_ms = limit.as_millis() as u64, "batch deadline reached, cancelling");
                        token.cancel();
                    }
                }
            })
        });

        tracing::info!(targets = targets.len(), concurrency_limit, "batch started");

        let ids: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(concurrency_limit));
        let mut set = JoinSet::new();

        for (idx, target) in targets.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let repair = self.repair.clone();
            let cancel = batch_cancel.clone();

            set.spawn(async move {
                let session = match semaphore.acquire_owned().await {
                    Ok(_permit) => AssertUnwindSafe(repair.run(&target, &cancel))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            let msg = panic_message(panic.as_ref());
                            tracing::error!(target_id = %target.id, panic = %msg, "repair loop panicked");
                            RepairSession::abandoned(
                                &target.id,
                                AbandonReason::Infrastructure(format!("repair loop panicked: {msg}")),
                            )
                        }),
                    Err(_) => RepairSession::abandoned(
                        &target.id,
                        AbandonReason::Infrastructure("concurrency limiter closed".into()),
                    ),
                };
                (idx, session)
            });
        }

        let mut slots: Vec<Option<RepairSession>> = ids.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, session)) => slots[idx] = Some(session),
                Err(e) => tracing::error!(error = %e, "repair task lost"),
            }
        }

        if let Some(handle) = deadline {
            handle.abort();
        }

        let mut sessions: Vec<RepairSession> = slots
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| {
                slot.unwrap_or_else(|| {
                    RepairSession::abandoned(id, AbandonReason::Infrastructure("repair task lost".into()))
                })
            })
            .collect();
        sessions.extend(unresolved);

        // every loop has terminated; merge accepted coverage once
        let coverage = CoverageReport::merge_all(
            sessions
                .iter()
                .filter(|s| s.is_accepted())
                .filter_map(|s| s.coverage.as_ref()),
        );
        let delta = self
            .baseline
            .as_ref()
            .map(|baseline| CoverageDelta::new(&baseline.summary(), &coverage.summary()));

        let report = BatchReport::new(sessions, coverage, delta, started.elapsed(), batch_cancel.is_cancelled());
        tracing::info!(
            accepted = report.accepted,
            exhausted = report.exhausted,
            abandoned = report.abandoned,
            elapsed_ms = report.elapsed_ms,
            "batch finished"
        );
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
