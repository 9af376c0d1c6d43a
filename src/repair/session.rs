//! repair/session.rs
//!
//! Per-target repair state and its serializable summary.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::coverage::model::{CoverageReport, CoverageSummary};
use crate::resolve::GenerationTarget;
use crate::testgen::candidate::TestCandidate;
use crate::verify::diagnostic::{Diagnostic, DiagnosticKind};

/// One generate/verify cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub candidate: TestCandidate,
    pub diagnostic: Diagnostic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbandonReason {
    /// Backend refused the request in a way retrying cannot fix
    NonRetryableGeneration(String),
    /// Transient generation failures outlasted the retry budget
    GenerationRetriesExhausted(String),
    /// The target could not be resolved
    Resolution(String),
    Cancelled,
    /// Scratch, toolchain spawn, or a crashed loop
    Infrastructure(String),
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonRetryableGeneration(m) => write!(f, "generation rejected: {m}"),
            Self::GenerationRetriesExhausted(m) => write!(f, "generation retries exhausted: {m}"),
            Self::Resolution(m) => write!(f, "resolution failed: {m}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Infrastructure(m) => write!(f, "infrastructure failure: {m}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalStatus {
    Accepted { attempt: u32 },
    ExhaustedRetries,
    Abandoned { reason: AbandonReason },
}

impl TerminalStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { attempt } => write!(f, "accepted (attempt {attempt})"),
            Self::ExhaustedRetries => f.write_str("exhausted retries"),
            Self::Abandoned { reason } => write!(f, "abandoned: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepairSession {
    pub target_id: String,
    /// `None` when the target never resolved
    pub target: Option<GenerationTarget>,
    /// Ordered by attempt number, strictly increasing
    pub history: Vec<Attempt>,
    pub status: Option<TerminalStatus>,
    pub coverage: Option<CoverageReport>,
    pub coverage_error: Option<String>,
    pub generation_retries: u32,
    started: Instant,
    elapsed: Option<Duration>,
}

impl RepairSession {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            target: None,
            history: Vec::new(),
            status: None,
            coverage: None,
            coverage_error: None,
            generation_retries: 0,
            started: Instant::now(),
            elapsed: None,
        }
    }

    pub fn for_target(target: &GenerationTarget) -> Self {
        let mut s = Self::new(&target.id);
        s.target = Some(target.clone());
        s
    }

    /// A session that never ran (resolution failure, crashed task).
    pub fn abandoned(target_id: impl Into<String>, reason: AbandonReason) -> Self {
        let mut s = Self::new(target_id);
        s.finish(TerminalStatus::Abandoned { reason });
        s
    }

    /// Last attempt number used, 0 before the first.
    pub fn attempt(&self) -> u32 {
        self.history.last().map_or(0, |a| a.candidate.attempt)
    }

    pub(crate) fn record(&mut self, candidate: TestCandidate, diagnostic: Diagnostic) {
        debug_assert!(candidate.attempt > self.attempt(), "attempt numbers must increase");
        self.history.push(Attempt {
            candidate,
            diagnostic,
        });
    }

    pub(crate) fn finish(&mut self, status: TerminalStatus) {
        self.status = Some(status);
        self.elapsed = Some(self.started.elapsed());
    }

    pub fn is_accepted(&self) -> bool {
        self.status.as_ref().is_some_and(TerminalStatus::is_accepted)
    }

    /// The accepted test, if any.
    pub fn accepted(&self) -> Option<&TestCandidate> {
        match self.status {
            Some(TerminalStatus::Accepted { attempt }) => self
                .history
                .iter()
                .find(|a| a.candidate.attempt == attempt)
                .map(|a| &a.candidate),
            _ => None,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            target_id: self.target_id.clone(),
            status: self.status.clone().unwrap_or(TerminalStatus::Abandoned {
                reason: AbandonReason::Infrastructure("loop did not finish".into()),
            }),
            attempts: self
                .history
                .iter()
                .map(|a| AttemptSummary {
                    attempt: a.candidate.attempt,
                    candidate_id: a.candidate.id.simple().to_string(),
                    prompt_hash: a.candidate.lineage.prompt_hash.clone(),
                    outcome: a.diagnostic.kind,
                    detail: a.diagnostic.headline(),
                })
                .collect(),
            generation_retries: self.generation_retries,
            coverage: self.coverage.as_ref().map(CoverageReport::summary),
            coverage_error: self.coverage_error.clone(),
            elapsed_ms: self.elapsed.unwrap_or_else(|| self.started.elapsed()).as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub attempt: u32,
    pub candidate_id: String,
    pub prompt_hash: String,
    pub outcome: DiagnosticKind,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub target_id: String,
    pub status: TerminalStatus,
    pub attempts: Vec<AttemptSummary>,
    pub generation_retries: u32,
    pub coverage: Option<CoverageSummary>,
    pub coverage_error: Option<String>,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testgen::candidate::PromptLineage;

    fn candidate(n: u32) -> TestCandidate {
        TestCandidate::new(
            "src/a.rs::A::f",
            n,
            String::new(),
            PromptLineage {
                prompt_hash: "h".into(),
                parent: None,
                folded_attempts: vec![],
            },
        )
    }

    #[test]
    fn accepted_candidate_lookup() {
        let mut s = RepairSession::new("src/a.rs::A::f");
        s.record(candidate(1), Diagnostic::new(DiagnosticKind::CompileError, "e"));
        s.record(candidate(2), Diagnostic::success(3));
        s.finish(TerminalStatus::Accepted { attempt: 2 });

        assert!(s.is_accepted());
        assert_eq!(s.accepted().unwrap().attempt, 2);
        assert_eq!(s.attempt(), 2);

        let summary = s.summary();
        assert_eq!(summary.attempts.len(), 2);
        assert_eq!(summary.attempts[0].outcome, DiagnosticKind::CompileError);
    }

    #[test]
    fn status_serializes_with_tags() {
        let v = serde_json::to_value(TerminalStatus::Abandoned {
            reason: AbandonReason::Resolution("class `X` not found".into()),
        })
        .unwrap();
        assert_eq!(v["status"], "abandoned");
        assert_eq!(v["reason"]["kind"], "resolution");

        let v = serde_json::to_value(TerminalStatus::Accepted { attempt: 1 }).unwrap();
        assert_eq!(v, serde_json::json!({ "status": "accepted", "attempt": 1 }));
    }
}
