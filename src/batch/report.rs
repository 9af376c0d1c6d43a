//! Batch results: serializable summary plus a Markdown rendering.

use std::fmt::Write;
use std::time::Duration;

use serde::Serialize;

use crate::coverage::model::{percent, CoverageReport, CoverageSummary};
use crate::coverage::report::render_markdown as render_coverage_markdown;
use crate::repair::session::{RepairSession, SessionSummary, TerminalStatus};

/// Coverage ratios before and after the batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageDelta {
    pub baseline: CoverageSummary,
    pub current: CoverageSummary,
    pub delta: CoverageSummary,
}

impl CoverageDelta {
    pub fn new(baseline: &CoverageSummary, current: &CoverageSummary) -> Self {
        Self {
            baseline: *baseline,
            current: *current,
            delta: current.delta_from(baseline),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    AllAccepted,
    Partial,
    NoneAccepted,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub sessions: Vec<SessionSummary>,
    pub accepted: usize,
    pub exhausted: usize,
    pub abandoned: usize,
    pub coverage: CoverageReport,
    pub coverage_summary: CoverageSummary,
    pub delta: Option<CoverageDelta>,
    pub elapsed_ms: u64,
    pub cancelled: bool,

    /// Full sessions, in target order, for callers that need the accepted
    /// test sources.
    #[serde(skip)]
    pub runs: Vec<RepairSession>,
}

impl BatchReport {
    pub fn new(
        runs: Vec<RepairSession>,
        coverage: CoverageReport,
        delta: Option<CoverageDelta>,
        elapsed: Duration,
        cancelled: bool,
    ) -> Self {
        let sessions: Vec<SessionSummary> = runs.iter().map(RepairSession::summary).collect();
        let count = |pred: fn(&TerminalStatus) -> bool| sessions.iter().filter(|s| pred(&s.status)).count();

        Self {
            accepted: count(|s| matches!(s, TerminalStatus::Accepted { .. })),
            exhausted: count(|s| matches!(s, TerminalStatus::ExhaustedRetries)),
            abandoned: count(|s| matches!(s, TerminalStatus::Abandoned { .. })),
            coverage_summary: coverage.summary(),
            coverage,
            delta,
            elapsed_ms: elapsed.as_millis() as u64,
            cancelled,
            sessions,
            runs,
        }
    }

    pub fn outcome(&self) -> BatchOutcome {
        if self.accepted == self.sessions.len() {
            BatchOutcome::AllAccepted
        } else if self.accepted > 0 {
            BatchOutcome::Partial
        } else {
            BatchOutcome::NoneAccepted
        }
    }

    pub fn session(&self, target_id: &str) -> Option<&RepairSession> {
        self.runs.iter().find(|s| s.target_id == target_id)
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# unitforge batch report");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} targets: {} accepted, {} exhausted, {} abandoned ({} ms){}",
            self.sessions.len(),
            self.accepted,
            self.exhausted,
            self.abandoned,
            self.elapsed_ms,
            if self.cancelled { ", cancelled" } else { "" }
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "## Targets");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Target | Status | Attempts | Last outcome |");
        let _ = writeln!(out, "|---|---|---:|---|");
        for s in &self.sessions {
            let last = s
                .attempts
                .last()
                .map(|a| a.outcome.to_string())
                .unwrap_or_else(|| "-".into());
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} |",
                s.target_id,
                escape_cell(&s.status.to_string()),
                s.attempts.len(),
                last
            );
        }
        let _ = writeln!(out);

        if !self.coverage.is_empty() {
            let _ = writeln!(out, "## Coverage");
            let _ = writeln!(out);
            out.push_str(&render_coverage_markdown(&self.coverage));
            let _ = writeln!(out);
        }

        if let Some(d) = &self.delta {
            let _ = writeln!(out, "## Change from baseline");
            let _ = writeln!(out);
            let _ = writeln!(out, "| Metric | Baseline | Now | Delta |");
            let _ = writeln!(out, "|---|---:|---:|---:|");
            for (name, base, now, delta) in [
                ("line", d.baseline.line, d.current.line, d.delta.line),
                ("branch", d.baseline.branch, d.current.branch, d.delta.branch),
                ("instruction", d.baseline.instruction, d.current.instruction, d.delta.instruction),
                ("method", d.baseline.method, d.current.method, d.delta.method),
                ("class", d.baseline.class, d.current.class, d.delta.class),
            ] {
                let _ = writeln!(
                    out,
                    "| {name} | {} | {} | {:+.2} pp |",
                    percent(base),
                    percent(now),
                    delta * 100.0
                );
            }
        }

        out
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}
