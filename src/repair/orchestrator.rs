//! repair/orchestrator.rs
//!
//! Generate → verify → regenerate, until accepted, out of attempts, or
//! abandoned.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::error::{GenerationError, VerifyError};
use crate::repair::policy::RetryPolicy;
use crate::repair::session::{AbandonReason, RepairSession, TerminalStatus};
use crate::resolve::GenerationTarget;
use crate::testgen::candidate::TestCandidate;
use crate::testgen::generator::CandidateGenerator;
use crate::verify::diagnostic::DiagnosticKind;
use crate::verify::pipeline::VerificationPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Generating,
    Verifying,
    Regenerating,
    Accepted,
    Exhausted,
    Abandoned,
}

/// Progress notifications, one stream shared by every loop in a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    State {
        target_id: String,
        attempt: u32,
        state: LoopState,
    },
    GenerationRetry {
        target_id: String,
        attempt: u32,
        retry: u32,
        error: String,
    },
    Verified {
        target_id: String,
        attempt: u32,
        outcome: DiagnosticKind,
    },
    Finished {
        target_id: String,
        status: TerminalStatus,
    },
}

#[derive(Clone)]
pub struct RepairLoop {
    generator: CandidateGenerator,
    pipeline: VerificationPipeline,
    policy: RetryPolicy,
    events: Option<UnboundedSender<LoopEvent>>,
}

impl RepairLoop {
    pub fn new(generator: CandidateGenerator, pipeline: VerificationPipeline, policy: RetryPolicy) -> Self {
        Self {
            generator,
            pipeline,
            policy,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive one target to a terminal status. Never returns an unfinished
    /// session.
    pub async fn run(&self, target: &GenerationTarget, cancel: &CancellationToken) -> RepairSession {
        let mut session = RepairSession::for_target(target);
        let mut attempt: u32 = 1;

        loop {
            self.state(target, attempt, LoopState::Generating);

            let candidate = match self.generate(target, &mut session, attempt, cancel).await {
                Ok(c) => c,
                Err(reason) => return self.finish(session, TerminalStatus::Abandoned { reason }),
            };

            self.state(target, attempt, LoopState::Verifying);

            let verification = match self.pipeline.verify(target, &candidate, cancel).await {
                Ok(v) => v,
                Err(VerifyError::Cancelled) => {
                    return self.finish(
                        session,
                        TerminalStatus::Abandoned {
                            reason: AbandonReason::Cancelled,
                        },
                    )
                }
                Err(e) => {
                    tracing::error!(target_id = %target.id, attempt, error = %e, "verification infrastructure failed");
                    return self.finish(
                        session,
                        TerminalStatus::Abandoned {
                            reason: AbandonReason::Infrastructure(e.to_string()),
                        },
                    );
                }
            };

            let outcome = verification.diagnostic.kind;
            self.emit(LoopEvent::Verified {
                target_id: target.id.clone(),
                attempt,
                outcome,
            });
            session.record(candidate, verification.diagnostic);

            if outcome == DiagnosticKind::Success {
                match verification.coverage {
                    Some(Ok(report)) => session.coverage = Some(report),
                    Some(Err(e)) => session.coverage_error = Some(e.to_string()),
                    None => {}
                }
                return self.finish(session, TerminalStatus::Accepted { attempt });
            }

            if attempt >= self.policy.max_attempts {
                return self.finish(session, TerminalStatus::ExhaustedRetries);
            }

            self.state(target, attempt, LoopState::Regenerating);
            let delay = self.policy.backoff(attempt);
            tracing::debug!(target_id = %target.id, attempt, outcome = %outcome, delay_ms = delay.as_millis() as u64, "regenerating");

            if !sleep_or_cancel(delay, cancel).await {
                return self.finish(
                    session,
                    TerminalStatus::Abandoned {
                        reason: AbandonReason::Cancelled,
                    },
                );
            }
            attempt += 1;
        }
    }

    /// Retries transient generation failures without spending an attempt.
    async fn generate(
        &self,
        target: &GenerationTarget,
        session: &mut RepairSession,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<TestCandidate, AbandonReason> {
        let mut retry: u32 = 0;

        loop {
            let err = match self.generator.generate(target, &session.history, attempt, cancel).await {
                Ok(candidate) => return Ok(candidate),
                Err(GenerationError::Cancelled) => return Err(AbandonReason::Cancelled),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(target_id = %target.id, attempt, error = %e, "generation rejected");
                    return Err(AbandonReason::NonRetryableGeneration(e.to_string()));
                }
                Err(e) => e,
            };

            retry += 1;
            if retry > self.policy.max_generation_retries {
                tracing::warn!(target_id = %target.id, attempt, retries = retry - 1, error = %err, "generation retries exhausted");
                return Err(AbandonReason::GenerationRetriesExhausted(err.to_string()));
            }
            session.generation_retries += 1;

            self.emit(LoopEvent::GenerationRetry {
                target_id: target.id.clone(),
                attempt,
                retry,
                error: err.to_string(),
            });
            tracing::info!(target_id = %target.id, attempt, retry, error = %err, "retrying generation");

            if !sleep_or_cancel(self.policy.backoff(retry), cancel).await {
                return Err(AbandonReason::Cancelled);
            }
        }
    }

    fn finish(&self, mut session: RepairSession, status: TerminalStatus) -> RepairSession {
        let state = match &status {
            TerminalStatus::Accepted { .. } => LoopState::Accepted,
            TerminalStatus::ExhaustedRetries => LoopState::Exhausted,
            TerminalStatus::Abandoned { .. } => LoopState::Abandoned,
        };
        tracing::info!(target_id = %session.target_id, attempts = session.attempt(), status = %status, "repair loop finished");

        self.emit(LoopEvent::State {
            target_id: session.target_id.clone(),
            attempt: session.attempt(),
            state,
        });
        self.emit(LoopEvent::Finished {
            target_id: session.target_id.clone(),
            status: status.clone(),
        });

        session.finish(status);
        session
    }

    fn state(&self, target: &GenerationTarget, attempt: u32, state: LoopState) {
        self.emit(LoopEvent::State {
            target_id: target.id.clone(),
            attempt,
            state,
        });
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// `false` if cancelled before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
