mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::*;
use unitforge::error::BackendError;
use unitforge::repair::{AbandonReason, LoopEvent, LoopState, TerminalStatus};
use unitforge::verify::DiagnosticKind;

#[tokio::test]
async fn accepted_on_first_attempt() {
    let fx = Fixture::rust();
    let cfg = fx.config();
    let backend = FakeBackend::always(passing());
    let toolchain = FakeToolchain::new(Duration::ZERO);

    let repair = repair_loop(&cfg, fx.root(), backend.clone(), toolchain.clone());
    let session = repair.run(&fx.target("add"), &CancellationToken::new()).await;

    assert_eq!(session.status, Some(TerminalStatus::Accepted { attempt: 1 }));
    assert_eq!(session.history.len(), 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 1);
    assert!(session.accepted().unwrap().source.contains("assert_eq!(2 + 2, 4)"));
    assert_eq!(fx.leftover_scratch(), 0);
}

#[tokio::test]
async fn two_compile_errors_then_success() {
    let fx = Fixture::rust();
    let cfg = fx.config();
    let backend = FakeBackend::scripted(vec![
        Ok(reply(BREAKS_COMPILE)),
        Ok(reply(BREAKS_COMPILE)),
        Ok(passing()),
    ]);
    let toolchain = FakeToolchain::new(Duration::ZERO);

    let repair = repair_loop(&cfg, fx.root(), backend.clone(), toolchain);
    let session = repair.run(&fx.target("add"), &CancellationToken::new()).await;

    assert_eq!(session.status, Some(TerminalStatus::Accepted { attempt: 3 }));
    let kinds: Vec<DiagnosticKind> = session.history.iter().map(|a| a.diagnostic.kind).collect();
    assert_eq!(
        kinds,
        vec![DiagnosticKind::CompileError, DiagnosticKind::CompileError, DiagnosticKind::Success]
    );

    // both failures were folded into the third prompt, in attempt order
    let prompts = backend.prompts.lock().unwrap();
    let third = &prompts[2].user;
    let first_fold = third.find("E0425").expect("compile error folded");
    assert!(third[first_fold + 1..].contains("E0425"));

    let lineage = &session.history[2].candidate.lineage;
    assert_eq!(lineage.folded_attempts, vec![1, 2]);
    assert_eq!(lineage.parent, Some(session.history[1].candidate.id));
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let fx = Fixture::rust();
    let mut cfg = fx.config();
    cfg.max_attempts = 4;
    let backend = FakeBackend::always(reply(FAILS_ASSERT));
    let toolchain = FakeToolchain::new(Duration::ZERO);

    let repair = repair_loop(&cfg, fx.root(), backend.clone(), toolchain.clone());
    let session = repair.run(&fx.target("sub"), &CancellationToken::new()).await;

    assert_eq!(session.status, Some(TerminalStatus::ExhaustedRetries));
    let attempts: Vec<u32> = session.history.iter().map(|a| a.candidate.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
    assert!(session
        .history
        .iter()
        .all(|a| a.diagnostic.kind == DiagnosticKind::AssertionFailure));
    assert_eq!(toolchain.executions.load(Ordering::SeqCst), 4);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn transient_generation_errors_do_not_spend_attempts() {
    let fx = Fixture::rust();
    let cfg = fx.config();
    let backend = FakeBackend::scripted(vec![
        Err(BackendError::RateLimited("slow down".into())),
        Err(BackendError::Transport("reset".into())),
        Ok(passing()),
    ]);
    let toolchain = FakeToolchain::new(Duration::ZERO);

    let repair = repair_loop(&cfg, fx.root(), backend.clone(), toolchain);
    let session = repair.run(&fx.target("add"), &CancellationToken::new()).await;

    assert_eq!(session.status, Some(TerminalStatus::Accepted { attempt: 1 }));
    assert_eq!(session.generation_retries, 2);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rejected_request_abandons_without_retry() {
    let fx = Fixture::rust();
    let cfg = fx.config();
    let backend = FakeBackend::scripted(vec![Err(BackendError::Rejected {
        status: 401,
        message: "bad key".into(),
    })]);
    let toolchain = FakeToolchain::new(Duration::ZERO);

    let repair = repair_loop(&cfg, fx.root(), backend.clone(), toolchain.clone());
    let session = repair.run(&fx.target("add"), &CancellationToken::new()).await;

    assert!(matches!(
        session.status,
        Some(TerminalStatus::Abandoned {
            reason: AbandonReason::NonRetryableGeneration(_)
        })
    ));
    assert!(session.history.is_empty());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(toolchain.compiles.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_mid_compile_abandons_and_cleans_up() {
    let fx = Fixture::rust();
    let cfg = fx.config();
    let backend = FakeBackend::always(passing());
    let toolchain = FakeToolchain::new(Duration::from_secs(30));

    let repair = repair_loop(&cfg, fx.root(), backend, toolchain);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let session = tokio::time::timeout(Duration::from_secs(10), repair.run(&fx.target("add"), &cancel))
        .await
        .expect("loop honours cancellation");

    assert_eq!(
        session.status,
        Some(TerminalStatus::Abandoned {
            reason: AbandonReason::Cancelled
        })
    );
    assert_eq!(fx.leftover_scratch(), 0);
}

#[tokio::test]
async fn publishes_state_transitions() {
    let fx = Fixture::rust();
    let cfg = fx.config();
    let backend = FakeBackend::scripted(vec![Ok(reply(FAILS_ASSERT)), Ok(passing())]);
    let toolchain = FakeToolchain::new(Duration::ZERO);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let repair = repair_loop(&cfg, fx.root(), backend, toolchain).with_events(tx);
    repair.run(&fx.target("add"), &CancellationToken::new()).await;
    drop(repair);

    let mut states = Vec::new();
    while let Some(ev) = rx.recv().await {
        if let LoopEvent::State { state, .. } = ev {
            states.push(state);
        }
    }

    assert_eq!(
        states,
        vec![
            LoopState::Generating,
            LoopState::Verifying,
            LoopState::Regenerating,
            LoopState::Generating,
            LoopState::Verifying,
            LoopState::Accepted,
        ]
    );
}

#[tokio::test]
async fn coverage_is_attached_to_accepted_session() {
    let fx = Fixture::rust();
    let mut cfg = fx.config();
    cfg.collect_coverage = true;
    let backend = FakeBackend::always(passing());
    let toolchain = FakeToolchain::new(Duration::ZERO);

    let repair = repair_loop(&cfg, fx.root(), backend, toolchain.clone());
    let session = repair.run(&fx.target("add"), &CancellationToken::new()).await;

    assert!(session.is_accepted());
    let coverage = session.coverage.expect("coverage collected");
    assert_eq!(coverage.summary().line, 1.0);
    // test run plus coverage run
    assert_eq!(toolchain.executions.load(Ordering::SeqCst), 2);
    // the record was written inside the scratch area, never the project
    assert!(!fx.root().join(".unitforge").exists());
}

#[tokio::test]
async fn run_past_the_suite_timeout_is_a_timeout() {
    let fx = Fixture::rust();
    let mut cfg = fx.config();
    cfg.max_attempts = 1;
    cfg.per_suite_timeout_ms = 200;
    let toolchain = FakeToolchain::with_delays(Duration::ZERO, Duration::from_secs(30));

    let repair = repair_loop(&cfg, fx.root(), FakeBackend::always(passing()), toolchain);
    let session = tokio::time::timeout(
        Duration::from_secs(10),
        repair.run(&fx.target("add"), &CancellationToken::new()),
    )
    .await
    .expect("suite timeout enforced");

    assert_eq!(session.status, Some(TerminalStatus::ExhaustedRetries));
    let diagnostic = &session.history[0].diagnostic;
    assert_eq!(diagnostic.kind, DiagnosticKind::Timeout);
    assert!(diagnostic.message.contains("test execution"));
    assert_eq!(fx.leftover_scratch(), 0);
}
