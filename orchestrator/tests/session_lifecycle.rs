//! End-to-end lifecycle: launch, status reconciliation, cancellation.

use std::time::Duration;

use orchestrator::cancel::{CancelOutcome, CancellationCoordinator};
use orchestrator::error::OrchestratorError;
use orchestrator::launch::RunLauncher;
use orchestrator::session::{SessionKey, SessionStatus};
use orchestrator::status::reconcile;
use orchestrator::store::ResultRecord;
use orchestrator::test_support::TestWorkspace;

fn cancel_coordinator(ws: &TestWorkspace) -> CancellationCoordinator<'_> {
    CancellationCoordinator::new(
        &ws.store,
        &ws.registry,
        None,
        Duration::from_secs(ws.config.submit.terminate_grace_secs),
        Duration::from_secs(ws.config.remote.confirm_delay_secs),
    )
}

#[test]
fn never_launched_session_is_processing() {
    let ws = TestWorkspace::new();
    let key = SessionKey::new("row", 0);
    assert_eq!(
        reconcile(&ws.registry, &ws.store, &key),
        SessionStatus::Processing
    );
}

#[test]
fn launched_session_reports_running_until_cancelled() {
    let mut ws = TestWorkspace::new();
    ws.config.submit.command = vec!["sleep".to_string(), "30".to_string()];
    let key = SessionKey::new("row", 0);

    let launcher = RunLauncher::new(&ws.store, &ws.registry, &ws.config.submit);
    launcher.launch("comp", &key, "print('v0')").expect("launch");
    assert_eq!(
        reconcile(&ws.registry, &ws.store, &key),
        SessionStatus::Running
    );

    let outcome = cancel_coordinator(&ws).cancel(&key).expect("cancel");
    assert!(outcome.is_confirmed());
    assert_eq!(
        reconcile(&ws.registry, &ws.store, &key),
        SessionStatus::Processing,
        "no result record was ever written"
    );
}

#[test]
fn completed_status_never_regresses() {
    let ws = TestWorkspace::new();
    let key = SessionKey::new("row", 0);
    let record = ResultRecord {
        success: true,
        stdout: vec!["done".to_string()],
        exec_time: Some(2.0),
        status: None,
        message: None,
    };
    ws.store.write_result(&key, &record).expect("write result");

    for _ in 0..3 {
        assert_eq!(
            reconcile(&ws.registry, &ws.store, &key),
            SessionStatus::Completed(record.clone())
        );
    }
}

#[test]
fn failed_launch_leaves_session_processing() {
    let mut ws = TestWorkspace::new();
    ws.config.submit.command = vec!["definitely-not-a-real-binary-xyz".to_string()];
    let key = SessionKey::new("row", 0);

    let launcher = RunLauncher::new(&ws.store, &ws.registry, &ws.config.submit);
    let err = launcher.launch("comp", &key, "code").unwrap_err();
    assert!(matches!(err, OrchestratorError::Launch(_)));
    assert_eq!(
        reconcile(&ws.registry, &ws.store, &key),
        SessionStatus::Processing
    );
}

#[test]
fn cancel_twice_confirms_both_times() {
    let mut ws = TestWorkspace::new();
    ws.config.submit.command = vec!["sleep".to_string(), "30".to_string()];
    let key = SessionKey::new("row", 0);

    let launcher = RunLauncher::new(&ws.store, &ws.registry, &ws.config.submit);
    launcher.launch("comp", &key, "code").expect("launch");

    let coordinator = cancel_coordinator(&ws);
    assert!(coordinator.cancel(&key).expect("first").is_confirmed());
    assert!(coordinator.cancel(&key).expect("second").is_confirmed());
    assert!(ws.registry.is_empty());
}

#[test]
fn cancel_without_remote_job_id_reports_caveat() {
    let mut ws = TestWorkspace::new();
    ws.config.submit.command = vec!["sleep".to_string(), "30".to_string()];
    let key = SessionKey::new("row", 0);

    let launcher = RunLauncher::new(&ws.store, &ws.registry, &ws.config.submit);
    launcher.launch("comp", &key, "code").expect("launch");

    match cancel_coordinator(&ws).cancel(&key).expect("cancel") {
        CancelOutcome::Confirmed { caveat, .. } => {
            assert!(caveat.expect("caveat present").contains("no remote job id"));
        }
        other => panic!("expected confirmed, got {other:?}"),
    }
}
