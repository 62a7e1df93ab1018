//! Remote cancellation confirmation against a scripted job service.

use std::io::Write;
use std::time::Duration;

use orchestrator::cancel::{CancelOutcome, CancellationCoordinator};
use orchestrator::remote::{RemoteJobService, RemoteJobStatus};
use orchestrator::session::SessionKey;
use orchestrator::test_support::{ScriptedRemote, TestWorkspace};

const JOB_ID: &str = "3f2a9c10-77b4-4e1d-9a64-d6b7e9c01a2f";

fn seed_raw_log(ws: &TestWorkspace, key: &SessionKey) {
    let mut f = ws.store.create_raw_log(key).expect("raw log");
    writeln!(f, "uploading bundle").expect("write");
    writeln!(f, "Job ID: {JOB_ID}").expect("write");
}

fn coordinator<'a>(
    ws: &'a TestWorkspace,
    remote: &'a ScriptedRemote,
) -> CancellationCoordinator<'a> {
    CancellationCoordinator::new(
        &ws.store,
        &ws.registry,
        Some(remote as &dyn RemoteJobService),
        Duration::from_secs(1),
        Duration::from_millis(0),
    )
}

#[test]
fn terminal_remote_status_confirms_cancellation() {
    let ws = TestWorkspace::new();
    let key = SessionKey::new("row", 0);
    seed_raw_log(&ws, &key);
    let remote = ScriptedRemote::new(true, vec![RemoteJobStatus::Cancelled]);

    let outcome = coordinator(&ws, &remote).cancel(&key).expect("cancel");
    match outcome {
        CancelOutcome::Confirmed { detail, caveat } => {
            assert!(detail.contains(JOB_ID));
            assert!(detail.contains("cancelled"));
            assert_eq!(caveat, None);
        }
        other => panic!("expected confirmed, got {other:?}"),
    }
    assert_eq!(remote.cancel_calls(), vec![JOB_ID.to_string()]);
}

#[test]
fn non_terminal_remote_status_is_a_warning() {
    let ws = TestWorkspace::new();
    let key = SessionKey::new("row", 0);
    seed_raw_log(&ws, &key);
    let remote = ScriptedRemote::new(true, vec![RemoteJobStatus::Running]);

    match coordinator(&ws, &remote).cancel(&key).expect("cancel") {
        CancelOutcome::Warning { reason } => {
            assert!(reason.contains("do not re-run"));
            assert!(reason.contains(JOB_ID));
        }
        other => panic!("expected warning, got {other:?}"),
    }
}

#[test]
fn failed_cancel_request_is_a_warning() {
    let ws = TestWorkspace::new();
    let key = SessionKey::new("row", 0);
    seed_raw_log(&ws, &key);
    let remote = ScriptedRemote::new(false, vec![]);

    match coordinator(&ws, &remote).cancel(&key).expect("cancel") {
        CancelOutcome::Warning { reason } => {
            assert!(reason.contains("failed to cancel"));
            assert!(reason.contains("check manually"));
        }
        other => panic!("expected warning, got {other:?}"),
    }
}

#[test]
fn unverifiable_status_after_cancel_is_a_warning() {
    let ws = TestWorkspace::new();
    let key = SessionKey::new("row", 0);
    seed_raw_log(&ws, &key);
    // Cancel succeeds but the status script is empty, so the check errors.
    let remote = ScriptedRemote::new(true, vec![]);

    match coordinator(&ws, &remote).cancel(&key).expect("cancel") {
        CancelOutcome::Warning { reason } => {
            assert!(reason.contains("could not be verified"));
        }
        other => panic!("expected warning, got {other:?}"),
    }
}

#[test]
fn completed_job_also_counts_as_terminal() {
    let ws = TestWorkspace::new();
    let key = SessionKey::new("row", 0);
    seed_raw_log(&ws, &key);
    let remote = ScriptedRemote::new(true, vec![RemoteJobStatus::Completed]);

    let outcome = coordinator(&ws, &remote).cancel(&key).expect("cancel");
    assert!(outcome.is_confirmed());
}
