//! CancellationCoordinator: local terminate plus remote confirm-loop.
//!
//! A bare "cancel accepted" acknowledgment from the job service is not
//! trusted: the coordinator requires observing a terminal remote state
//! before declaring success, because a re-run while the remote job is still
//! mutating shared output would corrupt the next step's inputs.

use std::process::Child;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::OrchestratorError;
use crate::registry::SessionRegistry;
use crate::remote::{RemoteJobService, find_job_id};
use crate::session::SessionKey;
use crate::store::LogStore;

/// Best-effort confirmed cancellation state. Tri-state on purpose: a
/// `Warning` must never be collapsed into success, otherwise a second
/// launch can race a still-running remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Local side stopped and the remote side was observed terminal (or no
    /// remote job was ever visible). `caveat` flags the latter.
    Confirmed {
        detail: String,
        caveat: Option<String>,
    },
    /// Cancellation was driven as far as possible but the remote job's fate
    /// is unknown; the operator must verify manually before re-launching.
    Warning { reason: String },
}

impl CancelOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, CancelOutcome::Confirmed { .. })
    }
}

pub struct CancellationCoordinator<'a> {
    store: &'a LogStore,
    registry: &'a SessionRegistry,
    remote: Option<&'a dyn RemoteJobService>,
    terminate_grace: Duration,
    confirm_delay: Duration,
}

impl<'a> CancellationCoordinator<'a> {
    pub fn new(
        store: &'a LogStore,
        registry: &'a SessionRegistry,
        remote: Option<&'a dyn RemoteJobService>,
        terminate_grace: Duration,
        confirm_delay: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            remote,
            terminate_grace,
            confirm_delay,
        }
    }

    /// Drive cancellation for `key`. Idempotent: cancelling an already
    /// cancelled session is a no-op that still reports its outcome.
    #[instrument(skip_all, fields(key = %key))]
    pub fn cancel(&self, key: &SessionKey) -> Result<CancelOutcome, OrchestratorError> {
        if let Some(child) = self.registry.remove(key) {
            self.stop_local(key, child);
        }

        let raw = self
            .store
            .read_raw_log(key)
            .map_err(|e| OrchestratorError::Storage(format!("read raw log: {e:#}")))?;

        let Some(job_id) = raw.as_deref().and_then(find_job_id) else {
            // Either no remote job was ever created, or the boundary is not
            // observable from here. Nothing more to cancel on this side.
            return Ok(CancelOutcome::Confirmed {
                detail: "local process stopped".to_string(),
                caveat: Some("no remote job id found in raw log".to_string()),
            });
        };

        let Some(remote) = self.remote else {
            return Ok(CancelOutcome::Warning {
                reason: format!(
                    "remote job {job_id} appears in the raw log but no remote endpoint is \
                     configured; verify manually before re-running"
                ),
            });
        };

        if let Err(e) = remote.cancel(&job_id) {
            warn!(%job_id, err = %e, "remote cancel request failed");
            return Ok(CancelOutcome::Warning {
                reason: format!("failed to cancel remote job {job_id}: {e}; check manually"),
            });
        }

        // The acknowledgment alone is not confirmation; poll once after a
        // short delay and require a terminal state.
        thread::sleep(self.confirm_delay);
        match remote.status(&job_id) {
            Ok(status) if status.is_terminal() => {
                info!(%job_id, remote_status = status.as_str(), "cancellation confirmed");
                Ok(CancelOutcome::Confirmed {
                    detail: format!(
                        "remote job {job_id} cancelled and confirmed, status: {}",
                        status.as_str()
                    ),
                    caveat: None,
                })
            }
            Ok(status) => Ok(CancelOutcome::Warning {
                reason: format!(
                    "cancellation sent but job {job_id} still shows status {}; \
                     do not re-run until it reaches a terminal state",
                    status.as_str()
                ),
            }),
            Err(e) => Ok(CancelOutcome::Warning {
                reason: format!("cancellation sent to {job_id} but status could not be verified: {e}"),
            }),
        }
    }

    fn stop_local(&self, key: &SessionKey, mut child: Child) {
        terminate_gracefully(&child);
        match child.wait_timeout(self.terminate_grace) {
            Ok(Some(status)) => {
                debug!(%key, exit_code = ?status.code(), "local process terminated gracefully");
            }
            Ok(None) => {
                warn!(%key, "local process still alive after grace window, force-killing");
                if let Err(e) = child.kill() {
                    warn!(%key, err = %e, "force kill failed");
                }
                let _ = child.wait();
            }
            Err(e) => {
                warn!(%key, err = %e, "wait after terminate failed");
            }
        }
    }
}

/// Ask the child to shut down cleanly; the force-kill fallback happens only
/// after the grace window elapses.
#[cfg(unix)]
#[allow(unsafe_code)]
fn terminate_gracefully(child: &Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

/// Without a graceful signal the grace window simply elapses before the kill.
#[cfg(not(unix))]
fn terminate_gracefully(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::process::{Command, Stdio};

    use crate::registry::Liveness;

    fn setup() -> (tempfile::TempDir, LogStore, SessionRegistry) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = LogStore::new(temp.path());
        (temp, store, SessionRegistry::new())
    }

    fn coordinator<'a>(
        store: &'a LogStore,
        registry: &'a SessionRegistry,
        remote: Option<&'a dyn RemoteJobService>,
    ) -> CancellationCoordinator<'a> {
        CancellationCoordinator::new(
            store,
            registry,
            remote,
            Duration::from_secs(1),
            Duration::from_millis(0),
        )
    }

    #[test]
    fn cancel_without_job_id_confirms_with_caveat() {
        let (_temp, store, registry) = setup();
        let key = SessionKey::new("row", 0);
        store.create_raw_log(&key).expect("raw log");

        let outcome = coordinator(&store, &registry, None)
            .cancel(&key)
            .expect("cancel");
        match outcome {
            CancelOutcome::Confirmed { caveat, .. } => {
                assert!(caveat.expect("caveat").contains("no remote job id"));
            }
            other => panic!("expected confirmed, got {other:?}"),
        }
    }

    #[test]
    fn cancel_is_idempotent() {
        let (_temp, store, registry) = setup();
        let key = SessionKey::new("row", 0);
        store.create_raw_log(&key).expect("raw log");

        let registry_child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        registry.register(key.clone(), registry_child);

        let coordinator = coordinator(&store, &registry, None);
        let first = coordinator.cancel(&key).expect("first cancel");
        assert!(first.is_confirmed());
        assert_eq!(registry.poll(&key), Liveness::NotRegistered);

        let second = coordinator.cancel(&key).expect("second cancel");
        assert!(second.is_confirmed(), "second cancel must still succeed");
    }

    #[test]
    fn job_id_without_remote_endpoint_is_a_warning() {
        let (_temp, store, registry) = setup();
        let key = SessionKey::new("row", 0);
        let mut f = store.create_raw_log(&key).expect("raw log");
        writeln!(f, "Job ID: 3f2a9c10-77b4-4e1d-9a64-d6b7e9c01a2f").expect("write");

        let outcome = coordinator(&store, &registry, None)
            .cancel(&key)
            .expect("cancel");
        match outcome {
            CancelOutcome::Warning { reason } => {
                assert!(reason.contains("no remote endpoint"));
                assert!(reason.contains("3f2a9c10"));
            }
            other => panic!("expected warning, got {other:?}"),
        }
    }

    #[test]
    fn missing_raw_log_still_confirms() {
        let (_temp, store, registry) = setup();
        let key = SessionKey::new("row", 9);

        let outcome = coordinator(&store, &registry, None)
            .cancel(&key)
            .expect("cancel");
        assert!(outcome.is_confirmed());
    }
}
