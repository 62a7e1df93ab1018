//! RunLauncher: starts the local process that drives remote submission.

use std::process::{Command, Stdio};

use tracing::{info, instrument};

use crate::config::SubmitConfig;
use crate::error::OrchestratorError;
use crate::registry::SessionRegistry;
use crate::session::SessionKey;
use crate::store::LogStore;

/// Launches one submission run: persists the code, clears stale completion
/// signals, wires combined process output to the raw log, and registers the
/// handle. Non-blocking: returns once the process is spawned.
pub struct RunLauncher<'a> {
    store: &'a LogStore,
    registry: &'a SessionRegistry,
    config: &'a SubmitConfig,
}

impl<'a> RunLauncher<'a> {
    pub fn new(store: &'a LogStore, registry: &'a SessionRegistry, config: &'a SubmitConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Launch a run for `key` with the given source code.
    ///
    /// Replaces any prior handle for the same key, silently orphaning the
    /// previous process; callers must cancel first if orphaning is
    /// undesirable. On failure nothing is registered.
    #[instrument(skip_all, fields(key = %key, competition_id))]
    pub fn launch(
        &self,
        competition_id: &str,
        key: &SessionKey,
        code: &str,
    ) -> Result<(), OrchestratorError> {
        key.validate().map_err(OrchestratorError::InvalidKey)?;

        let code_path = self
            .store
            .write_code(competition_id, key, code)
            .map_err(|e| OrchestratorError::Launch(format!("{e:#}")))?;

        // A leftover result record from a previous run would read as an
        // instant (stale) completion.
        self.store
            .clear_result(key)
            .map_err(|e| OrchestratorError::Launch(format!("{e:#}")))?;

        let log_file = self
            .store
            .create_raw_log(key)
            .map_err(|e| OrchestratorError::Launch(format!("{e:#}")))?;
        let log_for_stderr = log_file
            .try_clone()
            .map_err(|e| OrchestratorError::Launch(format!("clone raw log handle: {e}")))?;

        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| OrchestratorError::Launch("submit command is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(self.store.root())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_for_stderr));

        let child = cmd
            .spawn()
            .map_err(|e| OrchestratorError::Launch(format!("spawn {program}: {e}")))?;

        info!(
            pid = child.id(),
            code_path = %code_path.display(),
            "submission process started"
        );
        self.registry.register(key.clone(), child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Liveness;

    fn setup() -> (tempfile::TempDir, LogStore, SessionRegistry) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = LogStore::new(temp.path());
        (temp, store, SessionRegistry::new())
    }

    fn submit_config(command: &[&str]) -> SubmitConfig {
        SubmitConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            terminate_grace_secs: 1,
        }
    }

    #[test]
    fn launch_registers_handle_and_writes_code() {
        let (_temp, store, registry) = setup();
        let config = submit_config(&["sleep", "5"]);
        let launcher = RunLauncher::new(&store, &registry, &config);
        let key = SessionKey::new("row", 0);

        launcher
            .launch("comp", &key, "print('hi')\n")
            .expect("launch");

        assert_eq!(registry.poll(&key), Liveness::Alive);
        let code = store.read_code("comp", &key).expect("read").expect("code");
        assert_eq!(code, "print('hi')\n");

        let mut child = registry.remove(&key).expect("handle");
        child.kill().expect("kill");
        child.wait().expect("wait");
    }

    #[test]
    fn launch_failure_registers_nothing() {
        let (_temp, store, registry) = setup();
        let config = submit_config(&["definitely-not-a-real-binary-xyz"]);
        let launcher = RunLauncher::new(&store, &registry, &config);
        let key = SessionKey::new("row", 0);

        let err = launcher.launch("comp", &key, "code").unwrap_err();
        assert!(matches!(err, OrchestratorError::Launch(_)));
        assert_eq!(registry.poll(&key), Liveness::NotRegistered);
        assert!(registry.is_empty());
    }

    #[test]
    fn launch_clears_stale_result_and_raw_log() {
        let (_temp, store, registry) = setup();
        let key = SessionKey::new("row", 0);

        store
            .write_result(&key, &crate::store::ResultRecord::no_reproduction_placeholder())
            .expect("seed result");
        {
            use std::io::Write;
            let mut f = store.create_raw_log(&key).expect("seed raw log");
            writeln!(f, "Job ID: deadbeef-0001").expect("write");
        }

        let config = submit_config(&["sleep", "1"]);
        let launcher = RunLauncher::new(&store, &registry, &config);
        launcher.launch("comp", &key, "code").expect("launch");

        assert_eq!(store.load_result(&key), None, "stale result must be gone");
        let raw = store.read_raw_log(&key).expect("read").expect("present");
        assert!(
            !raw.contains("deadbeef-0001"),
            "stale job id must not leak into the new raw log"
        );

        if let Some(mut child) = registry.remove(&key) {
            child.kill().ok();
            child.wait().ok();
        }
    }

    #[test]
    fn launch_rejects_invalid_key() {
        let (_temp, store, registry) = setup();
        let config = submit_config(&["sleep", "1"]);
        let launcher = RunLauncher::new(&store, &registry, &config);

        let err = launcher
            .launch("comp", &SessionKey::new("../escape", 0), "code")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidKey(_)));
    }
}
