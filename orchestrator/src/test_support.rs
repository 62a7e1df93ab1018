//! Shared doubles for unit and integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::analysis::backend::{BackendError, CompletionBackend};
use crate::config::OrchestratorConfig;
use crate::registry::SessionRegistry;
use crate::remote::{RemoteError, RemoteJobService, RemoteJobStatus};
use crate::store::LogStore;

/// Temp-dir workspace with timings tuned for tests (no retry backoff,
/// short terminate grace, no confirm delay).
pub struct TestWorkspace {
    pub temp: tempfile::TempDir,
    pub store: LogStore,
    pub registry: SessionRegistry,
    pub config: OrchestratorConfig,
}

impl TestWorkspace {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = LogStore::new(temp.path());
        let mut config = OrchestratorConfig::default();
        config.submit.terminate_grace_secs = 1;
        config.remote.confirm_delay_secs = 0;
        config.ai.max_retries = 3;
        config.ai.retry_base_delay_secs = 0;
        Self {
            temp,
            store,
            registry: SessionRegistry::new(),
            config,
        }
    }
}

/// One scripted reply from the fake completion backend.
pub enum ScriptedResponse {
    Text(String),
    Overloaded,
    Fail(String),
}

/// Completion backend that replays a script and records every prompt.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![ScriptedResponse::Text(text.to_string())])
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        match self.responses.lock().expect("responses lock").pop_front() {
            Some(ScriptedResponse::Text(text)) => Ok(text),
            Some(ScriptedResponse::Overloaded) => Err(BackendError::Overloaded { status: 503 }),
            Some(ScriptedResponse::Fail(body)) => Err(BackendError::Http { status: 400, body }),
            None => Err(BackendError::Http {
                status: 500,
                body: "script exhausted".to_string(),
            }),
        }
    }
}

/// Job service double: records cancel calls, replays a status script.
pub struct ScriptedRemote {
    pub cancel_ok: bool,
    cancel_calls: Mutex<Vec<String>>,
    statuses: Mutex<VecDeque<RemoteJobStatus>>,
}

impl ScriptedRemote {
    pub fn new(cancel_ok: bool, statuses: Vec<RemoteJobStatus>) -> Self {
        Self {
            cancel_ok,
            cancel_calls: Mutex::new(Vec::new()),
            statuses: Mutex::new(statuses.into()),
        }
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.cancel_calls.lock().expect("calls lock").clone()
    }
}

impl RemoteJobService for ScriptedRemote {
    fn cancel(&self, job_id: &str) -> Result<(), RemoteError> {
        self.cancel_calls
            .lock()
            .expect("calls lock")
            .push(job_id.to_string());
        if self.cancel_ok {
            Ok(())
        } else {
            Err(RemoteError::Http {
                status: 502,
                body: "upstream unreachable".to_string(),
            })
        }
    }

    fn status(&self, _job_id: &str) -> Result<RemoteJobStatus, RemoteError> {
        self.statuses
            .lock()
            .expect("statuses lock")
            .pop_front()
            .ok_or_else(|| RemoteError::Http {
                status: 504,
                body: "status script exhausted".to_string(),
            })
    }
}
