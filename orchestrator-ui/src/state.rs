//! Shared application state for the orchestrator server.

use std::path::PathBuf;
use std::sync::Arc;

use orchestrator::config::OrchestratorConfig;
use orchestrator::registry::SessionRegistry;
use orchestrator::store::LogStore;

/// Shared state accessible from all request handlers.
///
/// The registry must be this process-wide instance: it is the only holder
/// of live child handles, and a per-request registry would orphan every
/// launched process immediately.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LogStore>,
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<OrchestratorConfig>,
}

impl AppState {
    pub fn new(root: PathBuf, config: OrchestratorConfig) -> Self {
        Self {
            store: Arc::new(LogStore::new(root)),
            registry: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
        }
    }
}
