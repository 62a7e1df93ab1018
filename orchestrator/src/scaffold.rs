//! Scaffolding: seed a step's code file from the debug template.

use std::path::PathBuf;

use tracing::{info, instrument};

use crate::error::OrchestratorError;
use crate::session::SessionKey;
use crate::store::LogStore;

const DEBUG_TEMPLATE: &str = include_str!("templates/debug_template.py");

/// Create the code file for a step from the starter template.
///
/// Refuses to overwrite: an existing file may hold a human's or the
/// reviewer's edits, and scaffolding must never destroy those.
#[instrument(skip_all, fields(key = %key, competition_id))]
pub fn scaffold(
    store: &LogStore,
    competition_id: &str,
    key: &SessionKey,
) -> Result<PathBuf, OrchestratorError> {
    key.validate().map_err(OrchestratorError::InvalidKey)?;

    let path = store.code_path(competition_id, key);
    if path.exists() {
        return Err(OrchestratorError::ScaffoldExists(path));
    }
    let path = store
        .write_code(competition_id, key, DEBUG_TEMPLATE)
        .map_err(|e| OrchestratorError::Storage(format!("{e:#}")))?;
    info!(path = %path.display(), "scaffolded debug script");
    Ok(path)
}
