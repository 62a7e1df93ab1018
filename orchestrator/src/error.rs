//! Failure taxonomy for the orchestrator's boundary operations.
//!
//! Failures local to one artifact (a single malformed record) never abort
//! reconciliation of other artifacts or sessions; those paths return
//! `Option`/degraded values instead of these errors. Only the variants here
//! propagate to callers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The local submission process could not be started. Fatal to that call
    /// only; no partial registration is left behind.
    #[error("launch failed: {0}")]
    Launch(String),

    /// Remote or AI network failure that exhausted its retry budget.
    #[error("transport failure: {0}")]
    Transport(String),

    /// An artifact exists on disk but cannot be used as required.
    #[error("malformed artifact {path}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    /// Analysis was requested before the step's result record materialized.
    #[error("result record for session {key} is not ready")]
    ResultNotReady { key: String },

    /// Prompt history is incomplete: a step below the current one has no
    /// analysis record, which would break the anti-regression guarantee.
    #[error("analysis history gap: step {missing} of {datarow_id} has no record")]
    HistoryGap { datarow_id: String, missing: u32 },

    /// Session key failed validation.
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    /// The no-reproduction shortcut was refused because cancellation did not
    /// reach a confirmed state.
    #[error("cancellation not confirmed: {0}")]
    CancelUnconfirmed(String),

    /// Scaffolding refused to overwrite an existing code file.
    #[error("code file already exists: {0}")]
    ScaffoldExists(PathBuf),

    /// The requested AI backend is not usable with the current configuration.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Local filesystem failure while reading or writing artifacts.
    #[error("storage failure: {0}")]
    Storage(String),
}
