//! Session identity and derived session state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::ResultRecord;

/// Identifies one debug iteration: a data-row plus a debug-step number.
///
/// Keys are immutable once assigned and totally order steps within a
/// data-row: step N's artifacts are read-only inputs to step N+1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub datarow_id: String,
    pub step: u32,
}

impl SessionKey {
    pub fn new(datarow_id: impl Into<String>, step: u32) -> Self {
        Self {
            datarow_id: datarow_id.into(),
            step,
        }
    }

    /// Key of the previous debug step, if any.
    pub fn prev(&self) -> Option<SessionKey> {
        self.step
            .checked_sub(1)
            .map(|step| SessionKey::new(self.datarow_id.clone(), step))
    }

    /// Reject identifiers that would escape the key-addressed file layout.
    pub fn validate(&self) -> Result<(), String> {
        if self.datarow_id.is_empty() {
            return Err("datarow_id must not be empty".to_string());
        }
        if self.datarow_id.contains(['/', '\\']) || self.datarow_id.contains("..") {
            return Err(format!(
                "datarow_id {:?} must not contain path separators",
                self.datarow_id
            ));
        }
        Ok(())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.datarow_id, self.step)
    }
}

/// Session state derived by the status reconciler. Never stored: the
/// registry hint and the file artifacts are consulted on every call.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    /// A live local submission process is registered for this key.
    Running,
    /// No live process and no valid result record yet: either output has not
    /// materialized, or the process was never tracked (e.g. after a restart).
    Processing,
    /// A well-formed result record exists on disk.
    Completed(ResultRecord),
}

impl SessionStatus {
    /// Wire label matching the HTTP API ("running" | "processing" | "completed").
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed(_) => "completed",
        }
    }
}
