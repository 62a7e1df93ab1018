//! Client for the remote GPU job service.
//!
//! The orchestrator never learns a job id directly: the submission process
//! prints it, and [`find_job_id`] scrapes it back out of the raw log. The
//! service itself exposes only idempotent cancel-by-id and an eventually
//! consistent status endpoint.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::RemoteConfig;

/// Recover the remote job id from raw submission output, e.g.
/// `Job ID: 3f2a9c10-77b4-4e1d-9a64-d6b7e9c01a2f`.
pub fn find_job_id(raw_log: &str) -> Option<String> {
    static JOB_ID_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"Job ID: ([a-f0-9-]+)").unwrap());
    JOB_ID_RE
        .captures(raw_log)
        .map(|caps| caps[1].to_string())
}

/// Status reported by the job service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobStatus {
    Pending,
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl RemoteJobStatus {
    /// Terminal states cannot resume; only these make a cancel "confirmed".
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemoteJobStatus::Cancelled | RemoteJobStatus::Completed | RemoteJobStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteJobStatus::Pending => "pending",
            RemoteJobStatus::Running => "running",
            RemoteJobStatus::Cancelled => "cancelled",
            RemoteJobStatus::Completed => "completed",
            RemoteJobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("job service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unrecognized remote status {0:?}")]
    UnknownStatus(String),
}

/// Seam for the job service so cancellation can be driven against a
/// scripted double in tests.
pub trait RemoteJobService {
    /// Idempotent cancel-by-id. Success means "request accepted", not
    /// "job stopped"; confirmation requires a terminal [`RemoteJobStatus`].
    fn cancel(&self, job_id: &str) -> Result<(), RemoteError>;

    fn status(&self, job_id: &str) -> Result<RemoteJobStatus, RemoteError>;
}

/// HTTP client for the job service (`POST /api/cancel/{id}`,
/// `GET /api/status/{id}`, bearer token auth).
pub struct HttpRemoteClient {
    client: reqwest::blocking::Client,
    base_url: String,
    token: String,
    cancel_timeout: Duration,
    status_timeout: Duration,
}

impl HttpRemoteClient {
    /// Build a client from config; `None` when the endpoint is unconfigured.
    pub fn from_config(config: &RemoteConfig) -> Option<Self> {
        let base_url = config.server_url.clone()?;
        let token = config.token.clone()?;
        Some(Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            cancel_timeout: Duration::from_secs(config.cancel_timeout_secs),
            status_timeout: Duration::from_secs(config.status_timeout_secs),
        })
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

impl RemoteJobService for HttpRemoteClient {
    #[instrument(skip_all, fields(job_id))]
    fn cancel(&self, job_id: &str) -> Result<(), RemoteError> {
        let url = format!("{}/api/cancel/{job_id}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("ngrok-skip-browser-warning", "true")
            .timeout(self.cancel_timeout)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        debug!(job_id, "remote cancel accepted");
        Ok(())
    }

    #[instrument(skip_all, fields(job_id))]
    fn status(&self, job_id: &str) -> Result<RemoteJobStatus, RemoteError> {
        let url = format!("{}/api/status/{job_id}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("ngrok-skip-browser-warning", "true")
            .timeout(self.status_timeout)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        let body: StatusResponse = resp.json()?;
        serde_json::from_value(serde_json::Value::String(body.status.clone()))
            .map_err(|_| RemoteError::UnknownStatus(body.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_job_id_in_interleaved_output() {
        let log = "submitting...\nupload ok\nJob ID: 3f2a9c10-77b4-4e1d-9a64-d6b7e9c01a2f\npolling\n";
        assert_eq!(
            find_job_id(log).as_deref(),
            Some("3f2a9c10-77b4-4e1d-9a64-d6b7e9c01a2f")
        );
    }

    #[test]
    fn missing_job_id_is_none() {
        assert_eq!(find_job_id("no identifiers here"), None);
        assert_eq!(find_job_id(""), None);
    }

    #[test]
    fn terminal_states() {
        assert!(RemoteJobStatus::Cancelled.is_terminal());
        assert!(RemoteJobStatus::Completed.is_terminal());
        assert!(RemoteJobStatus::Failed.is_terminal());
        assert!(!RemoteJobStatus::Pending.is_terminal());
        assert!(!RemoteJobStatus::Running.is_terminal());
    }
}
