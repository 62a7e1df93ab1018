//! HTTP route handlers for the orchestrator API.
//!
//! The library is blocking (process spawning, blocking HTTP clients), so
//! every handler hops to `spawn_blocking` and the response shapes stay
//! JSON-stable for the frontend: `{"status": "...", ...}`.

use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use orchestrator::analysis::backend::backend_from_config;
use orchestrator::analysis::pipeline::AnalysisPipeline;
use orchestrator::cancel::{CancelOutcome, CancellationCoordinator};
use orchestrator::config::{BackendChoice, OrchestratorConfig};
use orchestrator::error::OrchestratorError;
use orchestrator::launch::RunLauncher;
use orchestrator::registry::SessionRegistry;
use orchestrator::remote::{HttpRemoteClient, RemoteJobService};
use orchestrator::scaffold::scaffold;
use orchestrator::session::{SessionKey, SessionStatus};
use orchestrator::status::reconcile;
use orchestrator::store::LogStore;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/scaffold", post(scaffold_handler))
        .route("/run", post(run_handler))
        .route("/status/{datarow_id}/{step}", get(status_handler))
        .route("/logs/{datarow_id}/{step}", get(logs_handler))
        .route(
            "/code/{competition_id}/{datarow_id}/{step}",
            get(code_handler),
        )
        .route("/cancel/{datarow_id}/{step}", post(cancel_handler))
        .route("/mark_no_repro", post(mark_no_repro_handler))
        .route("/analyze", post(analyze_handler))
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct ScaffoldRequest {
    competition_id: String,
    datarow_id: String,
    step: u32,
}

/// POST /api/scaffold - seed a step's code file from the template.
async fn scaffold_handler(
    State(state): State<AppState>,
    Json(req): Json<ScaffoldRequest>,
) -> ApiResult {
    let key = SessionKey::new(req.datarow_id, req.step);
    let outcome = blocking(move || scaffold(&state.store, &req.competition_id, &key)).await?;
    let path = outcome.map_err(error_response)?;
    Ok(Json(json!({
        "status": "success",
        "path": path.display().to_string(),
    })))
}

#[derive(Deserialize)]
struct RunRequest {
    competition_id: String,
    datarow_id: String,
    step: u32,
    code: String,
}

/// POST /api/run - persist the code and spawn the submission process.
async fn run_handler(State(state): State<AppState>, Json(req): Json<RunRequest>) -> ApiResult {
    let key = SessionKey::new(req.datarow_id, req.step);
    let outcome = blocking(move || {
        let launcher = RunLauncher::new(&state.store, &state.registry, &state.config.submit);
        launcher.launch(&req.competition_id, &key, &req.code)?;
        Ok::<_, OrchestratorError>(key)
    })
    .await?;
    let key = outcome.map_err(error_response)?;
    Ok(Json(json!({
        "status": "started",
        "message": format!("run {key} started"),
    })))
}

/// GET /api/status/:datarow/:step - derived session status.
async fn status_handler(
    State(state): State<AppState>,
    Path((datarow_id, step)): Path<(String, u32)>,
) -> ApiResult {
    let key = SessionKey::new(datarow_id, step);
    let status = blocking(move || reconcile(&state.registry, &state.store, &key)).await?;
    let body = match status {
        SessionStatus::Completed(record) => json!({
            "status": "completed",
            "data": record,
        }),
        other => json!({
            "status": other.as_str(),
            "message": "Waiting for logs...",
        }),
    };
    Ok(Json(body))
}

/// GET /api/logs/:datarow/:step - raw submission log text.
async fn logs_handler(
    State(state): State<AppState>,
    Path((datarow_id, step)): Path<(String, u32)>,
) -> Result<String, (StatusCode, Json<Value>)> {
    let key = SessionKey::new(datarow_id, step);
    let contents = blocking(move || state.store.read_raw_log(&key)).await?;
    match contents {
        Ok(Some(text)) => Ok(text),
        Ok(None) => Ok("Waiting for logs...".to_string()),
        Err(e) => Err(error_response(OrchestratorError::Storage(format!("{e:#}")))),
    }
}

/// GET /api/code/:competition/:datarow/:step - stored code file.
async fn code_handler(
    State(state): State<AppState>,
    Path((competition_id, datarow_id, step)): Path<(String, String, u32)>,
) -> Result<String, (StatusCode, Json<Value>)> {
    let key = SessionKey::new(datarow_id, step);
    let contents = blocking(move || state.store.read_code(&competition_id, &key)).await?;
    match contents {
        Ok(Some(code)) => Ok(code),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": "code file not found"})),
        )),
        Err(e) => Err(error_response(OrchestratorError::Storage(format!("{e:#}")))),
    }
}

/// POST /api/cancel/:datarow/:step - stop a run locally and remotely.
async fn cancel_handler(
    State(state): State<AppState>,
    Path((datarow_id, step)): Path<(String, u32)>,
) -> ApiResult {
    let key = SessionKey::new(datarow_id, step);
    let outcome = blocking(move || {
        let remote = HttpRemoteClient::from_config(&state.config.remote);
        coordinator(&state.store, &state.registry, remote.as_ref(), &state.config).cancel(&key)
    })
    .await?;
    let outcome = outcome.map_err(error_response)?;
    Ok(Json(outcome_body(&outcome)))
}

#[derive(Deserialize)]
struct MarkNoReproRequest {
    datarow_id: String,
    step: u32,
}

/// POST /api/mark_no_repro - close a step whose bug never reproduced.
async fn mark_no_repro_handler(
    State(state): State<AppState>,
    Json(req): Json<MarkNoReproRequest>,
) -> ApiResult {
    let key = SessionKey::new(req.datarow_id, req.step);
    let outcome = blocking(move || {
        let remote = HttpRemoteClient::from_config(&state.config.remote);
        let coordinator =
            coordinator(&state.store, &state.registry, remote.as_ref(), &state.config);
        let pipeline = AnalysisPipeline::new(&state.store, &state.config.ai);
        pipeline.mark_no_reproduction(&coordinator, &key)
    })
    .await?;
    let outcome = outcome.map_err(error_response)?;
    Ok(Json(outcome_body(&outcome)))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    competition_id: String,
    datarow_id: String,
    step: u32,
    code: String,
    #[serde(default)]
    hypothesis: String,
    #[serde(default)]
    backend: Option<String>,
}

/// POST /api/analyze - run AI analysis over a completed step.
async fn analyze_handler(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult {
    let choice = match req.backend.as_deref() {
        Some(name) => BackendChoice::parse(name).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": format!("unknown backend {name:?}")})),
            )
        })?,
        None => state.config.ai.backend,
    };
    let key = SessionKey::new(req.datarow_id, req.step);
    let outcome = blocking(move || {
        let backend = backend_from_config(&state.config.ai, choice)?;
        let pipeline = AnalysisPipeline::new(&state.store, &state.config.ai);
        pipeline.analyze(
            backend.as_ref(),
            &req.competition_id,
            &key,
            &req.code,
            &req.hypothesis,
        )
    })
    .await?;
    let stored = outcome.map_err(error_response)?;
    Ok(Json(json!({
        "status": "success",
        "data": stored,
    })))
}

fn coordinator<'a>(
    store: &'a LogStore,
    registry: &'a SessionRegistry,
    remote: Option<&'a HttpRemoteClient>,
    config: &OrchestratorConfig,
) -> CancellationCoordinator<'a> {
    CancellationCoordinator::new(
        store,
        registry,
        remote.map(|r| r as &dyn RemoteJobService),
        Duration::from_secs(config.submit.terminate_grace_secs),
        Duration::from_secs(config.remote.confirm_delay_secs),
    )
}

fn outcome_body(outcome: &CancelOutcome) -> Value {
    match outcome {
        CancelOutcome::Confirmed { detail, caveat } => json!({
            "status": "success",
            "message": detail,
            "caveat": caveat,
        }),
        CancelOutcome::Warning { reason } => json!({
            "status": "warning",
            "message": reason,
        }),
    }
}

/// Run blocking library code off the async runtime.
async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> T + Send + 'static,
) -> Result<T, (StatusCode, Json<Value>)> {
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        warn!(err = %e, "blocking task panicked or was cancelled");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": "internal task failure"})),
        )
    })
}

pub(crate) fn error_response(err: OrchestratorError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        OrchestratorError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::ScaffoldExists(_)
        | OrchestratorError::ResultNotReady { .. }
        | OrchestratorError::CancelUnconfirmed(_)
        | OrchestratorError::HistoryGap { .. } => StatusCode::CONFLICT,
        OrchestratorError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::Transport(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Launch(_)
        | OrchestratorError::MalformedArtifact { .. }
        | OrchestratorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({"status": "error", "message": err.to_string()})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_map_to_http_codes() {
        let (status, _) = error_response(OrchestratorError::InvalidKey("bad".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = error_response(OrchestratorError::ResultNotReady {
            key: "row_0".to_string(),
        });
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) =
            error_response(OrchestratorError::BackendUnavailable("no key".to_string()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = error_response(OrchestratorError::Transport("timed out".to_string()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.0["status"], "error");
    }

    #[test]
    fn cancel_outcomes_keep_the_frontend_contract() {
        let confirmed = outcome_body(&CancelOutcome::Confirmed {
            detail: "remote job x cancelled".to_string(),
            caveat: None,
        });
        assert_eq!(confirmed["status"], "success");
        assert!(confirmed["caveat"].is_null());

        let warning = outcome_body(&CancelOutcome::Warning {
            reason: "verify manually".to_string(),
        });
        assert_eq!(warning["status"], "warning");
        assert_eq!(warning["message"], "verify manually");
    }
}
