//! AnalysisPipeline: turn a completed run into a persisted analysis record.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::analysis::backend::{CompletionBackend, complete_with_retry};
use crate::analysis::extract::parse_analysis;
use crate::analysis::prompt::PromptInputs;
use crate::analysis::record::{AccuracyScore, AnalysisRecord, StoredAnalysis};
use crate::analysis::syntax::check_python_syntax;
use crate::cancel::{CancelOutcome, CancellationCoordinator};
use crate::config::AiConfig;
use crate::error::OrchestratorError;
use crate::session::SessionKey;
use crate::store::{LogStore, ResultRecord};

/// Orchestrates prompt assembly, the backend round-trip, salvage parsing,
/// and persistence for one debug step.
pub struct AnalysisPipeline<'a> {
    store: &'a LogStore,
    ai: &'a AiConfig,
}

impl<'a> AnalysisPipeline<'a> {
    pub fn new(store: &'a LogStore, ai: &'a AiConfig) -> Self {
        Self { store, ai }
    }

    /// Analyze a completed run and persist the verdict.
    ///
    /// Requires a result record on disk; a run that has not completed yet
    /// returns [`OrchestratorError::ResultNotReady`]. The persisted record
    /// is write-once per step: callers invoke this exactly once after
    /// completion.
    #[instrument(skip_all, fields(key = %key, backend = backend.name()))]
    pub fn analyze(
        &self,
        backend: &dyn CompletionBackend,
        competition_id: &str,
        key: &SessionKey,
        submitted_code: &str,
        hypothesis: &str,
    ) -> Result<StoredAnalysis, OrchestratorError> {
        key.validate().map_err(OrchestratorError::InvalidKey)?;

        let result = self
            .store
            .load_result(key)
            .ok_or_else(|| OrchestratorError::ResultNotReady {
                key: key.to_string(),
            })?;

        let inputs =
            PromptInputs::gather(self.store, competition_id, key, submitted_code, hypothesis, &result)?;
        let prompt = inputs
            .build_prompt()
            .map_err(|e| OrchestratorError::Storage(format!("{e:#}")))?;

        let completion = complete_with_retry(
            backend,
            &prompt,
            self.ai.max_retries,
            Duration::from_secs(self.ai.retry_base_delay_secs),
        )
        .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        let mut stored = parse_analysis(&completion);
        apply_score_fallback(&mut stored, hypothesis);

        if let Some(code) = stored.record().and_then(|r| r.fixed_code.as_deref())
            && let Err(e) = check_python_syntax(code)
        {
            // Persist anyway; a near-miss fix is still useful to a human.
            warn!(key = %key, err = %e, "proposed fixed_code has a syntax defect");
        }

        self.store
            .write_analysis(key, &stored)
            .map_err(|e| OrchestratorError::Storage(format!("{e:#}")))?;
        info!(key = %key, tier = tier_label(&stored), "analysis persisted");
        Ok(stored)
    }

    /// Close a step whose bug never reproduced, without consulting the
    /// reviewer. Refuses to write anything unless cancellation reached a
    /// confirmed state first: a placeholder result racing a still-live run
    /// would corrupt the step's artifacts.
    #[instrument(skip_all, fields(key = %key))]
    pub fn mark_no_reproduction(
        &self,
        cancel: &CancellationCoordinator<'_>,
        key: &SessionKey,
    ) -> Result<CancelOutcome, OrchestratorError> {
        key.validate().map_err(OrchestratorError::InvalidKey)?;

        let outcome = cancel.cancel(key)?;
        match &outcome {
            CancelOutcome::Warning { reason } => {
                return Err(OrchestratorError::CancelUnconfirmed(reason.clone()));
            }
            CancelOutcome::Confirmed { .. } => {}
        }

        self.store
            .write_result(key, &ResultRecord::no_reproduction_placeholder())
            .map_err(|e| OrchestratorError::Storage(format!("{e:#}")))?;
        self.store
            .write_analysis(
                key,
                &StoredAnalysis::WellFormed {
                    record: AnalysisRecord::no_reproduction(),
                },
            )
            .map_err(|e| OrchestratorError::Storage(format!("{e:#}")))?;
        info!(key = %key, "step closed as not reproducible");
        Ok(outcome)
    }
}

/// Without an operator hypothesis the reviewer tends to omit the accuracy
/// field entirely; pin it to `Partial` so the repaired record does not claim
/// less than the run demonstrated.
fn apply_score_fallback(stored: &mut StoredAnalysis, hypothesis: &str) {
    if !hypothesis.trim().is_empty() {
        return;
    }
    if let StoredAnalysis::Repaired { record, filled } = stored
        && filled.iter().any(|f| f == "accuracy")
    {
        record.accuracy = AccuracyScore::Partial;
    }
}

fn tier_label(stored: &StoredAnalysis) -> &'static str {
    match stored {
        StoredAnalysis::WellFormed { .. } => "well_formed",
        StoredAnalysis::Repaired { .. } => "repaired",
        StoredAnalysis::Degraded { .. } => "degraded",
    }
}
