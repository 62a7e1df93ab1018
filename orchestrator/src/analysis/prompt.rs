//! Prompt assembly for the reviewer backend.
//!
//! The prompt carries the whole fix history so later steps cannot regress
//! earlier fixes. History is gathered strictly in step order and a missing
//! intermediate record is a hard error, not a silent gap.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::instrument;

use crate::error::OrchestratorError;
use crate::session::SessionKey;
use crate::store::{LogStore, ResultRecord};

const ANALYST_TEMPLATE: &str = include_str!("prompts/analyst.md");

/// Stdout bytes embedded in the prompt before truncation.
const STDOUT_EXCERPT_LIMIT: usize = 16 * 1024;

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("analyst", ANALYST_TEMPLATE)
        .expect("analyst template parses");
    env
});

#[derive(Debug, Serialize)]
struct HistoryEntry {
    step: u32,
    plan: String,
}

/// Everything the reviewer prompt needs, gathered from the store.
#[derive(Debug)]
pub struct PromptInputs {
    history: Vec<HistoryEntry>,
    base_code: String,
    hypothesis: String,
    result: ResultRecord,
}

impl PromptInputs {
    /// Collect prior-step analyses and the code under review.
    ///
    /// For step 0 the submitted code is reviewed as-is; for later steps the
    /// previous step's persisted code file is authoritative, since that is
    /// what actually ran.
    #[instrument(skip_all, fields(key = %key))]
    pub fn gather(
        store: &LogStore,
        competition_id: &str,
        key: &SessionKey,
        submitted_code: &str,
        hypothesis: &str,
        result: &ResultRecord,
    ) -> Result<Self, OrchestratorError> {
        let mut history = Vec::with_capacity(key.step as usize);
        for step in 0..key.step {
            let prior_key = SessionKey::new(key.datarow_id.clone(), step);
            let stored = store
                .load_analysis(&prior_key)
                .map_err(|e| OrchestratorError::Storage(format!("{e:#}")))?
                .ok_or(OrchestratorError::HistoryGap {
                    datarow_id: key.datarow_id.clone(),
                    missing: step,
                })?;
            history.push(HistoryEntry {
                step,
                plan: stored.fix_plan().to_string(),
            });
        }

        let base_code = match key.prev() {
            None => submitted_code.to_string(),
            Some(prev) => store
                .read_code(competition_id, &prev)
                .map_err(|e| OrchestratorError::Storage(format!("{e:#}")))?
                .ok_or_else(|| OrchestratorError::MalformedArtifact {
                    path: store.code_path(competition_id, &prev),
                    reason: "previous step's code file is missing".to_string(),
                })?,
        };

        Ok(Self {
            history,
            base_code,
            hypothesis: hypothesis.to_string(),
            result: result.clone(),
        })
    }

    /// Render the reviewer prompt.
    pub fn build_prompt(&self) -> Result<String> {
        let tmpl = ENV
            .get_template("analyst")
            .context("analyst template registered")?;
        tmpl.render(context! {
            hypothesis => self.hypothesis,
            history => self.history,
            result_success => self.result.success,
            result_exec_time => self.result.exec_time,
            result_stdout => self.result.excerpt(STDOUT_EXCERPT_LIMIT),
            base_code => self.base_code,
        })
        .context("render analyst prompt")
    }
}
