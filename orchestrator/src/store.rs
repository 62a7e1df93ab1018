//! File-backed artifact storage, keyed by session.
//!
//! Three artifact kinds live under `logs/{datarow_id}/`, one of each per
//! debug step: the raw interleaved stdout/stderr stream of the submission
//! process (`{step}.raw.log`), the structured result record written by the
//! run itself (`{step}.jsonl`), and the AI reviewer's analysis record
//! (`{step}.analysis.json`). Code files live under `code/`, named
//! `{datarow_id}_{competition_id}_{step}.py`. No component mutates another
//! component's artifact kind.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::record::StoredAnalysis;
use crate::session::SessionKey;

/// Structured outcome of executing submitted code.
///
/// Every field is defaulted: presence plus valid JSON structure is the sole
/// completion signal, so a sparse record must still deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub exec_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultRecord {
    /// Joined stdout, truncated to `limit` bytes for prompt embedding.
    pub fn excerpt(&self, limit: usize) -> String {
        let mut joined = self.stdout.join("\n");
        if joined.len() > limit {
            let mut end = limit;
            while !joined.is_char_boundary(end) {
                end -= 1;
            }
            joined.truncate(end);
            joined.push_str("\n[truncated]");
        }
        joined
    }

    /// Record written by the no-reproduction shortcut in place of real output.
    pub fn no_reproduction_placeholder() -> Self {
        Self {
            success: false,
            stdout: Vec::new(),
            exec_time: None,
            status: Some("skipped".to_string()),
            message: Some(
                "Manually verified: run exceeded its time budget with no error reproduced."
                    .to_string(),
            ),
        }
    }
}

/// Artifact store rooted at the workspace directory.
#[derive(Debug, Clone)]
pub struct LogStore {
    root: PathBuf,
}

impl LogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn code_path(&self, competition_id: &str, key: &SessionKey) -> PathBuf {
        self.root.join("code").join(format!(
            "{}_{}_{}.py",
            key.datarow_id, competition_id, key.step
        ))
    }

    fn session_dir(&self, key: &SessionKey) -> PathBuf {
        self.root.join("logs").join(&key.datarow_id)
    }

    pub fn raw_log_path(&self, key: &SessionKey) -> PathBuf {
        self.session_dir(key).join(format!("{}.raw.log", key.step))
    }

    pub fn result_path(&self, key: &SessionKey) -> PathBuf {
        self.session_dir(key).join(format!("{}.jsonl", key.step))
    }

    pub fn analysis_path(&self, key: &SessionKey) -> PathBuf {
        self.session_dir(key)
            .join(format!("{}.analysis.json", key.step))
    }

    // --- code files ---

    pub fn write_code(&self, competition_id: &str, key: &SessionKey, code: &str) -> Result<PathBuf> {
        let path = self.code_path(competition_id, key);
        let parent = path.parent().expect("code path has a parent");
        fs::create_dir_all(parent)
            .with_context(|| format!("create code dir {}", parent.display()))?;
        fs::write(&path, code).with_context(|| format!("write code {}", path.display()))?;
        Ok(path)
    }

    pub fn read_code(&self, competition_id: &str, key: &SessionKey) -> Result<Option<String>> {
        read_optional(&self.code_path(competition_id, key))
    }

    // --- raw log ---

    /// Create (or truncate) the raw log sink for a fresh run. Truncation is
    /// what keeps stale remote job ids from leaking into reconciliation.
    pub fn create_raw_log(&self, key: &SessionKey) -> Result<File> {
        let path = self.raw_log_path(key);
        let parent = path.parent().expect("raw log path has a parent");
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
        File::create(&path).with_context(|| format!("create raw log {}", path.display()))
    }

    pub fn read_raw_log(&self, key: &SessionKey) -> Result<Option<String>> {
        read_optional(&self.raw_log_path(key))
    }

    // --- result record ---

    /// Delete a stale result record so it cannot masquerade as a fresh
    /// completion signal. Missing file is fine.
    pub fn clear_result(&self, key: &SessionKey) -> Result<()> {
        let path = self.result_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "cleared stale result record");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove result {}", path.display())),
        }
    }

    /// Tolerant result load: whole-file JSON object first, then the last
    /// line of a JSONL stream. Absence or malformed content means "not yet
    /// complete", never an error.
    pub fn load_result(&self, key: &SessionKey) -> Option<ResultRecord> {
        let path = self.result_path(key);
        let contents = fs::read_to_string(&path).ok()?;
        match parse_result(&contents) {
            Some(record) => Some(record),
            None => {
                debug!(path = %path.display(), "result record present but not yet parseable");
                None
            }
        }
    }

    pub fn write_result(&self, key: &SessionKey, record: &ResultRecord) -> Result<()> {
        let path = self.result_path(key);
        let parent = path.parent().expect("result path has a parent");
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
        let mut buf = serde_json::to_string(record)?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write result {}", path.display()))
    }

    // --- analysis record ---

    /// Atomically persist an analysis record (temp file + rename). Records
    /// are written once per step and then only ever read.
    pub fn write_analysis(&self, key: &SessionKey, stored: &StoredAnalysis) -> Result<()> {
        let path = self.analysis_path(key);
        let parent = path.parent().expect("analysis path has a parent");
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
        let mut buf = serde_json::to_string_pretty(stored)?;
        buf.push('\n');
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp analysis {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace analysis {}", path.display()))?;
        Ok(())
    }

    pub fn load_analysis(&self, key: &SessionKey) -> Result<Option<StoredAnalysis>> {
        let path = self.analysis_path(key);
        let Some(contents) = read_optional(&path)? else {
            return Ok(None);
        };
        let stored: StoredAnalysis = serde_json::from_str(&contents)
            .with_context(|| format!("parse analysis {}", path.display()))?;
        Ok(Some(stored))
    }
}

fn parse_result(contents: &str) -> Option<ResultRecord> {
    if let Ok(record) = serde_json::from_str::<ResultRecord>(contents) {
        return Some(record);
    }
    let last = contents.trim().lines().next_back()?;
    serde_json::from_str(last).ok()
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}
