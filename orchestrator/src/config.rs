//! Orchestrator configuration stored as a TOML file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; secrets can be
/// supplied through the environment instead (see [`OrchestratorConfig::apply_env`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub submit: SubmitConfig,
    pub remote: RemoteConfig,
    pub ai: AiConfig,
}

/// Local submission process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubmitConfig {
    /// Command spawned to drive remote submission (e.g. `["bash","gpu_submit.sh"]`).
    pub command: Vec<String>,

    /// Seconds to wait after a graceful terminate before force-killing.
    pub terminate_grace_secs: u64,
}

/// Remote GPU job service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the job service. Remote cancellation is skipped when unset.
    pub server_url: Option<String>,

    /// Bearer token for the job service.
    pub token: Option<String>,

    pub cancel_timeout_secs: u64,
    pub status_timeout_secs: u64,

    /// Delay before the post-cancel status check that confirms a terminal state.
    pub confirm_delay_secs: u64,
}

impl RemoteConfig {
    /// Both a URL and a token are required to talk to the job service.
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.token.is_some()
    }
}

/// AI reviewer backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    /// Default backend when a request does not choose one.
    pub backend: BackendChoice,

    pub gemini_model: String,
    pub gemini_api_key: Option<String>,

    pub lm_studio_url: String,
    pub lm_studio_model: String,

    /// Per-attempt HTTP timeout. Generous: replacement code payloads are large.
    pub request_timeout_secs: u64,

    /// Retries on overload/rate-limit signals only.
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,

    /// Pinned low for deterministic output.
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    #[default]
    Gemini,
    LmStudio,
}

impl BackendChoice {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gemini" => Some(BackendChoice::Gemini),
            "lm_studio" | "lm-studio" => Some(BackendChoice::LmStudio),
            _ => None,
        }
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            command: vec!["bash".to_string(), "gpu_submit.sh".to_string()],
            terminate_grace_secs: 2,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            token: None,
            cancel_timeout_secs: 10,
            status_timeout_secs: 5,
            confirm_delay_secs: 1,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Gemini,
            gemini_model: "gemini-2.0-pro-exp".to_string(),
            gemini_api_key: None,
            lm_studio_url: "http://localhost:1234".to_string(),
            lm_studio_model: "local-model".to_string(),
            request_timeout_secs: 120,
            max_retries: 3,
            retry_base_delay_secs: 2,
            temperature: 0.1,
            max_output_tokens: 32_768,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            submit: SubmitConfig::default(),
            remote: RemoteConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.submit.command.is_empty() || self.submit.command[0].trim().is_empty() {
            return Err(anyhow!("submit.command must be a non-empty array"));
        }
        if self.remote.cancel_timeout_secs == 0 || self.remote.status_timeout_secs == 0 {
            return Err(anyhow!("remote timeouts must be > 0"));
        }
        if self.ai.request_timeout_secs == 0 {
            return Err(anyhow!("ai.request_timeout_secs must be > 0"));
        }
        if self.ai.gemini_model.trim().is_empty() {
            return Err(anyhow!("ai.gemini_model must not be empty"));
        }
        if self.ai.lm_studio_url.trim().is_empty() {
            return Err(anyhow!("ai.lm_studio_url must not be empty"));
        }
        Ok(())
    }

    /// Overlay secrets from the environment: `SERVER_URL`, `TOKEN`,
    /// `GEMINI_API_KEY`. Environment values win over file values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SERVER_URL")
            && !url.is_empty()
        {
            self.remote.server_url = Some(url);
        }
        if let Ok(token) = std::env::var("TOKEN")
            && !token.is_empty()
        {
            self.remote.token = Some(token);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY")
            && !key.is_empty()
        {
            self.ai.gemini_api_key = Some(key);
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
