//! Text-completion backends and the retry loop in front of them.

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::{AiConfig, BackendChoice};
use crate::error::OrchestratorError;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The service shed load; the one failure class worth retrying.
    #[error("backend overloaded (HTTP {status})")]
    Overloaded { status: u16 },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("backend returned an empty completion")]
    EmptyCompletion,
}

impl BackendError {
    /// Only overload is transient. A 4xx or an empty completion will fail
    /// identically on retry, so retrying just burns quota.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Overloaded { .. })
    }
}

/// One round-trip to a completion model. Implementations are blocking.
pub trait CompletionBackend {
    fn name(&self) -> &'static str;

    fn complete(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Drive `backend` with exponential backoff on overload. `max_retries`
/// counts extra attempts after the first.
pub fn complete_with_retry(
    backend: &dyn CompletionBackend,
    prompt: &str,
    max_retries: u32,
    base_delay: Duration,
) -> Result<String, BackendError> {
    let mut attempt = 0;
    loop {
        match backend.complete(prompt) {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = base_delay * 2u32.pow(attempt);
                warn!(
                    backend = backend.name(),
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    err = %e,
                    "backend overloaded, backing off"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Gemini `generateContent` client. Requests JSON output explicitly; the
/// extraction layer still treats the reply as untrusted text.
pub struct GeminiBackend {
    client: reqwest::blocking::Client,
    model: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiBackend {
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self, BackendError> {
        Ok(Self {
            client: blocking_client(config)?,
            model: config.gemini_model.clone(),
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[derive(Deserialize, Default)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize, Default)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

#[derive(Deserialize, Default)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize, Default)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

impl CompletionBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    #[instrument(skip_all, fields(model = %self.model))]
    fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
                "responseMimeType": "application/json",
            },
        });
        let resp = self.client.post(&url).json(&payload).send()?;
        let status = resp.status().as_u16();
        if status == 429 || status == 503 {
            return Err(BackendError::Overloaded { status });
        }
        if !resp.status().is_success() {
            return Err(BackendError::Http {
                status,
                body: resp.text().unwrap_or_default(),
            });
        }
        let body: GeminiResponse = resp.json()?;
        let text: String = body
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .map(|p| p.text)
            .collect();
        if text.trim().is_empty() {
            return Err(BackendError::EmptyCompletion);
        }
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

/// OpenAI-compatible chat client for a local LM Studio server.
pub struct LmStudioBackend {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl LmStudioBackend {
    pub fn new(config: &AiConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: blocking_client(config)?,
            base_url: config.lm_studio_url.trim_end_matches('/').to_string(),
            model: config.lm_studio_model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[derive(Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Default)]
struct ChatChoice {
    #[serde(default)]
    message: ChatMessage,
}

#[derive(Deserialize, Default)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl CompletionBackend for LmStudioBackend {
    fn name(&self) -> &'static str {
        "lm_studio"
    }

    #[instrument(skip_all, fields(model = %self.model))]
    fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
        });
        let resp = self.client.post(&url).json(&payload).send()?;
        let status = resp.status().as_u16();
        if status == 429 || status == 503 {
            return Err(BackendError::Overloaded { status });
        }
        if !resp.status().is_success() {
            return Err(BackendError::Http {
                status,
                body: resp.text().unwrap_or_default(),
            });
        }
        let body: ChatResponse = resp.json()?;
        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(BackendError::EmptyCompletion);
        }
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

fn blocking_client(config: &AiConfig) -> Result<reqwest::blocking::Client, BackendError> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?)
}

/// Construct the configured backend, or explain why it cannot run.
pub fn backend_from_config(
    config: &AiConfig,
    choice: BackendChoice,
) -> Result<Box<dyn CompletionBackend>, OrchestratorError> {
    match choice {
        BackendChoice::Gemini => {
            let api_key = config.gemini_api_key.clone().ok_or_else(|| {
                OrchestratorError::BackendUnavailable(
                    "gemini backend selected but no API key is configured".to_string(),
                )
            })?;
            let backend = GeminiBackend::new(config, api_key)
                .map_err(|e| OrchestratorError::BackendUnavailable(e.to_string()))?;
            Ok(Box::new(backend))
        }
        BackendChoice::LmStudio => {
            let backend = LmStudioBackend::new(config)
                .map_err(|e| OrchestratorError::BackendUnavailable(e.to_string()))?;
            Ok(Box::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakyBackend {
        failures_before_success: Mutex<u32>,
        calls: Mutex<u32>,
    }

    impl CompletionBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn complete(&self, _prompt: &str) -> Result<String, BackendError> {
            *self.calls.lock().unwrap() += 1;
            let mut remaining = self.failures_before_success.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Err(BackendError::Overloaded { status: 503 })
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[test]
    fn retries_overload_then_succeeds() {
        let backend = FlakyBackend {
            failures_before_success: Mutex::new(2),
            calls: Mutex::new(0),
        };
        let text = complete_with_retry(&backend, "p", 3, Duration::from_millis(0))
            .expect("eventual success");
        assert_eq!(text, "ok");
        assert_eq!(*backend.calls.lock().unwrap(), 3);
    }

    #[test]
    fn exhausted_retries_surface_overload() {
        let backend = FlakyBackend {
            failures_before_success: Mutex::new(10),
            calls: Mutex::new(0),
        };
        let err = complete_with_retry(&backend, "p", 2, Duration::from_millis(0)).unwrap_err();
        assert!(matches!(err, BackendError::Overloaded { status: 503 }));
        assert_eq!(*backend.calls.lock().unwrap(), 3, "first try plus two retries");
    }

    struct AlwaysHttp400;

    impl CompletionBackend for AlwaysHttp400 {
        fn name(&self) -> &'static str {
            "bad-request"
        }

        fn complete(&self, _prompt: &str) -> Result<String, BackendError> {
            Err(BackendError::Http {
                status: 400,
                body: "bad prompt".to_string(),
            })
        }
    }

    #[test]
    fn non_overload_errors_do_not_retry() {
        let err =
            complete_with_retry(&AlwaysHttp400, "p", 5, Duration::from_millis(0)).unwrap_err();
        assert!(matches!(err, BackendError::Http { status: 400, .. }));
    }

    #[test]
    fn only_overload_is_retryable() {
        assert!(BackendError::Overloaded { status: 429 }.is_retryable());
        assert!(!BackendError::EmptyCompletion.is_retryable());
        assert!(
            !BackendError::Http {
                status: 500,
                body: String::new()
            }
            .is_retryable()
        );
    }
}
