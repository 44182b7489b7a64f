//! Oracle client — unified interface for Ollama and OpenAI-compatible
//! backends, implementing `wyrld-core`'s [`Oracle`] trait.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use wyrld_core::config::OracleConfig;
use wyrld_core::{Oracle, OracleError, OracleRequest};

use crate::error::LlmError;
use crate::prompt;
use crate::types::{CompletionRequest, CompletionResponse};

/// Provider backend for oracle calls.
#[derive(Debug, Clone)]
pub enum OracleProvider {
    /// Ollama running locally (recommended).
    Ollama {
        /// Base URL, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible API (also works with Anthropic, Together, etc.).
    OpenAiCompatible {
        /// Base URL of the API.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No backend — every call fails, triggering the core's fallbacks.
    None,
}

/// The oracle client that routes requests to the appropriate backend.
pub struct OracleClient {
    provider: OracleProvider,
    http: Client,
    model: String,
    timeout_ms: u64,
    max_retries: u32,
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OracleClient {
    /// Create a client.
    #[must_use]
    pub fn new(
        provider: OracleProvider,
        model: impl Into<String>,
        timeout_ms: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            timeout_ms,
            max_retries,
        }
    }

    /// Create a client with no backend (all calls fail → core fallbacks).
    #[must_use]
    pub fn none() -> Self {
        Self::new(OracleProvider::None, String::new(), 0, 0)
    }

    /// Build a client from the core's oracle config section.
    ///
    /// # Errors
    /// Returns [`LlmError::ConfigError`] for an unknown provider name.
    pub fn from_config(config: &OracleConfig) -> Result<Self, LlmError> {
        let provider = match config.provider.as_str() {
            "ollama" => OracleProvider::Ollama {
                base_url: config.base_url.clone(),
            },
            "openai" => OracleProvider::OpenAiCompatible {
                base_url: config.base_url.clone(),
                api_key: config.api_key.clone(),
            },
            "none" => OracleProvider::None,
            other => {
                return Err(LlmError::ConfigError(format!(
                    "unknown oracle provider '{other}'"
                )));
            }
        };
        Ok(Self::new(
            provider,
            config.model.clone(),
            config.timeout_ms,
            config.max_retries,
        ))
    }

    /// Whether a backend is configured at all.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, OracleProvider::None)
    }

    /// Run a completion against the configured backend.
    ///
    /// # Errors
    /// Returns [`LlmError`] when the backend is unavailable, times out, or
    /// answers with something unusable; retries (if configured) happen
    /// here, inside the collaborator.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        match &self.provider {
            OracleProvider::None => Err(LlmError::Unavailable(
                "no oracle provider configured".into(),
            )),
            OracleProvider::Ollama { base_url } => self.complete_ollama(base_url, request).await,
            OracleProvider::OpenAiCompatible { base_url, api_key } => {
                self.complete_openai(base_url, api_key, request).await
            }
        }
    }

    async fn complete_ollama(
        &self,
        base_url: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let url = format!("{base_url}/api/generate");
        let body = json!({
            "model": self.model,
            "prompt": format!("{}\n\n{}", request.system, request.user),
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(
                    "retrying oracle call (attempt {}/{})",
                    attempt + 1,
                    self.max_retries + 1
                );
            }

            let start = Instant::now();
            let result = self
                .http
                .post(&url)
                .json(&body)
                .timeout(Duration::from_millis(request.timeout_ms))
                .send()
                .await;
            let latency_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let payload: serde_json::Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let text = payload["response"].as_str().unwrap_or("").trim().to_string();
                    if text.is_empty() {
                        last_error = "empty completion".to_string();
                        continue;
                    }
                    return Ok(CompletionResponse {
                        text,
                        tokens_generated: payload["eval_count"].as_u64().unwrap_or(0) as u32,
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Ok(resp) => {
                    last_error = format!("HTTP {}", resp.status());
                    warn!("ollama returned error: {last_error}");
                }
                Err(e) => {
                    if e.is_timeout() && self.max_retries == 0 {
                        return Err(LlmError::Timeout(request.timeout_ms));
                    }
                    last_error = e.to_string();
                    warn!("ollama request failed: {last_error}");
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    async fn complete_openai(
        &self,
        base_url: &str,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let url = format!("{base_url}/v1/chat/completions");
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(
                    "retrying oracle call (attempt {}/{})",
                    attempt + 1,
                    self.max_retries + 1
                );
            }

            let start = Instant::now();
            let result = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {api_key}"))
                .json(&body)
                .timeout(Duration::from_millis(request.timeout_ms))
                .send()
                .await;
            let latency_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let payload: serde_json::Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let text = payload["choices"][0]["message"]["content"]
                        .as_str()
                        .unwrap_or("")
                        .trim()
                        .to_string();
                    if text.is_empty() {
                        last_error = "empty completion".to_string();
                        continue;
                    }
                    let tokens = payload["usage"]["completion_tokens"].as_u64().unwrap_or(0);
                    return Ok(CompletionResponse {
                        text,
                        tokens_generated: tokens as u32,
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Ok(resp) => {
                    last_error = format!("HTTP {}", resp.status());
                    warn!("openai-compatible API returned error: {last_error}");
                }
                Err(e) => {
                    if e.is_timeout() && self.max_retries == 0 {
                        return Err(LlmError::Timeout(request.timeout_ms));
                    }
                    last_error = e.to_string();
                    warn!("openai-compatible request failed: {last_error}");
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl Oracle for OracleClient {
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let rendered = prompt::render(request, self.timeout_ms);
        let response = self.complete(&rendered).await.map_err(OracleError::from)?;
        debug!(
            kind = ?request.kind,
            latency_ms = response.latency_ms,
            tokens = response.tokens_generated,
            "oracle answered"
        );
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wyrld_core::ContentKind;

    #[tokio::test]
    async fn none_provider_fails_fast() {
        let client = OracleClient::none();
        assert!(!client.is_available());

        let request = OracleRequest::new(ContentKind::Location, "anywhere", vec![], vec![]);
        let err = client.generate(&request).await.expect_err("no backend");
        assert!(matches!(err, OracleError::Unavailable(_)));
    }

    #[test]
    fn from_config_selects_provider() {
        let config = OracleConfig {
            provider: "openai".into(),
            base_url: "https://api.example.com".into(),
            api_key: "key".into(),
            ..OracleConfig::default()
        };
        let client = OracleClient::from_config(&config).expect("client");
        assert!(matches!(
            client.provider,
            OracleProvider::OpenAiCompatible { .. }
        ));

        let bad = OracleConfig {
            provider: "carrier-pigeon".into(),
            ..OracleConfig::default()
        };
        assert!(OracleClient::from_config(&bad).is_err());
    }
}
