//! Blocking HTTP client for a local Ollama instance.
//!
//! Every generation call is preceded by a cheap liveness probe against
//! `/api/tags` so callers fail fast with `ServerUnreachable` instead of
//! waiting out a full network timeout when the server is down.

use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ModelConfig, SamplingOptions};

/// Connect timeout for generation requests.
const CONNECT_TIMEOUT_SECS: u64 = 5;
/// Read timeout for generation requests.
const READ_TIMEOUT_SECS: u64 = 60;
/// Default liveness probe timeout.
const PROBE_TIMEOUT_SECS: u64 = 2;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference server unreachable at {0}")]
    ServerUnreachable(String),

    #[error("Inference server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed server payload: {0}")]
    Payload(String),
}

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    probe: reqwest::blocking::Client,
    config: ModelConfig,
}

impl OllamaClient {
    /// Create a new OllamaClient pointing at an Ollama instance.
    pub fn new(base_url: &str, config: ModelConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        let probe = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            probe,
            config,
        }
    }

    /// Default Ollama instance at localhost:11434.
    pub fn default_local() -> Self {
        Self::new("http://localhost:11434", ModelConfig::default())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Liveness probe against `/api/tags`. Network errors collapse to false.
    pub fn is_reachable(&self, timeout: Duration) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.probe.get(&url).timeout(timeout).send() {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Single non-streaming generation. Returns the raw `response` field,
    /// which is itself expected (not guaranteed) to be companion JSON.
    pub fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        self.ensure_reachable()?;

        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: &self.config.options,
            stop: &self.config.stop,
            format: Some("json"),
            system: Some(&self.config.system_prompt),
            keep_alive: &self.config.keep_alive,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(InferenceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| InferenceError::Payload(e.to_string()))?;

        Ok(parsed.response)
    }

    /// Open a streaming generation. The returned iterator yields `response`
    /// fragments in arrival order, blocking only on the next network read.
    pub fn stream(&self, prompt: &str) -> Result<TokenStream<'_>, InferenceError> {
        self.ensure_reachable()?;

        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: true,
            options: &self.config.options,
            stop: &self.config.stop,
            format: Some("json"),
            system: Some(&self.config.system_prompt),
            keep_alive: &self.config.keep_alive,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(InferenceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(TokenStream {
            lines: BufReader::new(response).lines(),
            client: self,
            prompt: prompt.to_string(),
            emitted: false,
            finished: false,
        })
    }

    /// Single-token generation that keeps the model resident in server
    /// memory. Best-effort: callers discard the result.
    pub fn prewarm(&self) -> Result<(), InferenceError> {
        self.ensure_reachable()?;

        let url = format!("{}/api/generate", self.base_url);
        let options = SamplingOptions {
            num_predict: 1,
            ..self.config.options.clone()
        };
        let body = GenerateRequest {
            model: &self.config.model,
            prompt: "User: hello\nAssistant:",
            stream: false,
            options: &options,
            stop: &self.config.stop,
            format: None,
            system: None,
            keep_alive: &self.config.keep_alive,
        };

        self.client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_transport(e))?
            .error_for_status()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        tracing::debug!(model = %self.config.model, "Model pre-warmed");
        Ok(())
    }

    fn ensure_reachable(&self) -> Result<(), InferenceError> {
        if self.is_reachable(Duration::from_secs(PROBE_TIMEOUT_SECS)) {
            Ok(())
        } else {
            Err(InferenceError::ServerUnreachable(self.base_url.clone()))
        }
    }

    fn map_transport(&self, e: reqwest::Error) -> InferenceError {
        if e.is_connect() {
            InferenceError::ServerUnreachable(self.base_url.clone())
        } else if e.is_timeout() {
            InferenceError::Timeout(READ_TIMEOUT_SECS)
        } else {
            InferenceError::Transport(e.to_string())
        }
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a SamplingOptions,
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    keep_alive: &'a str,
}

/// Response body from Ollama /api/generate (non-streaming)
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// One newline-delimited chunk of a streaming response.
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Caller-driven iterator over streamed response fragments.
///
/// Ends when a chunk arrives with `done: true` or the connection closes.
/// The server has been observed to close streams without emitting anything
/// under some failure modes; when that happens the iterator issues one
/// blocking `generate` call and yields its result as a single final
/// fragment, so a started interaction never produces zero output.
pub struct TokenStream<'a> {
    lines: Lines<BufReader<reqwest::blocking::Response>>,
    client: &'a OllamaClient,
    prompt: String,
    emitted: bool,
    finished: bool,
}

impl TokenStream<'_> {
    fn fall_back_to_blocking(&mut self) -> Option<Result<String, InferenceError>> {
        tracing::warn!("Stream closed without fragments, falling back to blocking generate");
        self.finished = true;
        self.emitted = true;
        Some(self.client.generate(&self.prompt))
    }
}

impl Iterator for TokenStream<'_> {
    type Item = Result<String, InferenceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            match self.lines.next() {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    // Undecodable lines are skipped, matching the server's
                    // newline-delimited JSON contract loosely.
                    let Ok(chunk) = serde_json::from_str::<StreamChunk>(&line) else {
                        continue;
                    };
                    if chunk.done {
                        self.finished = true;
                        if chunk.response.is_empty() && !self.emitted {
                            return self.fall_back_to_blocking();
                        }
                    }
                    if chunk.response.is_empty() {
                        continue;
                    }
                    self.emitted = true;
                    return Some(Ok(chunk.response));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    if !self.emitted {
                        return self.fall_back_to_blocking();
                    }
                    return Some(Err(InferenceError::Transport(e.to_string())));
                }
                None => {
                    self.finished = true;
                    if !self.emitted {
                        return self.fall_back_to_blocking();
                    }
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A port nothing listens on; connections are refused immediately.
    const DEAD_URL: &str = "http://127.0.0.1:9";

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", ModelConfig::default());
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn default_local_uses_standard_port() {
        let client = OllamaClient::default_local();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn generate_request_carries_full_contract() {
        let config = ModelConfig::default();
        let request = GenerateRequest {
            model: &config.model,
            prompt: "User: hi\nAssistant:",
            stream: false,
            options: &config.options,
            stop: &config.stop,
            format: Some("json"),
            system: Some(&config.system_prompt),
            keep_alive: &config.keep_alive,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3.2:3b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
        assert_eq!(json["options"]["num_predict"], 40);
        assert_eq!(json["stop"][0], "\nUser:");
        assert_eq!(json["keep_alive"], "10m");
        assert!(json["system"].as_str().unwrap().contains("Vela"));
    }

    #[test]
    fn prewarm_request_omits_format_and_system() {
        let request = GenerateRequest {
            model: "llama3.2:3b",
            prompt: "User: hello\nAssistant:",
            stream: false,
            options: &SamplingOptions {
                num_predict: 1,
                ..SamplingOptions::default()
            },
            stop: &[],
            format: None,
            system: None,
            keep_alive: "10m",
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["options"]["num_predict"], 1);
        assert!(json.get("format").is_none());
        assert!(json.get("system").is_none());
    }

    #[test]
    fn stream_chunk_defaults_for_missing_fields() {
        let chunk: StreamChunk = serde_json::from_str("{}").unwrap();
        assert_eq!(chunk.response, "");
        assert!(!chunk.done);

        let chunk: StreamChunk =
            serde_json::from_str(r#"{"response":"hi","done":true}"#).unwrap();
        assert_eq!(chunk.response, "hi");
        assert!(chunk.done);
    }

    #[test]
    fn unreachable_server_probe_is_false() {
        let client = OllamaClient::new(DEAD_URL, ModelConfig::default());
        assert!(!client.is_reachable(Duration::from_millis(300)));
    }

    #[test]
    fn generate_fails_fast_when_unreachable() {
        let client = OllamaClient::new(DEAD_URL, ModelConfig::default());
        let start = std::time::Instant::now();
        let result = client.generate("User: hi\nAssistant:");
        assert!(matches!(result, Err(InferenceError::ServerUnreachable(_))));
        // Probe failure, not a full read timeout.
        assert!(start.elapsed() < Duration::from_secs(PROBE_TIMEOUT_SECS + 2));
    }

    #[test]
    fn stream_fails_fast_when_unreachable() {
        let client = OllamaClient::new(DEAD_URL, ModelConfig::default());
        assert!(matches!(
            client.stream("User: hi\nAssistant:"),
            Err(InferenceError::ServerUnreachable(_))
        ));
    }
}
