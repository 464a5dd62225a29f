//! HTTP client for the local model-serving endpoint.
//!
//! Speaks the Ollama generate API: `POST {endpoint}/api/generate` with
//! `{ model, prompt, stream: false }`, reading a single JSON reply.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use errscribe_shared::ConfigError;

/// User-Agent string for model requests.
const USER_AGENT: &str = concat!("errscribe/", env!("CARGO_PKG_VERSION"));

/// A completed generate call.
#[derive(Debug, Clone)]
pub(crate) struct GenerateOutcome {
    pub text: String,
    pub model: String,
    pub latency_ms: u64,
}

/// Why a generate call produced no outcome.
#[derive(Debug, Clone)]
pub(crate) enum CallError {
    /// The run's cancellation token fired; the in-flight request was dropped.
    Cancelled,
    /// Transport, status, timeout, or decode failure.
    Failed(String),
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    model: String,
    response: String,
}

/// Shared HTTP client for all four stage analyzers.
#[derive(Debug, Clone)]
pub(crate) struct ModelClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl ModelClient {
    /// Build a client against `endpoint` with a per-request timeout.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ConfigError::new(format!("invalid model endpoint '{endpoint}': {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::new(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Run one generate call, racing it against the cancellation token.
    ///
    /// Cancellation drops the in-flight request rather than waiting for it.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerateOutcome, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            outcome = self.post_generate(model, prompt) => outcome,
        }
    }

    async fn post_generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<GenerateOutcome, CallError> {
        let url = self
            .endpoint
            .join("api/generate")
            .map_err(|e| CallError::Failed(format!("endpoint join: {e}")))?;

        let body = GenerateBody {
            model,
            prompt,
            stream: false,
            format: "json",
        };

        let started = Instant::now();
        debug!(%model, prompt_len = prompt.len(), "sending generate request");

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Failed(format!("{model}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Failed(format!("{model}: HTTP {status}")));
        }

        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|e| CallError::Failed(format!("{model}: invalid reply: {e}")))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(%model, latency_ms, reply_len = reply.response.len(), "generate complete");

        Ok(GenerateOutcome {
            text: reply.response,
            model: if reply.model.is_empty() {
                model.to_string()
            } else {
                reply.model
            },
            latency_ms,
        })
    }
}
