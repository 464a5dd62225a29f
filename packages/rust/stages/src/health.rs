//! Model availability probe.
//!
//! Queries the serving endpoint's tag listing (`GET /api/tags`) and reports
//! which configured models are installed. Probe failure never blocks the
//! pipeline; it only degrades the status report.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use errscribe_shared::ConfigError;

/// Timeout for the availability probe; deliberately shorter than stage calls.
const PROBE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Health-check client for the model-serving endpoint.
#[derive(Debug, Clone)]
pub struct ModelHealthClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl ModelHealthClient {
    pub fn new(endpoint: &str) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ConfigError::new(format!("invalid model endpoint '{endpoint}': {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("errscribe/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .map_err(|e| ConfigError::new(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, endpoint })
    }

    /// Report availability for each of `models`. Never fails: an unreachable
    /// endpoint marks every model unavailable.
    pub async fn probe(&self, models: &[String]) -> BTreeMap<String, bool> {
        let installed = match self.fetch_tags().await {
            Ok(names) => names,
            Err(message) => {
                warn!(%message, "model availability probe failed");
                return models.iter().map(|m| (m.clone(), false)).collect();
            }
        };

        debug!(installed = installed.len(), "model tags fetched");

        models
            .iter()
            .map(|model| {
                let available = installed
                    .iter()
                    .any(|name| name == model || name.split(':').next() == Some(model.as_str()));
                (model.clone(), available)
            })
            .collect()
    }

    async fn fetch_tags(&self) -> Result<Vec<String>, String> {
        let url = self
            .endpoint
            .join("api/tags")
            .map_err(|e| format!("endpoint join: {e}"))?;

        let response = self.http.get(url).send().await.map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        let reply: TagsReply = response
            .json()
            .await
            .map_err(|e| format!("invalid tags reply: {e}"))?;

        Ok(reply.models.into_iter().map(|m| m.name).collect())
    }
}
