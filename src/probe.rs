//! Lightweight network probes, distinct from production traffic.
//!
//! Every probe carries a bounded timeout so a hanging upstream can never
//! stall a monitor tick or a foreground switch request. Probes are always
//! issued outside the controller's lock; only their outcome is applied
//! inside it.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::util::mask_key;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(PROBE_TIMEOUT)
        } else {
            Self::Network(e.without_url().to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeClient {
    http: Client,
}

impl ProbeClient {
    /// Fails only when the TLS backend cannot be initialized; a client
    /// without the probe timeout is never handed out.
    pub fn new() -> Result<Self, ProbeError> {
        let http = Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self { http })
    }

    /// Cheap validity check for an OpenRouter key: list models with the key
    /// as bearer. Any non-2xx counts as a key failure.
    pub async fn test_openrouter_key(
        &self,
        api_base: &str,
        key: &str,
    ) -> Result<(), ProbeError> {
        let url = format!("{}/models", api_base.trim_end_matches('/'));
        debug!(key = %mask_key(key), %url, "probing OpenRouter key");

        let resp = self
            .http
            .get(&url)
            .bearer_auth(key)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ProbeError::Upstream {
            status: status.as_u16(),
            body,
        })
    }

    /// Reachability check for a local Ollama server.
    pub async fn check_ollama(&self, api_base: &str) -> Result<(), ProbeError> {
        let url = format!("{}/api/tags", api_base.trim_end_matches('/'));
        debug!(%url, "probing Ollama reachability");

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ProbeError::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}
