//! Client for the upstream scraping actors.
//!
//! One uniform operation: run an actor synchronously and get its dataset
//! back. Created once at startup and reused; the underlying `reqwest::Client`
//! maintains a connection pool.

use std::time::Duration;

use serde_json::Value;

use bp_domain::config::ActorConfig;
use bp_domain::error::{Error, Result};

/// Caps applied to a single actor run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub max_items: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self { max_items: 50 }
    }
}

/// HTTP client for the actor platform.
#[derive(Debug, Clone)]
pub struct ActorClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ActorClient {
    pub fn from_config(cfg: &ActorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Internal(format!("building actor http client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
        })
    }

    fn run_url(&self, actor_id: &str, limits: RunLimits) -> String {
        let mut url = format!(
            "{}/v2/acts/{}/run-sync-get-dataset-items?maxItems={}",
            self.base_url, actor_id, limits.max_items
        );
        if let Some(token) = &self.token {
            url.push_str("&token=");
            url.push_str(token);
        }
        url
    }

    /// Run an actor with the given input and wait for its dataset.
    ///
    /// The platform holds the request open until the run finishes; the body
    /// is a JSON array of raw items. Non-success → [`Error::Upstream`];
    /// client timeout → [`Error::Timeout`].
    pub async fn run(
        &self,
        actor_id: &str,
        input: Value,
        limits: RunLimits,
    ) -> Result<Vec<Value>> {
        let url = self.run_url(actor_id, limits);
        tracing::debug!(actor_id, max_items = limits.max_items, "actor run");

        let response = self
            .http
            .post(&url)
            .json(&input)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("actor {actor_id}"))
                } else {
                    Error::Upstream(format!("actor {actor_id}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(Error::Upstream(format!(
                "actor {actor_id} returned {status}: {snippet}"
            )));
        }

        let items: Vec<Value> = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("actor {actor_id} dataset: {e}")))?;

        tracing::debug!(actor_id, items = items.len(), "actor run finished");
        Ok(items)
    }
}
