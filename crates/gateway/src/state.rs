use std::sync::Arc;

use bp_actor::ActorClient;
use bp_domain::config::{Config, LlmConfig};
use bp_domain::error::Result;
use bp_providers::LlmClient;
use bp_sessions::SessionStore;
use bp_store::{Cache, Collections};

use crate::runtime::dispatch::ToolRegistry;

/// Handle to the LLM client. Production resolves the lazily-initialized
/// process-wide client on first use (so a missing API key fails the first
/// chat, not startup); tests inject a fixed client.
#[derive(Clone)]
pub struct LlmHandle {
    cfg: LlmConfig,
    fixed: Option<Arc<dyn LlmClient>>,
}

impl LlmHandle {
    pub fn from_config(cfg: LlmConfig) -> Self {
        Self { cfg, fixed: None }
    }

    pub fn fixed(client: Arc<dyn LlmClient>) -> Self {
        Self {
            cfg: LlmConfig::default(),
            fixed: Some(client),
        }
    }

    pub fn client(&self) -> Result<Arc<dyn LlmClient>> {
        if let Some(client) = &self.fixed {
            return Ok(client.clone());
        }
        let client: Arc<dyn LlmClient> = bp_providers::shared(&self.cfg)?;
        Ok(client)
    }
}

/// Shared application state passed to all API handlers and background jobs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Collections>,
    pub cache: Arc<Cache>,
    pub actor: Arc<ActorClient>,
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<ToolRegistry>,
    pub llm: LlmHandle,
}
