//! Process configuration, read from the environment once at startup.
//!
//! Every field has a default so the server boots in a dev shell with nothing
//! set; the LLM API key is deliberately *not* checked here — a missing key is
//! fatal on first use, not at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub actor: ActorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Self {
        Config {
            server: ServerConfig {
                host: env_or("BP_HOST", "127.0.0.1"),
                port: env_parse("BP_PORT", 8080),
                cors_origin: std::env::var("BP_CORS_ORIGIN").ok(),
            },
            llm: LlmConfig {
                api_key: std::env::var("GEMINI_API_KEY").ok(),
                model: env_or("BP_MODEL", "gemini-2.0-flash"),
                base_url: env_or("BP_LLM_BASE_URL", "https://generativelanguage.googleapis.com"),
            },
            actor: ActorConfig {
                base_url: env_or("BP_ACTOR_BASE_URL", "https://api.apify.com"),
                token: std::env::var("APIFY_TOKEN").ok(),
                timeout_ms: env_parse("BP_ACTOR_TIMEOUT_MS", 60_000),
                ..ActorConfig::default()
            },
            store: StoreConfig {
                state_dir: PathBuf::from(env_or("BP_STATE_DIR", "./state")),
            },
            sessions: SessionsConfig {
                max_sessions: env_parse("BP_MAX_SESSIONS", 500),
                idle_ttl_secs: env_parse("BP_SESSION_TTL_SECS", 1800),
                sweep_interval_secs: env_parse("BP_SESSION_SWEEP_SECS", 300),
            },
            monitor: MonitorConfig {
                home_hashtags: std::env::var("BP_HOME_HASHTAGS")
                    .map(|raw| {
                        raw.split(',')
                            .map(|s| s.trim().trim_start_matches('#').to_lowercase())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_else(|_| MonitorConfig::default().home_hashtags),
                throttle_ms: env_parse("BP_MONITOR_THROTTLE_MS", 2_000),
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// CORS origin allowed for browser clients. `None` = permissive.
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            cors_origin: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key for the Gemini API. Missing key fails the first LLM call.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
    /// Actor IDs for the scraping jobs this server drives.
    pub profile_actor: String,
    pub posts_actor: String,
    pub reels_actor: String,
    pub hashtag_actor: String,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.apify.com".into(),
            token: None,
            timeout_ms: 60_000,
            profile_actor: "apify~instagram-profile-scraper".into(),
            posts_actor: "apify~instagram-post-scraper".into(),
            reels_actor: "apify~instagram-reel-scraper".into(),
            hashtag_actor: "apify~instagram-hashtag-scraper".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for the JSON document store (one file per collection).
    pub state_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./state"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    pub max_sessions: usize,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 500,
            idle_ttl_secs: 1800,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// "Home" hashtags prefetched on a fixed cadence.
    pub home_hashtags: Vec<String>,
    /// Pause between successive scheduler-driven tool calls.
    pub throttle_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            home_hashtags: vec!["branding".into(), "marketing".into(), "socialmedia".into()],
            throttle_ms: 2_000,
        }
    }
}

// ── env helpers ─────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_bounds() {
        let config = Config::default();
        assert_eq!(config.sessions.max_sessions, 500);
        assert_eq!(config.sessions.idle_ttl_secs, 1800);
        assert_eq!(config.sessions.sweep_interval_secs, 300);
    }

    #[test]
    fn default_host_is_localhost() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.cors_origin.is_none());
    }

    #[test]
    fn default_actor_timeout_is_sixty_seconds() {
        assert_eq!(Config::default().actor.timeout_ms, 60_000);
    }

    #[test]
    fn home_hashtags_are_nonempty_by_default() {
        assert!(!Config::default().monitor.home_hashtags.is_empty());
    }
}
