//! The concrete tool set.
//!
//! Every tool follows one contract: arguments deserialize into a typed
//! struct (floats with integral magnitude are rounded first — the LLM likes
//! to send `10.0` for integer fields), results are structured maps that may
//! carry `cacheHit`/`cachedAt`, and failures are classified [`ToolError`]s.

pub mod analytics;
pub mod hashtags;
pub mod monitoring;
pub mod posts;
pub mod profile;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use bp_actor::ActorClient;
use bp_domain::config::Config;
use bp_domain::tool::ToolError;
use bp_store::{Cache, Collections};

use crate::runtime::dispatch::ToolRegistry;

/// Domain collection holding individual posts seen by any fetch tool.
pub const POSTS_COLL: &str = "posts";
/// Domain collection holding posts seen under hashtags.
pub const HASHTAG_POSTS_COLL: &str = "hashtag_posts";
/// Domain collection of campaign posts under monitoring.
pub const MONITORED_COLL: &str = "monitored_posts";

/// Everything a tool handler needs.
#[derive(Clone)]
pub struct ToolDeps {
    pub cache: Arc<Cache>,
    pub actor: Arc<ActorClient>,
    pub store: Arc<dyn Collections>,
    pub config: Arc<Config>,
}

/// Build the full registry: all tools plus the auto-enroll post-tool hook.
pub fn build_registry(deps: ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(profile::GetProfile::new(deps.clone())));
    registry.register(Arc::new(posts::GetUserPosts::new(deps.clone())));
    registry.register(Arc::new(posts::GetUserReels::new(deps.clone())));
    registry.register(Arc::new(posts::CheckUserTopicPosts::new(deps.clone())));
    registry.register(Arc::new(hashtags::GetHashtagPosts::new(deps.clone())));
    registry.register(Arc::new(hashtags::GetHashtagStats::new(deps.clone())));
    registry.register(Arc::new(monitoring::MonitorPost::new(deps.clone())));
    registry.register(Arc::new(analytics::GetEngagementSummary::new(deps.clone())));
    registry.register(Arc::new(analytics::RankInfluencers::new(deps.clone())));

    registry.add_hook(monitoring::auto_enroll_hook(deps.store));
    registry
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deserialize raw tool arguments into a typed struct, rounding
/// integer-valued floats first so `{"limit": 10.0}` parses into a `u32`.
pub(crate) fn parse_args<T: DeserializeOwned>(mut raw: Value) -> Result<T, ToolError> {
    round_integral_floats(&mut raw);
    serde_json::from_value(raw).map_err(|e| ToolError::validation(e.to_string()))
}

fn round_integral_floats(value: &mut Value) {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    *value = Value::from(f as i64);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(round_integral_floats),
        Value::Object(map) => map.values_mut().for_each(round_integral_floats),
        _ => {}
    }
}

/// Validate a limit argument against an inclusive range.
pub(crate) fn check_limit(limit: u32, min: u32, max: u32) -> Result<u32, ToolError> {
    if (min..=max).contains(&limit) {
        Ok(limit)
    } else {
        Err(ToolError::validation(format!(
            "limit must be between {min} and {max}, got {limit}"
        )))
    }
}

/// Normalize a username argument: trim, strip a leading `@`, lowercase.
pub(crate) fn normalize_username(raw: &str) -> Result<String, ToolError> {
    let username = raw.trim().trim_start_matches('@').to_lowercase();
    if username.is_empty() {
        return Err(ToolError::validation("username must not be empty"));
    }
    Ok(username)
}

/// Normalize a hashtag argument: trim, strip a leading `#`, lowercase.
pub(crate) fn normalize_hashtag(raw: &str) -> Result<String, ToolError> {
    let hashtag = raw.trim().trim_start_matches('#').to_lowercase();
    if hashtag.is_empty() {
        return Err(ToolError::validation("hashtag must not be empty"));
    }
    Ok(hashtag)
}

/// Stamp the cache-status convention field onto a payload.
pub(crate) fn with_cache_hit(mut payload: Value, hit: bool) -> Value {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("cacheHit".into(), Value::Bool(hit));
    }
    payload
}
