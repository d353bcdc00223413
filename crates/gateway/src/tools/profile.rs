//! Creator profile lookup: cache-first, actor on miss.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use bp_actor::RunLimits;
use bp_domain::tool::{ToolDefinition, ToolError};
use bp_store::CacheKind;

use crate::runtime::dispatch::Tool;

use super::{normalize_username, parse_args, with_cache_hit, ToolDeps};

#[derive(Debug, Deserialize)]
struct ProfileArgs {
    username: String,
}

pub struct GetProfile {
    deps: ToolDeps,
}

impl GetProfile {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for GetProfile {
    fn name(&self) -> &'static str {
        "get_profile"
    }

    fn label(&self) -> &'static str {
        "Fetching profile"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_profile".into(),
            description: "Fetch a creator's profile: follower counts, bio, verification."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "username": { "type": "string", "description": "Creator username, with or without @" }
                },
                "required": ["username"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: ProfileArgs = parse_args(args)?;
        let username = normalize_username(&args.username)?;

        if let Some(doc) = self
            .deps
            .cache
            .read(CacheKind::Profile, &username, Utc::now())
            .await
        {
            return Ok(with_cache_hit(doc, true));
        }

        let items = self
            .deps
            .actor
            .run(
                &self.deps.config.actor.profile_actor,
                json!({ "usernames": [username] }),
                RunLimits { max_items: 1 },
            )
            .await?;

        let raw = items
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::not_found(format!("no profile found for @{username}")))?;

        let payload = shape_profile(&username, &raw);
        self.deps
            .cache
            .write(CacheKind::Profile, &username, payload.clone())
            .await;

        Ok(with_cache_hit(payload, false))
    }
}

fn shape_profile(username: &str, raw: &Value) -> Value {
    json!({
        "username": username,
        "fullName": raw.get("fullName").cloned().unwrap_or(Value::Null),
        "biography": raw.get("biography").cloned().unwrap_or(Value::Null),
        "followers": raw.get("followersCount").and_then(Value::as_u64).unwrap_or(0),
        "following": raw.get("followsCount").and_then(Value::as_u64).unwrap_or(0),
        "postsCount": raw.get("postsCount").and_then(Value::as_u64).unwrap_or(0),
        "verified": raw.get("verified").and_then(Value::as_bool).unwrap_or(false),
        "profilePicUrl": raw.get("profilePicUrl").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_maps_counts_and_defaults() {
        let raw = json!({
            "fullName": "Acme Co",
            "followersCount": 1200,
            "followsCount": 35,
            "verified": true,
        });
        let shaped = shape_profile("acme", &raw);
        assert_eq!(shaped["username"], "acme");
        assert_eq!(shaped["followers"], 1200);
        assert_eq!(shaped["verified"], true);
        assert_eq!(shaped["postsCount"], 0);
        assert_eq!(shaped["biography"], Value::Null);
    }
}
