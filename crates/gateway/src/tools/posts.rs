//! Post and reel fetching, plus topic scanning over a creator's content.
//!
//! All three tools share the same cache fingerprint (`username:limit`) so a
//! topic scan right after a post fetch is a cache hit, not a second scrape.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use bp_actor::RunLimits;
use bp_domain::tool::{ToolDefinition, ToolError};
use bp_store::CacheKind;

use crate::runtime::dispatch::Tool;

use super::{
    check_limit, normalize_username, parse_args, with_cache_hit, ToolDeps, POSTS_COLL,
};

const DEFAULT_LIMIT: u32 = 12;
const MAX_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
struct PostsArgs {
    username: String,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TopicArgs {
    username: String,
    topic: String,
    #[serde(default)]
    limit: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared fetch path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cache-first fetch of a creator's recent posts. Returns the shaped payload
/// and whether it came from cache.
async fn fetch_posts(
    deps: &ToolDeps,
    username: &str,
    limit: u32,
) -> Result<(Value, bool), ToolError> {
    let key = format!("{username}:{limit}");

    if let Some(doc) = deps.cache.read(CacheKind::Post, &key, Utc::now()).await {
        return Ok((doc, true));
    }

    let items = deps
        .actor
        .run(
            &deps.config.actor.posts_actor,
            json!({ "username": [username], "resultsLimit": limit }),
            RunLimits { max_items: limit },
        )
        .await?;

    if items.is_empty() {
        return Err(ToolError::not_found(format!(
            "no posts found for @{username}"
        )));
    }

    let posts: Vec<Value> = items.iter().map(|raw| shape_post(username, raw)).collect();
    let payload = json!({
        "username": username,
        "totalFetched": posts.len(),
        "summary": {
            "avgLikes": avg_of(&posts, "likes"),
            "avgComments": avg_of(&posts, "comments"),
        },
        "posts": posts.clone(),
    });

    // Individual posts also land in the domain collection for analytics.
    if let Err(e) = deps.store.bulk_upsert(POSTS_COLL, "id", posts).await {
        tracing::warn!(username, error = %e, "post collection upsert failed");
    }

    deps.cache.write(CacheKind::Post, &key, payload.clone()).await;
    Ok((payload, false))
}

pub(super) fn shape_post(username: &str, raw: &Value) -> Value {
    json!({
        "id": raw.get("id").cloned().unwrap_or(Value::Null),
        "shortCode": raw.get("shortCode").cloned().unwrap_or(Value::Null),
        "caption": raw.get("caption").and_then(Value::as_str).unwrap_or(""),
        "likes": raw.get("likesCount").and_then(Value::as_u64).unwrap_or(0),
        "comments": raw.get("commentsCount").and_then(Value::as_u64).unwrap_or(0),
        "timestamp": raw.get("timestamp").cloned().unwrap_or(Value::Null),
        "url": raw.get("url").cloned().unwrap_or(Value::Null),
        "ownerUsername": username,
        "fetchedAt": Utc::now().to_rfc3339(),
    })
}

pub(super) fn avg_of(items: &[Value], field: &str) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let total: u64 = items
        .iter()
        .filter_map(|p| p.get(field).and_then(Value::as_u64))
        .sum();
    (total as f64 / items.len() as f64 * 10.0).round() / 10.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_user_posts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GetUserPosts {
    deps: ToolDeps,
}

impl GetUserPosts {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for GetUserPosts {
    fn name(&self) -> &'static str {
        "get_user_posts"
    }

    fn label(&self) -> &'static str {
        "Fetching recent posts"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_user_posts".into(),
            description: "Fetch a creator's recent posts with engagement counts.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "username": { "type": "string", "description": "Creator username" },
                    "limit": { "type": "integer", "description": "How many posts (1-50, default 12)" }
                },
                "required": ["username"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: PostsArgs = parse_args(args)?;
        let username = normalize_username(&args.username)?;
        let limit = check_limit(args.limit.unwrap_or(DEFAULT_LIMIT), 1, MAX_LIMIT)?;

        let (payload, hit) = fetch_posts(&self.deps, &username, limit).await?;
        Ok(with_cache_hit(payload, hit))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_user_reels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GetUserReels {
    deps: ToolDeps,
}

impl GetUserReels {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for GetUserReels {
    fn name(&self) -> &'static str {
        "get_user_reels"
    }

    fn label(&self) -> &'static str {
        "Fetching reels"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_user_reels".into(),
            description: "Fetch a creator's recent reels with plays and engagement.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "username": { "type": "string", "description": "Creator username" },
                    "limit": { "type": "integer", "description": "How many reels (1-50, default 12)" }
                },
                "required": ["username"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: PostsArgs = parse_args(args)?;
        let username = normalize_username(&args.username)?;
        let limit = check_limit(args.limit.unwrap_or(DEFAULT_LIMIT), 1, MAX_LIMIT)?;
        let key = format!("{username}:{limit}");

        if let Some(doc) = self.deps.cache.read(CacheKind::Reel, &key, Utc::now()).await {
            return Ok(with_cache_hit(doc, true));
        }

        let items = self
            .deps
            .actor
            .run(
                &self.deps.config.actor.reels_actor,
                json!({ "username": [username], "resultsLimit": limit }),
                RunLimits { max_items: limit },
            )
            .await?;

        if items.is_empty() {
            return Err(ToolError::not_found(format!(
                "no reels found for @{username}"
            )));
        }

        let reels: Vec<Value> = items.iter().map(|raw| shape_reel(&username, raw)).collect();
        let payload = json!({
            "username": username,
            "totalFetched": reels.len(),
            "summary": {
                "avgPlays": avg_of(&reels, "plays"),
                "avgLikes": avg_of(&reels, "likes"),
            },
            "reels": reels,
        });

        self.deps
            .cache
            .write(CacheKind::Reel, &key, payload.clone())
            .await;
        Ok(with_cache_hit(payload, false))
    }
}

fn shape_reel(username: &str, raw: &Value) -> Value {
    json!({
        "id": raw.get("id").cloned().unwrap_or(Value::Null),
        "caption": raw.get("caption").and_then(Value::as_str).unwrap_or(""),
        "plays": raw.get("videoPlayCount").and_then(Value::as_u64).unwrap_or(0),
        "likes": raw.get("likesCount").and_then(Value::as_u64).unwrap_or(0),
        "comments": raw.get("commentsCount").and_then(Value::as_u64).unwrap_or(0),
        "duration": raw.get("videoDuration").cloned().unwrap_or(Value::Null),
        "url": raw.get("url").cloned().unwrap_or(Value::Null),
        "ownerUsername": username,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// check_user_topic_posts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CheckUserTopicPosts {
    deps: ToolDeps,
}

impl CheckUserTopicPosts {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for CheckUserTopicPosts {
    fn name(&self) -> &'static str {
        "check_user_topic_posts"
    }

    fn label(&self) -> &'static str {
        "Scanning creator content"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "check_user_topic_posts".into(),
            description: "Scan a creator's recent posts for mentions of a topic or brand."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "username": { "type": "string", "description": "Creator username" },
                    "topic": { "type": "string", "description": "Topic, brand, or keyword to look for" },
                    "limit": { "type": "integer", "description": "How many posts to scan (1-50, default 12)" }
                },
                "required": ["username", "topic"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: TopicArgs = parse_args(args)?;
        let username = normalize_username(&args.username)?;
        let limit = check_limit(args.limit.unwrap_or(DEFAULT_LIMIT), 1, MAX_LIMIT)?;
        let topic = args.topic.trim().to_lowercase();
        if topic.is_empty() {
            return Err(ToolError::validation("topic must not be empty"));
        }

        let (payload, hit) = fetch_posts(&self.deps, &username, limit).await?;
        let posts = payload
            .get("posts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let terms: Vec<&str> = topic.split_whitespace().collect();
        let matches: Vec<Value> = posts
            .iter()
            .filter(|post| {
                let caption = post
                    .get("caption")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                terms.iter().any(|term| caption.contains(term))
            })
            .cloned()
            .collect();

        Ok(json!({
            "username": username,
            "topic": topic,
            "matchCount": matches.len(),
            "totalScanned": posts.len(),
            "posts": matches,
            "cacheHit": hit,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_post_carries_owner_and_engagement() {
        let raw = json!({
            "id": "p1",
            "caption": "Launch day!",
            "likesCount": 10,
            "commentsCount": 2,
        });
        let shaped = shape_post("acme", &raw);
        assert_eq!(shaped["ownerUsername"], "acme");
        assert_eq!(shaped["likes"], 10);
        assert_eq!(shaped["caption"], "Launch day!");
        assert!(shaped.get("fetchedAt").is_some());
    }

    #[test]
    fn avg_rounds_to_one_decimal() {
        let posts = vec![json!({"likes": 10}), json!({"likes": 11}), json!({"likes": 10})];
        assert_eq!(avg_of(&posts, "likes"), 10.3);
        assert_eq!(avg_of(&[], "likes"), 0.0);
    }

    #[test]
    fn shape_reel_maps_video_fields() {
        let raw = json!({"id": "r1", "videoPlayCount": 500, "videoDuration": 12.8});
        let shaped = shape_reel("acme", &raw);
        assert_eq!(shaped["plays"], 500);
        assert_eq!(shaped["duration"], 12.8);
    }
}
