//! Hashtag fetching and aggregate stats.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use bp_actor::RunLimits;
use bp_domain::tool::{ToolDefinition, ToolError};
use bp_store::{CacheKind, Filter, FindOptions};

use crate::runtime::dispatch::Tool;

use super::{
    check_limit, normalize_hashtag, parse_args, with_cache_hit, ToolDeps, HASHTAG_POSTS_COLL,
};

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
struct HashtagArgs {
    hashtag: String,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StatsArgs {
    hashtag: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_hashtag_posts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GetHashtagPosts {
    deps: ToolDeps,
}

impl GetHashtagPosts {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for GetHashtagPosts {
    fn name(&self) -> &'static str {
        "get_hashtag_posts"
    }

    fn label(&self) -> &'static str {
        "Collecting hashtag posts"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_hashtag_posts".into(),
            description: "Fetch recent posts under a hashtag.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "hashtag": { "type": "string", "description": "Hashtag, with or without #" },
                    "limit": { "type": "integer", "description": "How many posts (1-50, default 20)" }
                },
                "required": ["hashtag"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: HashtagArgs = parse_args(args)?;
        let hashtag = normalize_hashtag(&args.hashtag)?;
        let limit = check_limit(args.limit.unwrap_or(DEFAULT_LIMIT), 1, MAX_LIMIT)?;
        let key = format!("{hashtag}:{limit}");

        if let Some(doc) = self
            .deps
            .cache
            .read(CacheKind::HashtagPosts, &key, Utc::now())
            .await
        {
            return Ok(with_cache_hit(doc, true));
        }

        let items = self
            .deps
            .actor
            .run(
                &self.deps.config.actor.hashtag_actor,
                json!({ "hashtags": [hashtag], "resultsLimit": limit }),
                RunLimits { max_items: limit },
            )
            .await?;

        if items.is_empty() {
            return Err(ToolError::not_found(format!(
                "no posts found under #{hashtag}"
            )));
        }

        let posts: Vec<Value> = items
            .iter()
            .map(|raw| shape_hashtag_post(&hashtag, raw))
            .collect();
        let payload = json!({
            "hashtag": hashtag.as_str(),
            "totalFetched": posts.len(),
            "posts": posts.clone(),
        });

        if let Err(e) = self
            .deps
            .store
            .bulk_upsert(HASHTAG_POSTS_COLL, "id", posts)
            .await
        {
            tracing::warn!(hashtag = %hashtag, error = %e, "hashtag post upsert failed");
        }

        self.deps
            .cache
            .write(CacheKind::HashtagPosts, &key, payload.clone())
            .await;
        Ok(with_cache_hit(payload, false))
    }
}

fn shape_hashtag_post(hashtag: &str, raw: &Value) -> Value {
    json!({
        "id": raw.get("id").cloned().unwrap_or(Value::Null),
        "caption": raw.get("caption").and_then(Value::as_str).unwrap_or(""),
        "likes": raw.get("likesCount").and_then(Value::as_u64).unwrap_or(0),
        "comments": raw.get("commentsCount").and_then(Value::as_u64).unwrap_or(0),
        "ownerUsername": raw.get("ownerUsername").cloned().unwrap_or(Value::Null),
        "url": raw.get("url").cloned().unwrap_or(Value::Null),
        "hashtag": hashtag,
        "fetchedAt": Utc::now().to_rfc3339(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_hashtag_stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GetHashtagStats {
    deps: ToolDeps,
}

impl GetHashtagStats {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for GetHashtagStats {
    fn name(&self) -> &'static str {
        "get_hashtag_stats"
    }

    fn label(&self) -> &'static str {
        "Analysing hashtag"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_hashtag_stats".into(),
            description: "Aggregate engagement stats over collected posts of a hashtag. \
                          Requires get_hashtag_posts to have run for the hashtag first."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "hashtag": { "type": "string", "description": "Hashtag, with or without #" }
                },
                "required": ["hashtag"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: StatsArgs = parse_args(args)?;
        let hashtag = normalize_hashtag(&args.hashtag)?;

        if let Some(doc) = self
            .deps
            .cache
            .read(CacheKind::HashtagStats, &hashtag, Utc::now())
            .await
        {
            return Ok(with_cache_hit(doc, true));
        }

        let posts = self
            .deps
            .store
            .find(
                HASHTAG_POSTS_COLL,
                &Filter::new().eq("hashtag", hashtag.as_str()),
                &FindOptions::default(),
            )
            .await
            .map_err(ToolError::from)?;

        if posts.is_empty() {
            return Err(ToolError::not_found(format!(
                "no collected posts for #{hashtag} — run get_hashtag_posts first"
            )));
        }

        let payload = compute_stats(&hashtag, &posts);
        self.deps
            .cache
            .write(CacheKind::HashtagStats, &hashtag, payload.clone())
            .await;
        Ok(with_cache_hit(payload, false))
    }
}

fn compute_stats(hashtag: &str, posts: &[Value]) -> Value {
    let likes: Vec<u64> = posts
        .iter()
        .map(|p| p.get("likes").and_then(Value::as_u64).unwrap_or(0))
        .collect();
    let comments: Vec<u64> = posts
        .iter()
        .map(|p| p.get("comments").and_then(Value::as_u64).unwrap_or(0))
        .collect();
    let n = posts.len() as f64;

    let mut creators: std::collections::HashMap<&str, u64> = std::collections::HashMap::new();
    for post in posts {
        if let Some(owner) = post.get("ownerUsername").and_then(Value::as_str) {
            *creators.entry(owner).or_insert(0) += 1;
        }
    }
    let mut top: Vec<(&str, u64)> = creators.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    top.truncate(5);

    json!({
        "hashtag": hashtag,
        "postCount": posts.len(),
        "totalLikes": likes.iter().sum::<u64>(),
        "avgLikes": (likes.iter().sum::<u64>() as f64 / n * 10.0).round() / 10.0,
        "avgComments": (comments.iter().sum::<u64>() as f64 / n * 10.0).round() / 10.0,
        "topCreators": top
            .into_iter()
            .map(|(name, count)| json!({ "username": name, "posts": count }))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_aggregate_and_rank_creators() {
        let posts = vec![
            json!({"likes": 10, "comments": 1, "ownerUsername": "a"}),
            json!({"likes": 20, "comments": 3, "ownerUsername": "b"}),
            json!({"likes": 30, "comments": 2, "ownerUsername": "a"}),
        ];
        let stats = compute_stats("launch", &posts);
        assert_eq!(stats["postCount"], 3);
        assert_eq!(stats["totalLikes"], 60);
        assert_eq!(stats["avgLikes"], 20.0);
        assert_eq!(stats["topCreators"][0]["username"], "a");
        assert_eq!(stats["topCreators"][0]["posts"], 2);
    }

    #[test]
    fn hashtag_post_shape_keeps_owner() {
        let raw = json!({"id": "h1", "ownerUsername": "acme", "likesCount": 7});
        let shaped = shape_hashtag_post("launch", &raw);
        assert_eq!(shaped["hashtag"], "launch");
        assert_eq!(shaped["ownerUsername"], "acme");
        assert_eq!(shaped["likes"], 7);
    }
}
