//! Engagement analytics over collected posts. These tools aggregate what the
//! fetch tools already stored; they never call the upstream actor.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use bp_domain::tool::{ToolDefinition, ToolError};
use bp_store::{CacheKind, Filter, FindOptions};

use crate::runtime::dispatch::Tool;

use super::{
    check_limit, normalize_hashtag, normalize_username, parse_args, ToolDeps,
    HASHTAG_POSTS_COLL, POSTS_COLL,
};

#[derive(Debug, Deserialize)]
struct SummaryArgs {
    username: String,
}

#[derive(Debug, Deserialize)]
struct RankArgs {
    hashtag: String,
    #[serde(default)]
    limit: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_engagement_summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GetEngagementSummary {
    deps: ToolDeps,
}

impl GetEngagementSummary {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for GetEngagementSummary {
    fn name(&self) -> &'static str {
        "get_engagement_summary"
    }

    fn label(&self) -> &'static str {
        "Computing engagement summary"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_engagement_summary".into(),
            description: "Summarize a creator's engagement over their collected posts. \
                          Requires get_user_posts to have run for the creator first."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "username": { "type": "string", "description": "Creator username" }
                },
                "required": ["username"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: SummaryArgs = parse_args(args)?;
        let username = normalize_username(&args.username)?;

        let posts = self
            .deps
            .store
            .find(
                POSTS_COLL,
                &Filter::new().eq("ownerUsername", username.as_str()),
                &FindOptions::default(),
            )
            .await
            .map_err(ToolError::from)?;

        if posts.is_empty() {
            return Err(ToolError::not_found(format!(
                "no collected posts for @{username} — run get_user_posts first"
            )));
        }

        let n = posts.len() as f64;
        let total_likes: u64 = sum_of(&posts, "likes");
        let total_comments: u64 = sum_of(&posts, "comments");
        let avg_likes = (total_likes as f64 / n * 10.0).round() / 10.0;
        let avg_comments = (total_comments as f64 / n * 10.0).round() / 10.0;

        // Engagement rate needs the follower count; only available when the
        // profile is cached and fresh.
        let engagement_rate = self
            .deps
            .cache
            .read(CacheKind::Profile, &username, Utc::now())
            .await
            .and_then(|profile| profile.get("followers").and_then(Value::as_u64))
            .filter(|followers| *followers > 0)
            .map(|followers| {
                ((avg_likes + avg_comments) / followers as f64 * 10_000.0).round() / 100.0
            });

        let best = posts
            .iter()
            .max_by_key(|p| p.get("likes").and_then(Value::as_u64).unwrap_or(0));

        Ok(json!({
            "username": username,
            "postCount": posts.len(),
            "totalLikes": total_likes,
            "avgLikes": avg_likes,
            "avgComments": avg_comments,
            "engagementRatePct": engagement_rate,
            "bestPost": best.map(|p| json!({
                "id": p.get("id").cloned().unwrap_or(Value::Null),
                "likes": p.get("likes").cloned().unwrap_or(Value::Null),
                "url": p.get("url").cloned().unwrap_or(Value::Null),
            })),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// rank_influencers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RankInfluencers {
    deps: ToolDeps,
}

impl RankInfluencers {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for RankInfluencers {
    fn name(&self) -> &'static str {
        "rank_influencers"
    }

    fn label(&self) -> &'static str {
        "Ranking influencers"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "rank_influencers".into(),
            description: "Rank creators seen under a hashtag by engagement score. \
                          Requires get_hashtag_posts to have run for the hashtag first."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "hashtag": { "type": "string", "description": "Hashtag, with or without #" },
                    "limit": { "type": "integer", "description": "How many creators (1-25, default 10)" }
                },
                "required": ["hashtag"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: RankArgs = parse_args(args)?;
        let hashtag = normalize_hashtag(&args.hashtag)?;
        let limit = check_limit(args.limit.unwrap_or(10), 1, 25)? as usize;

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

        let results = rank(&posts, limit);
        Ok(json!({
            "hashtag": hashtag,
            "totalCreators": results.len(),
            "results": results,
        }))
    }
}

/// Score creators by engagement over their posts. Comments weigh double:
/// they cost the audience more than a like does.
fn rank(posts: &[Value], limit: usize) -> Vec<Value> {
    use std::collections::HashMap;

    struct Acc {
        posts: u64,
        likes: u64,
        comments: u64,
    }

    let mut by_creator: HashMap<&str, Acc> = HashMap::new();
    for post in posts {
        let Some(owner) = post.get("ownerUsername").and_then(Value::as_str) else {
            continue;
        };
        let acc = by_creator.entry(owner).or_insert(Acc {
            posts: 0,
            likes: 0,
            comments: 0,
        });
        acc.posts += 1;
        acc.likes += post.get("likes").and_then(Value::as_u64).unwrap_or(0);
        acc.comments += post.get("comments").and_then(Value::as_u64).unwrap_or(0);
    }

    let mut scored: Vec<(String, f64, Acc)> = by_creator
        .into_iter()
        .map(|(name, acc)| {
            let avg_likes = acc.likes as f64 / acc.posts as f64;
            let avg_comments = acc.comments as f64 / acc.posts as f64;
            (name.to_string(), avg_likes + 2.0 * avg_comments, acc)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(username, score, acc)| {
            json!({
                "username": username,
                "score": (score * 10.0).round() / 10.0,
                "posts": acc.posts,
                "avgLikes": (acc.likes as f64 / acc.posts as f64 * 10.0).round() / 10.0,
                "avgComments": (acc.comments as f64 / acc.posts as f64 * 10.0).round() / 10.0,
            })
        })
        .collect()
}

fn sum_of(items: &[Value], field: &str) -> u64 {
    items
        .iter()
        .filter_map(|p| p.get(field).and_then(Value::as_u64))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_orders_by_weighted_engagement() {
        let posts = vec![
            json!({"ownerUsername": "likes_heavy", "likes": 100, "comments": 0}),
            json!({"ownerUsername": "comments_heavy", "likes": 10, "comments": 60}),
        ];
        let ranked = rank(&posts, 10);
        assert_eq!(ranked[0]["username"], "comments_heavy");
        assert_eq!(ranked[0]["score"], 130.0);
        assert_eq!(ranked[1]["score"], 100.0);
    }

    #[test]
    fn rank_averages_across_multiple_posts() {
        let posts = vec![
            json!({"ownerUsername": "a", "likes": 10, "comments": 0}),
            json!({"ownerUsername": "a", "likes": 30, "comments": 0}),
        ];
        let ranked = rank(&posts, 10);
        assert_eq!(ranked[0]["posts"], 2);
        assert_eq!(ranked[0]["avgLikes"], 20.0);
    }

    #[test]
    fn rank_respects_limit() {
        let posts: Vec<Value> = (0..8)
            .map(|i| json!({"ownerUsername": format!("u{i}"), "likes": i, "comments": 0}))
            .collect();
        assert_eq!(rank(&posts, 3).len(), 3);
    }
}
