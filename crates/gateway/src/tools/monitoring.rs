//! Campaign post monitoring: engagement snapshots over time, plus the
//! auto-enroll hook that registers a creator's top posts after any post
//! fetch. The hook lives on the dispatcher (not inside the fetch tools) so
//! the side effect is testable in isolation and free of tool-to-tool
//! coupling.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use bp_actor::RunLimits;
use bp_domain::tool::{ToolDefinition, ToolError};
use bp_store::{CacheKind, Collections, Filter, FindOptions, CACHED_AT_FIELD};

use crate::runtime::dispatch::{PostToolHook, Tool};

use super::{parse_args, ToolDeps, MONITORED_COLL, POSTS_COLL};

const SNAPSHOT_HISTORY_LIMIT: usize = 10;
const AUTO_ENROLL_TOP_N: usize = 3;

#[derive(Debug, Deserialize)]
struct MonitorArgs {
    #[serde(rename = "postId")]
    post_id: String,
    #[serde(default)]
    url: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// monitor_post
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MonitorPost {
    deps: ToolDeps,
}

impl MonitorPost {
    pub fn new(deps: ToolDeps) -> Self {
        Self { deps }
    }
}

#[async_trait::async_trait]
impl Tool for MonitorPost {
    fn name(&self) -> &'static str {
        "monitor_post"
    }

    fn label(&self) -> &'static str {
        "Monitoring campaign post"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "monitor_post".into(),
            description: "Snapshot a post's current engagement and register it for \
                          ongoing monitoring. Returns the snapshot history."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "postId": { "type": "string", "description": "Post ID" },
                    "url": { "type": "string", "description": "Post URL, if known" }
                },
                "required": ["postId"]
            }),
        }
    }

    async fn run(&self, args: Value) -> Result<Value, ToolError> {
        let args: MonitorArgs = parse_args(args)?;
        let post_id = args.post_id.trim().to_string();
        if post_id.is_empty() {
            return Err(ToolError::validation("postId must not be empty"));
        }
        let now = Utc::now();

        let registered = self
            .deps
            .store
            .find_one(MONITORED_COLL, &post_id)
            .await
            .map_err(ToolError::from)?;

        let url = resolve_url(&self.deps, &post_id, args.url.as_deref(), registered.as_ref())
            .await
            .ok_or_else(|| {
                ToolError::not_found(format!("no known URL for post {post_id}"))
            })?;

        let items = self
            .deps
            .actor
            .run(
                &self.deps.config.actor.posts_actor,
                json!({ "directUrls": [url.as_str()] }),
                RunLimits { max_items: 1 },
            )
            .await?;
        let current = items
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::not_found(format!("post {post_id} is gone upstream")))?;

        let likes = current.get("likesCount").and_then(Value::as_u64).unwrap_or(0);
        let comments = current
            .get("commentsCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        // Append to the snapshot history (180-day retention).
        let snapshot_key = format!("{post_id}:{}", now.timestamp());
        self.deps
            .cache
            .write(
                CacheKind::Snapshot,
                &snapshot_key,
                json!({ "postId": post_id.as_str(), "likes": likes, "comments": comments }),
            )
            .await;

        // Refresh the monitoring registration, keeping registeredAt stable.
        let registration = match registered {
            Some(mut doc) => {
                if let Some(obj) = doc.as_object_mut() {
                    obj.insert("lastCheckedAt".into(), json!(now.to_rfc3339()));
                }
                doc
            }
            None => json!({
                "postId": post_id.as_str(),
                "url": url,
                "registeredAt": now.to_rfc3339(),
                "lastCheckedAt": now.to_rfc3339(),
                "state": "active",
            }),
        };
        self.deps
            .store
            .upsert(MONITORED_COLL, &post_id, registration)
            .await
            .map_err(ToolError::from)?;

        let history = self
            .deps
            .store
            .find(
                CacheKind::Snapshot.collection(),
                &Filter::new().eq("postId", post_id.as_str()),
                &FindOptions {
                    sort_desc: Some(CACHED_AT_FIELD.into()),
                    limit: Some(SNAPSHOT_HISTORY_LIMIT),
                },
            )
            .await
            .map_err(ToolError::from)?;
        let snapshot_count = history.len();

        Ok(json!({
            "postId": post_id,
            "snapshot": { "likes": likes, "comments": comments },
            "snapshots": history,
            "snapshotCount": snapshot_count,
            "cacheHit": false,
        }))
    }
}

async fn resolve_url(
    deps: &ToolDeps,
    post_id: &str,
    arg_url: Option<&str>,
    registered: Option<&Value>,
) -> Option<String> {
    if let Some(url) = arg_url {
        if !url.trim().is_empty() {
            return Some(url.trim().to_string());
        }
    }
    if let Some(url) = registered
        .and_then(|doc| doc.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }
    deps.store
        .find_one(POSTS_COLL, post_id)
        .await
        .ok()
        .flatten()
        .and_then(|doc| doc.get("url").and_then(Value::as_str).map(String::from))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auto-enroll hook
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// After a successful post fetch, enroll the creator's top posts (by likes)
/// into the monitored set. Existing registrations keep their `registeredAt`.
pub fn auto_enroll_hook(store: Arc<dyn Collections>) -> PostToolHook {
    Arc::new(move |tool_name, payload| {
        let store = store.clone();
        let candidates = enroll_candidates(tool_name, payload);
        Box::pin(async move {
            for (id, doc) in candidates {
                match store.find_one(MONITORED_COLL, &id).await {
                    Ok(None) => {
                        tracing::debug!(post_id = %id, "auto-enrolling post for monitoring");
                        if let Err(e) = store.upsert(MONITORED_COLL, &id, doc).await {
                            tracing::warn!(post_id = %id, error = %e, "auto-enroll failed");
                        }
                    }
                    Ok(Some(_)) => {}
                    Err(e) => {
                        tracing::warn!(post_id = %id, error = %e, "auto-enroll lookup failed");
                    }
                }
            }
        })
    })
}

fn enroll_candidates(tool_name: &str, payload: &Value) -> Vec<(String, Value)> {
    if !matches!(tool_name, "get_user_posts" | "check_user_topic_posts") {
        return Vec::new();
    }
    let Some(posts) = payload.get("posts").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut ranked: Vec<&Value> = posts.iter().collect();
    ranked.sort_by_key(|p| std::cmp::Reverse(p.get("likes").and_then(Value::as_u64).unwrap_or(0)));

    let now = Utc::now().to_rfc3339();
    ranked
        .into_iter()
        .take(AUTO_ENROLL_TOP_N)
        .filter_map(|post| {
            let id = post.get("id").and_then(Value::as_str)?.to_string();
            let doc = json!({
                "postId": id.as_str(),
                "url": post.get("url").cloned().unwrap_or(Value::Null),
                "username": post.get("ownerUsername").cloned().unwrap_or(Value::Null),
                "registeredAt": now.as_str(),
                "lastCheckedAt": now.as_str(),
                "state": "active",
            });
            Some((id, doc))
        })
        .collect()
}
