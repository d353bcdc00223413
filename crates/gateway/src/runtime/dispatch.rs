//! Tool registry and dispatcher.
//!
//! A tool is a name, a human label, a parameter schema for the LLM, and a
//! handler that validates its own arguments into a typed struct before doing
//! any work. The dispatcher wraps every invocation with timing, cache-hit
//! extraction, and error classification; tool errors never propagate past it
//! — they come back as `{error, code?}` payloads the model can react to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use bp_domain::tool::{ToolCallInfo, ToolDefinition, ToolError};

use crate::transport::ChatEvent;

/// A named, validated, typed function exposed to the model.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Human-readable label shown in tool activity events.
    fn label(&self) -> &'static str;

    fn definition(&self) -> ToolDefinition;

    /// Run the tool. Implementations deserialize `args` into their own typed
    /// struct first and must return a structured payload or a classified
    /// [`ToolError`] — never a bare panic/string.
    async fn run(&self, args: Value) -> Result<Value, ToolError>;
}

/// Hook invoked after a successful tool return with `(name, &payload)`.
/// Side effects that would otherwise couple tools to each other (the
/// monitoring auto-enroll) live here.
pub type PostToolHook = Arc<dyn Fn(&str, &Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Name → tool map plus the post-tool hooks.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    order: Vec<&'static str>,
    hooks: Vec<PostToolHook>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.insert(name, tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn add_hook(&mut self, hook: PostToolHook) {
        self.hooks.push(hook);
    }

    /// Tool definitions for the LLM, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Human label for a tool name; unknown names fall back to the name.
    pub fn label(&self, name: &str) -> String {
        self.tools
            .get(name)
            .map(|t| t.label().to_string())
            .unwrap_or_else(|| name.to_string())
    }

    /// Invoke one tool call.
    ///
    /// `emit` carries the event channel for per-call `tool_done` emission;
    /// the orchestrator passes `None` for calls that are part of a grouped
    /// batch (those get one synthetic `tool_done` after the batch settles).
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        emit: Option<&mpsc::Sender<ChatEvent>>,
    ) -> (Value, ToolCallInfo) {
        let label = self.label(name);

        let Some(tool) = self.tools.get(name) else {
            let message = format!("Unknown tool: {name}");
            let info = ToolCallInfo {
                name: name.to_string(),
                label,
                duration_ms: 0,
                cache_hit: None,
                error: Some(message.clone()),
            };
            if let Some(tx) = emit {
                let _ = tx.send(ChatEvent::ToolDone { info: info.clone() }).await;
            }
            return (json!({ "error": message }), info);
        };

        let start = Instant::now();
        let result = tool.run(args).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (payload, cache_hit, error) = match result {
            Ok(payload) => {
                // Convention: handlers report cache status inside the payload.
                let cache_hit = payload.get("cacheHit").and_then(Value::as_bool);
                for hook in &self.hooks {
                    hook(name, &payload).await;
                }
                (payload, cache_hit, None)
            }
            Err(tool_err) => {
                tracing::debug!(tool = name, error = %tool_err, "tool call failed");
                let mut obj = serde_json::Map::new();
                obj.insert("error".into(), Value::String(tool_err.message.clone()));
                if let Some(code) = &tool_err.code {
                    obj.insert("code".into(), Value::String(code.clone()));
                }
                (Value::Object(obj), None, Some(tool_err.message))
            }
        };

        let info = ToolCallInfo {
            name: name.to_string(),
            label,
            duration_ms,
            cache_hit,
            error,
        };

        if let Some(tx) = emit {
            let _ = tx.send(ChatEvent::ToolDone { info: info.clone() }).await;
        }

        (payload, info)
    }
}
