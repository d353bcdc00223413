//! Gemini adapter.
//!
//! Implements `streamGenerateContent?alt=sse`: turns map to Gemini
//! `contents`, tool declarations to `functionDeclarations`, and the response
//! stream is parsed into delta [`Part`]s with thought parts flagged via
//! `thought: true`. The assembled candidate travels in the closing
//! [`StreamEvent::Done`].

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::{json, Value};

use bp_domain::cancel::CancelToken;
use bp_domain::config::LlmConfig;
use bp_domain::error::{Error, Result};
use bp_domain::stream::{BoxStream, StreamEvent};
use bp_domain::turn::{Part, Role, Turn};

use crate::sse::drain_frames;
use crate::traits::{GenerateRequest, LlmClient};
use crate::util::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An adapter for the Gemini streaming API.
#[derive(Debug)]
pub struct GeminiClient {
    model: String,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

/// The process-wide client, lazily initialized on first use. Configuration is
/// immutable for the process lifetime; a missing API key is the first-use
/// fatal error.
pub fn shared(cfg: &LlmConfig) -> Result<Arc<GeminiClient>> {
    static SHARED: OnceCell<Arc<GeminiClient>> = OnceCell::new();
    SHARED
        .get_or_try_init(|| GeminiClient::from_config(cfg).map(Arc::new))
        .cloned()
}

impl GeminiClient {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".into()))?;

        // Connect timeout only — the stream itself may legitimately run for
        // minutes; the request deadline is owned by the transport layer.
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            model: cfg.model.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        )
    }

    fn build_body(&self, req: &GenerateRequest<'_>) -> Value {
        let contents: Vec<Value> = req.history.iter().map(turn_to_content).collect();

        let mut body = json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": req.system }] },
            "generationConfig": {
                "temperature": 0.3,
                "thinkingConfig": { "includeThoughts": true },
            },
        });

        if !req.tools.is_empty() {
            let declarations: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        body
    }
}

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    async fn stream_generate(
        &self,
        req: GenerateRequest<'_>,
        cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(&req);
        let url = self.stream_url();
        tracing::debug!(
            model = %self.model,
            turns = req.history.len(),
            tools = req.tools.len(),
            "opening generation stream"
        );

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "gemini {}: {}",
                status,
                clip(&text, 300)
            )));
        }

        let stream = async_stream::stream! {
            // Owning the response inside the generator means dropping the
            // stream (or breaking out on cancel) tears down the upstream
            // HTTP request.
            let mut response = response;
            let mut buffer = String::new();
            let mut assembled: Vec<Part> = Vec::new();

            loop {
                if cancel.is_cancelled() {
                    yield Err(Error::Cancelled);
                    return;
                }
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for payload in drain_frames(&mut buffer) {
                            match parse_payload(&payload, &mut assembled) {
                                Ok(parts) => {
                                    for part in parts {
                                        yield Ok(StreamEvent::Part(part));
                                    }
                                }
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        // Flush a trailing partial frame.
                        if !buffer.trim().is_empty() {
                            buffer.push_str("\n\n");
                            for payload in drain_frames(&mut buffer) {
                                match parse_payload(&payload, &mut assembled) {
                                    Ok(parts) => {
                                        for part in parts {
                                            yield Ok(StreamEvent::Part(part));
                                        }
                                    }
                                    Err(e) => {
                                        yield Err(e);
                                        return;
                                    }
                                }
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        return;
                    }
                }
            }

            yield Ok(StreamEvent::Done { candidate: assembled });
        };

        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn turn_to_content(turn: &Turn) -> Value {
    let role = match turn.role {
        Role::User => "user",
        Role::Model => "model",
    };

    let parts: Vec<Value> = turn
        .parts
        .iter()
        .map(|part| match part {
            Part::Text { text } => json!({ "text": text }),
            Part::Thought { text } => json!({ "text": text, "thought": true }),
            Part::FunctionCall { name, args } => {
                json!({ "functionCall": { "name": name, "args": args } })
            }
            Part::FunctionResponse { name, payload } => {
                json!({ "functionResponse": { "name": name, "response": payload } })
            }
        })
        .collect();

    json!({ "role": role, "parts": parts })
}

/// Parse one SSE data payload into delta parts, folding them into the
/// assembled candidate (consecutive text/thought deltas merge).
fn parse_payload(data: &str, assembled: &mut Vec<Part>) -> Result<Vec<Part>> {
    if data == "[DONE]" {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(data)
        .map_err(|e| Error::Upstream(format!("gemini sent unparseable chunk: {e}")))?;

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(Error::Upstream(format!("gemini: {message}")));
    }

    let mut deltas = Vec::new();
    let Some(parts) = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
    else {
        return Ok(deltas);
    };

    for raw in parts {
        if let Some(call) = raw.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            let part = Part::FunctionCall { name, args };
            assembled.push(part.clone());
            deltas.push(part);
        } else if let Some(text) = raw.get("text").and_then(Value::as_str) {
            let is_thought = raw
                .get("thought")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let part = if is_thought {
                Part::thought(text)
            } else {
                Part::text(text)
            };
            merge_text(assembled, &part);
            deltas.push(part);
        }
    }

    Ok(deltas)
}

/// Append a text/thought delta to the candidate, merging into the previous
/// part when both are the same kind.
fn merge_text(assembled: &mut Vec<Part>, delta: &Part) {
    match (assembled.last_mut(), delta) {
        (Some(Part::Text { text: prev }), Part::Text { text }) => prev.push_str(text),
        (Some(Part::Thought { text: prev }), Part::Thought { text }) => prev.push_str(text),
        _ => assembled.push(delta.clone()),
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
