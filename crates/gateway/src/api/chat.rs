//! Chat endpoints.
//!
//! - `POST /chat`        — non-streaming: drains the event channel into one
//!   `{response, sessionId, toolCalls, timestamp}` object.
//! - `POST /chat/stream` — long-lived `text/event-stream` response carrying
//!   the framed transport events with a 15 s heartbeat.
//! - `DELETE /chat/{session_id}` — explicit session deletion.
//!
//! Both chat routes share the 180 s request deadline: on expiry the cancel
//! token trips (which aborts the upstream LLM call) and an error is
//! surfaced. A client that disconnects mid-stream does not cancel the turn;
//! the orchestration finishes so its audit and history persist.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use bp_domain::cancel::CancelToken;
use bp_domain::ids::parse_session_id;
use bp_domain::tool::ToolCallInfo;
use bp_domain::turn::Turn;

use crate::runtime::{run_chat, ChatInput};
use crate::state::AppState;
use crate::transport::{self, ChatEvent};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    let (session_id, history) = match resolve_session(&state, &body) {
        Ok(resolved) => resolved,
        Err(message) => return bad_request(message),
    };

    let cancel = CancelToken::new();
    let mut rx = run_chat(
        state,
        ChatInput {
            session_id,
            history,
            message: body.message,
        },
        cancel.clone(),
    );

    let drain = async {
        let mut answer: Option<(String, Vec<ToolCallInfo>)> = None;
        let mut error: Option<String> = None;
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Answer { text, tool_calls } => answer = Some((text, tool_calls)),
                ChatEvent::Error { message } => error = Some(message),
                _ => {}
            }
        }
        (answer, error)
    };

    match tokio::time::timeout(REQUEST_TIMEOUT, drain).await {
        Ok((Some((response, tool_calls)), _)) => Json(json!({
            "response": response,
            "sessionId": session_id,
            "toolCalls": tool_calls,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Ok((None, error)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": error.unwrap_or_else(|| "no answer produced".into()),
            })),
        )
            .into_response(),
        Err(_) => {
            cancel.cancel();
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({ "error": "request timed out" })),
            )
                .into_response()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Response {
    let (session_id, history) = match resolve_session(&state, &body) {
        Ok(resolved) => resolved,
        Err(message) => return bad_request(message),
    };

    let cancel = CancelToken::new();
    let rx = run_chat(
        state,
        ChatInput {
            session_id,
            history,
            message: body.message,
        },
        cancel.clone(),
    );

    let headers = [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    (headers, Body::from_stream(sse_stream(session_id, rx, cancel))).into_response()
}

/// Frame transport events into the response body. `connected` opens the
/// stream before any work is visible; `session` follows the answer; a
/// comment ping goes out every 15 s; the deadline trips the cancel token.
fn sse_stream(
    session_id: Uuid,
    mut rx: mpsc::Receiver<ChatEvent>,
    cancel: CancelToken,
) -> impl Stream<Item = Result<Bytes, std::convert::Infallible>> {
    async_stream::stream! {
        yield Ok(frame(&ChatEvent::Connected {
            session_id: session_id.to_string(),
        }));

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.tick().await; // consume the immediate tick

        let deadline = tokio::time::sleep(REQUEST_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        let is_answer = matches!(event, ChatEvent::Answer { .. });
                        yield Ok(frame(&event));
                        if is_answer {
                            yield Ok(frame(&ChatEvent::Session {
                                session_id: session_id.to_string(),
                            }));
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    yield Ok(Bytes::from_static(transport::PING_FRAME.as_bytes()));
                }
                _ = &mut deadline => {
                    cancel.cancel();
                    yield Ok(frame(&ChatEvent::Error {
                        message: "request timed out".into(),
                    }));
                    break;
                }
            }
        }
    }
}

fn frame(event: &ChatEvent) -> Bytes {
    Bytes::from(transport::render(event))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /chat/{session_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(id) = parse_session_id(&session_id) else {
        return bad_request("invalid session id".into());
    };
    if state.sessions.delete(&id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown session" })),
        )
            .into_response()
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate the message, then load or create the session. A well-formed but
/// unknown/expired session ID silently gets a fresh session (IDs are
/// server-issued; we never trust a client-minted history); a malformed ID is
/// a validation error.
fn resolve_session(
    state: &AppState,
    body: &ChatRequest,
) -> Result<(Uuid, Vec<Turn>), String> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err("message must not be empty".into());
    }
    if body.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(format!("message exceeds {MAX_MESSAGE_CHARS} characters"));
    }

    let now = Utc::now();
    if let Some(raw) = &body.session_id {
        let Some(id) = parse_session_id(raw) else {
            return Err("invalid session id".into());
        };
        if let Some(history) = state.sessions.get(&id, now) {
            return Ok((id, history));
        }
    }

    let id = state.sessions.create(now);
    tracing::info!(session_id = %id, "new session created");
    Ok((id, Vec::new()))
}
