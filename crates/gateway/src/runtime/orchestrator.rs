//! The agentic turn loop.
//!
//! Drives a bounded multi-turn tool-calling conversation: streams visible
//! text as it arrives, fans tool calls out concurrently, groups repeated
//! names for emission, breaks retry loops, short-circuits when every call of
//! a turn failed, and trims the history before persisting it.
//!
//! Entry point: [`run_chat`] spawns the loop and returns a channel of
//! [`ChatEvent`]s. The last event on any terminal path is `answer` — or
//! `error` instead of it.

use std::collections::HashMap;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use bp_domain::cancel::CancelToken;
use bp_domain::error::{Error, Result};
use bp_domain::stream::StreamEvent;
use bp_domain::tool::ToolCallInfo;
use bp_domain::turn::{Part, Role, Turn};
use bp_providers::GenerateRequest;

use crate::state::AppState;
use crate::transport::ChatEvent;

use super::trim::trim_history;

/// Maximum model turns per request.
pub const MAX_TURNS: u32 = 10;

/// Consecutive identical tool-signature turns tolerated before breaking.
pub const MAX_REPEATS: u32 = 2;

const SYSTEM_PROMPT: &str = "You are BrandPulse, a brand-intelligence analyst. \
You answer questions about creators, campaigns, and hashtags on social media. \
Use the available tools to fetch profiles, posts, reels, and hashtag data, and \
to compute engagement analytics; prefer tool data over guesses. When data is \
cached you will see cacheHit=true — mention data freshness only when asked. \
Answer concisely, with concrete numbers where you have them.";

const REPEAT_ANSWER: &str = "I keep requesting the same data without making \
progress, so I'm stopping here. Try rephrasing the question or narrowing it \
to a specific creator, post, or hashtag.";

const MAX_TURNS_ANSWER: &str = "I gathered a lot of data but ran out of \
analysis turns before reaching a conclusion. Ask me to continue and I'll \
pick up from what was already fetched.";

/// Input to one chat request.
pub struct ChatInput {
    pub session_id: Uuid,
    /// Prior history loaded from the session store.
    pub history: Vec<Turn>,
    /// The user message (validated non-empty, ≤ 2000 chars by the shell).
    pub message: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_chat — the core orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one chat request: push the user turn, loop the model against the
/// tool registry, and persist the trimmed history.
///
/// The caller reads events as they arrive (SSE) or drains them (REST). A
/// dropped receiver does not stop the loop — the orchestration completes so
/// its audit trail and history still persist (the client merely stops
/// seeing events).
pub fn run_chat(
    state: AppState,
    input: ChatInput,
    cancel: CancelToken,
) -> mpsc::Receiver<ChatEvent> {
    let (tx, rx) = mpsc::channel::<ChatEvent>(64);

    let session_id = input.session_id;
    let span = tracing::info_span!("chat", session_id = %session_id);

    tokio::spawn(
        async move {
            let mut history = input.history;
            history.push(Turn::user_text(&input.message));

            let result = drive(&state, &mut history, &tx, &cancel).await;

            // Persist on every terminal path, including disconnects and
            // errors mid-turn, so the audit survives.
            let trimmed = trim_history(history);
            state.sessions.set(session_id, trimmed, Utc::now());

            if let Err(e) = result {
                tracing::warn!(error = %e, "chat request failed");
                let _ = tx
                    .send(ChatEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        .instrument(span),
    );

    rx
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The turn loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn drive(
    state: &AppState,
    history: &mut Vec<Turn>,
    tx: &mpsc::Sender<ChatEvent>,
    cancel: &CancelToken,
) -> Result<()> {
    let registry = &state.registry;
    let tool_defs = registry.definitions();

    // Lazy singleton: a missing API key fails here, on first use.
    let llm = state.llm.client()?;

    let mut audit: Vec<ToolCallInfo> = Vec::new();
    let mut prev_signature: Option<Vec<String>> = None;
    let mut repeats: u32 = 0;
    let mut ran_tools = false;

    for turn_no in 1..=MAX_TURNS {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let message = if turn_no == 1 {
            "Analysing your request…"
        } else if ran_tools {
            "Processing tool results…"
        } else {
            "Thinking…"
        };
        emit(
            tx,
            ChatEvent::Thinking {
                turn: turn_no,
                message: message.into(),
            },
        )
        .await;

        // ── Stream the model turn ────────────────────────────────────
        let req = GenerateRequest {
            system: SYSTEM_PROMPT,
            history: history.as_slice(),
            tools: &tool_defs,
        };
        let mut stream = llm.stream_generate(req, cancel.clone()).await?;

        let mut streamed = String::new();
        let mut candidate: Vec<Part> = Vec::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Part(Part::Text { text }) => {
                    streamed.push_str(&text);
                    emit(tx, ChatEvent::TextChunk { text }).await;
                }
                // Thoughts stay internal; function calls arrive complete in
                // the candidate.
                StreamEvent::Part(_) => {}
                StreamEvent::Done { candidate: parts } => candidate = parts,
            }
        }
        drop(stream);

        // Append the model turn verbatim — thought parts included, the model
        // needs them for coherence across turns. Trimming strips them later.
        history.push(Turn::model(candidate.clone()));

        let calls: Vec<(String, Value)> = history
            .last()
            .map(|t| t.function_calls())
            .unwrap_or_default();

        // ── No tool calls → this is the answer ───────────────────────
        if calls.is_empty() {
            let text = if !streamed.trim().is_empty() {
                streamed
            } else {
                visible_text(&candidate)
            };
            let text = if text.trim().is_empty() {
                "Done.".to_string()
            } else {
                text
            };
            emit(
                tx,
                ChatEvent::Answer {
                    text,
                    tool_calls: audit,
                },
            )
            .await;
            return Ok(());
        }
        ran_tools = true;

        // ── Loop-break check ─────────────────────────────────────────
        // Runs before any activity events: a broken loop must not emit a
        // tool_start it will never pair with a tool_done.
        let mut signature: Vec<String> = calls.iter().map(|(n, _)| n.clone()).collect();
        signature.sort();
        if prev_signature.as_ref() == Some(&signature) {
            repeats += 1;
        } else {
            repeats = 0;
            prev_signature = Some(signature);
        }
        if repeats >= MAX_REPEATS {
            tracing::info!(turn = turn_no, "breaking repeated tool-call loop");
            // The model turn just appended carries function calls that will
            // never be dispatched. Answer each one so the persisted history
            // stays well-formed — the provider rejects a history ending in
            // an unanswered function call, which would brick the session for
            // every follow-up message.
            let skipped: Vec<Part> = calls
                .iter()
                .map(|(name, _)| Part::FunctionResponse {
                    name: name.clone(),
                    payload: json!({ "skipped": "loop broken" }),
                })
                .collect();
            history.push(Turn::user_parts(skipped));
            emit(
                tx,
                ChatEvent::Answer {
                    text: REPEAT_ANSWER.into(),
                    tool_calls: audit,
                },
            )
            .await;
            return Ok(());
        }

        // ── Dedup + grouped tool_start ──────────────────────────────
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut unique: Vec<String> = Vec::new();
        for (name, _) in &calls {
            let count = counts.entry(name.as_str()).or_insert(0);
            if *count == 0 {
                unique.push(name.clone());
            }
            *count += 1;
        }
        let labels: Vec<String> = unique
            .iter()
            .map(|name| {
                let label = registry.label(name);
                match counts[name.as_str()] {
                    n if n > 1 => format!("{label} ×{n}"),
                    _ => label,
                }
            })
            .collect();
        tracing::debug!(turn = turn_no, tools = ?unique, "dispatching tool calls");
        emit(
            tx,
            ChatEvent::ToolStart {
                tools: unique.clone(),
                labels,
            },
        )
        .await;

        // ── Concurrent dispatch ──────────────────────────────────────
        // Per-call tool_done is suppressed for grouped names; those get one
        // synthetic event after the batch settles. Failures are captured in
        // the results, never thrown.
        let futures: Vec<_> = calls
            .iter()
            .map(|(name, args)| {
                let grouped = counts[name.as_str()] > 1;
                registry.invoke(name, args.clone(), (!grouped).then_some(tx))
            })
            .collect();
        let results = futures_util::future::join_all(futures).await;

        // ── Synthetic tool_done per grouped name ─────────────────────
        for name in &unique {
            let n = counts[name.as_str()];
            if n < 2 {
                continue;
            }
            let group: Vec<&ToolCallInfo> = results
                .iter()
                .map(|(_, info)| info)
                .filter(|info| &info.name == name)
                .collect();
            let total_ms: u64 = group.iter().map(|i| i.duration_ms).sum();
            let hits = group.iter().filter(|i| i.cache_hit == Some(true)).count();
            let failed = group.iter().filter(|i| i.error.is_some()).count();
            emit(
                tx,
                ChatEvent::ToolDone {
                    info: ToolCallInfo {
                        name: name.clone(),
                        label: format!("{} ×{n}", registry.label(name)),
                        duration_ms: total_ms / n as u64,
                        cache_hit: Some(hits == n),
                        error: (failed > 0).then(|| format!("{failed}/{n} failed")),
                    },
                },
            )
            .await;
        }

        // ── Fold responses back into history, positionally aligned ───
        let mut response_parts = Vec::with_capacity(calls.len());
        let mut all_failed = true;
        for ((name, _), (payload, info)) in calls.iter().zip(&results) {
            response_parts.push(Part::FunctionResponse {
                name: name.clone(),
                payload: payload.clone(),
            });
            if info.error.is_none() {
                all_failed = false;
            }
        }
        history.push(Turn::user_parts(response_parts));
        audit.extend(results.iter().map(|(_, info)| info.clone()));

        // ── All-failed short-circuit ─────────────────────────────────
        if all_failed {
            let mut lines: Vec<String> = results
                .iter()
                .take(3)
                .map(|(_, info)| {
                    format!("{}: {}", info.name, info.error.as_deref().unwrap_or("failed"))
                })
                .collect();
            let extra = results.len().saturating_sub(3);
            if extra > 0 {
                lines.push(format!("…and {extra} more"));
            }
            emit(
                tx,
                ChatEvent::Answer {
                    text: format!(
                        "I couldn't retrieve any of the data I needed:\n{}",
                        lines.join("\n")
                    ),
                    tool_calls: audit,
                },
            )
            .await;
            return Ok(());
        }
    }

    // ── MAX_TURNS exhausted ──────────────────────────────────────────
    let text = history
        .iter()
        .rev()
        .find(|t| t.role == Role::Model)
        .map(|t| t.visible_text())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| MAX_TURNS_ANSWER.to_string());
    emit(
        tx,
        ChatEvent::Answer {
            text,
            tool_calls: audit,
        },
    )
    .await;
    Ok(())
}

// ── helpers ─────────────────────────────────────────────────────────

async fn emit(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) {
    // Send failures mean the client is gone; the loop still completes so the
    // session persists.
    let _ = tx.send(event).await;
}

fn visible_text(parts: &[Part]) -> String {
    let mut buf = String::new();
    for part in parts {
        if let Some(t) = part.visible_text() {
            buf.push_str(t);
        }
    }
    buf
}
