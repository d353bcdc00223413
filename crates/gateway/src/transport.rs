//! The stream transport contract: the event vocabulary and its canonical
//! `data: <json>\n\n` framing.
//!
//! Framing is a canonical encoding — `parse(render(event)) == event` — so
//! clients and tests share one codec. The HTTP layer writes these frames
//! through a long-lived response body with a `:ping` heartbeat.

use serde::{Deserialize, Serialize};

use bp_domain::error::{Error, Result};
use bp_domain::tool::ToolCallInfo;

/// Comment frame emitted every 15 s to survive idle proxies.
pub const PING_FRAME: &str = ":ping\n\n";

/// Events emitted over one chat stream, in protocol order: `connected`
/// first, `answer` terminal (`error` replaces it on failure), `session`
/// confirming the ID after the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    #[serde(rename_all = "camelCase")]
    Connected { session_id: String },

    /// Once per turn, before the model output of that turn.
    Thinking { turn: u32, message: String },

    /// Once per turn that has tool calls: deduplicated names in
    /// first-appearance order, labels carrying `×N` for grouped calls.
    ToolStart {
        tools: Vec<String>,
        labels: Vec<String>,
    },

    /// Per ungrouped call, or once (synthetic) per grouped name.
    ToolDone { info: ToolCallInfo },

    /// Streamed visible model text, forwarded in generation order.
    TextChunk { text: String },

    /// Terminal: the assembled answer plus the full audit trail.
    #[serde(rename_all = "camelCase")]
    Answer {
        text: String,
        tool_calls: Vec<ToolCallInfo>,
    },

    /// Confirms the session ID for follow-up requests.
    #[serde(rename_all = "camelCase")]
    Session { session_id: String },

    Error { message: String },
}

/// Render an event as one SSE frame.
pub fn render(event: &ChatEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_default();
    format!("data: {json}\n\n")
}

/// Parse one SSE frame back into an event.
pub fn parse(frame: &str) -> Result<ChatEvent> {
    let data = frame
        .strip_prefix("data:")
        .ok_or_else(|| Error::Validation("not a data frame".into()))?
        .trim();
    Ok(serde_json::from_str(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ToolCallInfo {
        ToolCallInfo {
            name: "get_profile".into(),
            label: "Fetching profile".into(),
            duration_ms: 120,
            cache_hit: Some(true),
            error: None,
        }
    }

    #[test]
    fn every_event_round_trips() {
        let events = vec![
            ChatEvent::Connected {
                session_id: "2b6a…".into(),
            },
            ChatEvent::Thinking {
                turn: 1,
                message: "Analysing your request…".into(),
            },
            ChatEvent::ToolStart {
                tools: vec!["check_user_topic_posts".into()],
                labels: vec!["Scanning creator content ×5".into()],
            },
            ChatEvent::ToolDone {
                info: sample_info(),
            },
            ChatEvent::TextChunk {
                text: "Hello".into(),
            },
            ChatEvent::Answer {
                text: "Done.".into(),
                tool_calls: vec![sample_info()],
            },
            ChatEvent::Session {
                session_id: "2b6a…".into(),
            },
            ChatEvent::Error {
                message: "request timed out".into(),
            },
        ];
        for event in events {
            let frame = render(&event);
            assert!(frame.starts_with("data: "), "frame: {frame:?}");
            assert!(frame.ends_with("\n\n"));
            assert_eq!(parse(&frame).unwrap(), event);
        }
    }

    #[test]
    fn wire_fields_are_camel_case() {
        let frame = render(&ChatEvent::Answer {
            text: "hi".into(),
            tool_calls: vec![sample_info()],
        });
        assert!(frame.contains("\"toolCalls\""));
        assert!(frame.contains("\"durationMs\""));
        assert!(frame.contains("\"type\":\"answer\""));
    }

    #[test]
    fn ping_frame_is_a_comment() {
        assert!(PING_FRAME.starts_with(':'));
        assert!(parse(PING_FRAME).is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("event: oops\n\n").is_err());
        assert!(parse("data: {not json}\n\n").is_err());
    }
}
