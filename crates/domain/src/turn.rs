//! The conversation model: sessions hold an ordered list of [`Turn`]s, each a
//! role plus an ordered list of [`Part`]s.
//!
//! Thought parts are kept in the in-memory history (the model needs them to
//! stay coherent across turns) but are never surfaced to clients and always
//! stripped before a session is persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a turn. Tool results travel back as `user` turns carrying
/// `function_response` parts, mirroring the upstream wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One fragment of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    /// User text, or the model's visible answer.
    Text { text: String },

    /// Model internal reasoning. Never emitted to clients, never part of a
    /// textual answer, dropped by history trimming.
    Thought { text: String },

    /// The model requests a tool invocation.
    FunctionCall { name: String, args: Value },

    /// The structured result handed back to the model.
    FunctionResponse { name: String, payload: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Part::Thought { text: text.into() }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, Part::Thought { .. })
    }

    /// Text visible to the client, i.e. non-thought text content.
    pub fn visible_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }
}

/// An ordered sequence of parts with a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Turn {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Turn {
            role: Role::Model,
            parts,
        }
    }

    pub fn user_parts(parts: Vec<Part>) -> Self {
        Turn {
            role: Role::User,
            parts,
        }
    }

    /// Concatenated visible (non-thought) text of this turn.
    pub fn visible_text(&self) -> String {
        let mut buf = String::new();
        for part in &self.parts {
            if let Some(t) = part.visible_text() {
                buf.push_str(t);
            }
        }
        buf
    }

    /// Function-call parts in order, as `(name, args)` pairs.
    pub fn function_calls(&self) -> Vec<(String, Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { name, args } => Some((name.clone(), args.clone())),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_text_skips_thoughts() {
        let turn = Turn::model(vec![
            Part::thought("secret reasoning"),
            Part::text("Hello"),
            Part::text(" there."),
        ]);
        assert_eq!(turn.visible_text(), "Hello there.");
    }

    #[test]
    fn function_calls_preserve_order() {
        let turn = Turn::model(vec![
            Part::FunctionCall {
                name: "b".into(),
                args: serde_json::json!({"x": 1}),
            },
            Part::text("calling"),
            Part::FunctionCall {
                name: "a".into(),
                args: serde_json::json!({}),
            },
        ]);
        let names: Vec<_> = turn.function_calls().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn part_serde_is_tagged() {
        let part = Part::FunctionCall {
            name: "get_profile".into(),
            args: serde_json::json!({"username": "x"}),
        };
        let v = serde_json::to_value(&part).unwrap();
        assert_eq!(v["kind"], "function_call");
        let back: Part = serde_json::from_value(v).unwrap();
        assert_eq!(back, part);
    }
}
