//! Context-preserving history trimming, applied before a session is
//! persisted.
//!
//! Rules: thought parts are dropped; `posts`/`reels` arrays longer than 3
//! collapse to a count placeholder (summary scalars like `totalFetched` pass
//! through untouched); `results` arrays longer than 5 keep their first 5 and
//! gain `_trimmed: true`. Function-call parts are preserved verbatim.

use serde_json::Value;

use bp_domain::turn::{Part, Turn};

const POST_ARRAY_FIELDS: [&str; 2] = ["posts", "reels"];
const POST_ARRAY_KEEP: usize = 3;
const RESULTS_KEEP: usize = 5;

pub fn trim_history(history: Vec<Turn>) -> Vec<Turn> {
    history
        .into_iter()
        .map(|turn| Turn {
            role: turn.role,
            parts: turn
                .parts
                .into_iter()
                .filter(|part| !part.is_thought())
                .map(trim_part)
                .collect(),
        })
        .collect()
}

fn trim_part(part: Part) -> Part {
    match part {
        Part::FunctionResponse { name, payload } => Part::FunctionResponse {
            name,
            payload: trim_payload(payload),
        },
        other => other,
    }
}

pub(crate) fn trim_payload(mut payload: Value) -> Value {
    let Some(obj) = payload.as_object_mut() else {
        return payload;
    };

    for field in POST_ARRAY_FIELDS {
        let len = obj.get(field).and_then(Value::as_array).map(Vec::len);
        if let Some(n) = len.filter(|n| *n > POST_ARRAY_KEEP) {
            obj.insert(
                field.to_string(),
                Value::String(format!("[{n} {field} — trimmed for context]")),
            );
        }
    }

    let mut truncated = false;
    if let Some(results) = obj.get_mut("results").and_then(Value::as_array_mut) {
        if results.len() > RESULTS_KEEP {
            results.truncate(RESULTS_KEEP);
            truncated = true;
        }
    }
    if truncated {
        obj.insert("_trimmed".into(), Value::Bool(true));
    }

    payload
}
