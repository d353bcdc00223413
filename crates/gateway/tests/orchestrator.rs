//! End-to-end tests of the turn loop against a scripted LLM: streaming,
//! batching, loop-breaking, failure short-circuits, and history persistence.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use bp_actor::ActorClient;
use bp_domain::cancel::CancelToken;
use bp_domain::config::{ActorConfig, Config};
use bp_domain::error::Result;
use bp_domain::stream::{BoxStream, StreamEvent};
use bp_domain::tool::{ToolDefinition, ToolError};
use bp_domain::turn::{Part, Role};
use bp_providers::{GenerateRequest, LlmClient};
use bp_sessions::SessionStore;
use bp_store::{Cache, Collections, JsonStore};

use bp_gateway::runtime::dispatch::{Tool, ToolRegistry};
use bp_gateway::runtime::{run_chat, ChatInput, MAX_TURNS};
use bp_gateway::state::{AppState, LlmHandle};
use bp_gateway::transport::ChatEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test doubles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plays back a pre-scripted stream per LLM call. Exhausted scripts return
/// an empty candidate (which reads as "Done.").
struct ScriptedLlm {
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
}

impl ScriptedLlm {
    fn new(turns: Vec<Vec<StreamEvent>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    async fn stream_generate(
        &self,
        _req: GenerateRequest<'_>,
        _cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let events = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![StreamEvent::Done { candidate: vec![] }]);
        Ok(Box::pin(futures_util::stream::iter(
            events.into_iter().map(Ok),
        )))
    }
}

/// A tool that always succeeds and reports a cache hit.
struct Probe;

#[async_trait::async_trait]
impl Tool for Probe {
    fn name(&self) -> &'static str {
        "probe"
    }
    fn label(&self) -> &'static str {
        "Probing"
    }
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "probe".into(),
            description: "test".into(),
            parameters: json!({"type": "object"}),
        }
    }
    async fn run(&self, args: Value) -> std::result::Result<Value, ToolError> {
        Ok(json!({ "echo": args, "cacheHit": true }))
    }
}

/// A tool that always fails.
struct Broken;

#[async_trait::async_trait]
impl Tool for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }
    fn label(&self) -> &'static str {
        "Breaking"
    }
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "broken".into(),
            description: "test".into(),
            parameters: json!({"type": "object"}),
        }
    }
    async fn run(&self, _args: Value) -> std::result::Result<Value, ToolError> {
        Err(ToolError::coded("upstream", "scrape failed"))
    }
}

fn test_state(llm: Arc<dyn LlmClient>) -> AppState {
    let store: Arc<dyn Collections> = Arc::new(JsonStore::in_memory());
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Probe));
    registry.register(Arc::new(Broken));

    AppState {
        config: Arc::new(Config::default()),
        cache: Arc::new(Cache::new(store.clone())),
        store,
        actor: Arc::new(ActorClient::from_config(&ActorConfig::default()).unwrap()),
        sessions: Arc::new(SessionStore::new(10, chrono::Duration::minutes(30))),
        registry: Arc::new(registry),
        llm: LlmHandle::fixed(llm),
    }
}

fn call(name: &str, args: Value) -> Part {
    Part::FunctionCall {
        name: name.into(),
        args,
    }
}

fn text_turn(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Part(Part::text(text)),
        StreamEvent::Done {
            candidate: vec![Part::text(text)],
        },
    ]
}

fn tool_turn(calls: Vec<Part>) -> Vec<StreamEvent> {
    vec![StreamEvent::Done { candidate: calls }]
}

async fn run_to_end(state: &AppState, message: &str) -> (Uuid, Vec<ChatEvent>) {
    let session_id = state.sessions.create(Utc::now());
    let mut rx = run_chat(
        state.clone(),
        ChatInput {
            session_id,
            history: Vec::new(),
            message: message.into(),
        },
        CancelToken::new(),
    );
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (session_id, events)
}

fn answers(events: &[ChatEvent]) -> Vec<&ChatEvent> {
    events
        .iter()
        .filter(|e| matches!(e, ChatEvent::Answer { .. }))
        .collect()
}

fn thinking_count(events: &[ChatEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ChatEvent::Thinking { .. }))
        .count()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn one_turn_answer_streams_and_persists() {
    let state = test_state(ScriptedLlm::new(vec![text_turn("Hello.")]));
    let (session_id, events) = run_to_end(&state, "hi").await;

    match &events[0] {
        ChatEvent::Thinking { turn, message } => {
            assert_eq!(*turn, 1);
            assert_eq!(message, "Analysing your request…");
        }
        other => panic!("expected thinking first, got {other:?}"),
    }
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::TextChunk { text } if text == "Hello.")));

    let answer = answers(&events);
    assert_eq!(answer.len(), 1);
    match answer[0] {
        ChatEvent::Answer { text, tool_calls } => {
            assert_eq!(text, "Hello.");
            assert!(tool_calls.is_empty());
        }
        _ => unreachable!(),
    }

    // Persisted: user turn + model turn, no thoughts.
    let history = state.sessions.get(&session_id, Utc::now()).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Model);
    assert!(history.iter().flat_map(|t| &t.parts).all(|p| !p.is_thought()));
}

#[tokio::test]
async fn single_tool_call_then_answer() {
    let state = test_state(ScriptedLlm::new(vec![
        tool_turn(vec![call("probe", json!({"username": "acme"}))]),
        text_turn("Profile looks healthy."),
    ]));
    let (session_id, events) = run_to_end(&state, "check acme").await;

    let starts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ToolStart { tools, labels } => Some((tools.clone(), labels.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].0, vec!["probe"]);
    assert_eq!(starts[0].1, vec!["Probing"]);

    let dones: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ToolDone { info } => Some(info.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(dones.len(), 1);
    assert_eq!(dones[0].cache_hit, Some(true));

    match answers(&events)[0] {
        ChatEvent::Answer { text, tool_calls } => {
            assert_eq!(text, "Profile looks healthy.");
            assert_eq!(tool_calls.len(), 1);
        }
        _ => unreachable!(),
    }

    // The function response landed in history, positionally aligned.
    let history = state.sessions.get(&session_id, Utc::now()).unwrap();
    let model_calls: usize = history
        .iter()
        .filter(|t| t.role == Role::Model)
        .map(|t| t.function_calls().len())
        .sum();
    let responses: usize = history
        .iter()
        .flat_map(|t| &t.parts)
        .filter(|p| matches!(p, Part::FunctionResponse { .. }))
        .count();
    assert_eq!(model_calls, 1);
    assert_eq!(responses, 1);
}

#[tokio::test]
async fn five_identical_calls_group_into_one_start_and_done() {
    let calls: Vec<Part> = (0..5)
        .map(|i| call("probe", json!({"username": format!("user{i}")})))
        .collect();
    let state = test_state(ScriptedLlm::new(vec![
        tool_turn(calls),
        text_turn("Scanned all five."),
    ]));
    let (_, events) = run_to_end(&state, "scan these creators").await;

    let starts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ToolStart { tools, labels } => Some((tools.clone(), labels.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].0, vec!["probe"]);
    assert_eq!(starts[0].1, vec!["Probing ×5"]);

    let dones: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::ToolDone { info } => Some(info.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(dones.len(), 1, "grouped calls emit one synthetic tool_done");
    assert_eq!(dones[0].label, "Probing ×5");
    assert_eq!(dones[0].cache_hit, Some(true));
    assert!(dones[0].error.is_none());

    match answers(&events)[0] {
        ChatEvent::Answer { tool_calls, .. } => {
            assert_eq!(tool_calls.len(), 5, "audit keeps every individual entry");
            assert!(tool_calls.iter().all(|i| i.label == "Probing"));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn repeated_signature_breaks_the_loop() {
    let repeated = || {
        tool_turn(vec![
            call("probe", json!({"a": 1})),
            call("broken", json!({})),
        ])
    };
    let state = test_state(ScriptedLlm::new(vec![repeated(), repeated(), repeated()]));
    let (session_id, events) = run_to_end(&state, "loop forever").await;

    // Third identical signature trips the break: three thinking events, no
    // fourth turn, and the third turn is never dispatched.
    assert_eq!(thinking_count(&events), 3);
    assert!((thinking_count(&events) as u32) < MAX_TURNS);
    match answers(&events)[0] {
        ChatEvent::Answer { text, tool_calls } => {
            assert!(text.contains("stopping here"), "canned loop answer: {text}");
            assert_eq!(tool_calls.len(), 4, "turns 1 and 2 dispatched, turn 3 skipped");
        }
        _ => unreachable!(),
    }

    // The broken turn emits no tool_start — every start stays paired with
    // its tool_done.
    let starts = events
        .iter()
        .filter(|e| matches!(e, ChatEvent::ToolStart { .. }))
        .count();
    assert_eq!(starts, 2, "no tool_start for the never-dispatched turn");

    // The persisted history stays well-formed: every model function call has
    // a response in the following user turn, including the broken turn,
    // whose calls get synthetic skipped responses.
    let history = state.sessions.get(&session_id, Utc::now()).unwrap();
    for (i, turn) in history.iter().enumerate() {
        let calls = turn.function_calls().len();
        if calls == 0 {
            continue;
        }
        let responses = history
            .get(i + 1)
            .map(|next| {
                next.parts
                    .iter()
                    .filter(|p| matches!(p, Part::FunctionResponse { .. }))
                    .count()
            })
            .unwrap_or(0);
        assert_eq!(responses, calls, "unanswered function calls at turn {i}");
    }
    let skipped = history
        .last()
        .unwrap()
        .parts
        .iter()
        .filter(|p| matches!(
            p,
            Part::FunctionResponse { payload, .. } if payload["skipped"] == "loop broken"
        ))
        .count();
    assert_eq!(skipped, 2, "broken turn's calls answered synthetically");
}

#[tokio::test]
async fn all_failed_turn_short_circuits() {
    let calls: Vec<Part> = (0..5).map(|i| call("broken", json!({"n": i}))).collect();
    let state = test_state(ScriptedLlm::new(vec![tool_turn(calls)]));
    let (_, events) = run_to_end(&state, "fetch everything").await;

    assert_eq!(thinking_count(&events), 1, "no second turn after total failure");
    match answers(&events)[0] {
        ChatEvent::Answer { text, tool_calls } => {
            assert!(text.contains("broken: scrape failed"));
            assert_eq!(text.matches("broken:").count(), 3, "at most three lines");
            assert!(text.contains("…and 2 more"));
            assert_eq!(tool_calls.len(), 5);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn unknown_tool_becomes_error_response() {
    let state = test_state(ScriptedLlm::new(vec![tool_turn(vec![call(
        "summon_demons",
        json!({}),
    )])]));
    let (session_id, events) = run_to_end(&state, "do the thing").await;

    match answers(&events)[0] {
        ChatEvent::Answer { text, .. } => {
            assert!(text.contains("summon_demons: Unknown tool: summon_demons"));
        }
        _ => unreachable!(),
    }

    // The model would have seen the error as a function response.
    let history = state.sessions.get(&session_id, Utc::now()).unwrap();
    let response = history
        .iter()
        .flat_map(|t| &t.parts)
        .find_map(|p| match p {
            Part::FunctionResponse { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(response["error"], "Unknown tool: summon_demons");
}

#[tokio::test]
async fn thoughts_never_reach_the_client_or_disk() {
    const SECRET: &str = "the-internal-reasoning-marker";
    let state = test_state(ScriptedLlm::new(vec![vec![
        StreamEvent::Part(Part::thought(SECRET)),
        StreamEvent::Part(Part::text("Public answer.")),
        StreamEvent::Done {
            candidate: vec![Part::thought(SECRET), Part::text("Public answer.")],
        },
    ]]));
    let (session_id, events) = run_to_end(&state, "hi").await;

    for event in &events {
        let rendered = bp_gateway::transport::render(event);
        assert!(!rendered.contains(SECRET), "thought leaked in {rendered}");
    }

    let history = state.sessions.get(&session_id, Utc::now()).unwrap();
    assert!(history.iter().flat_map(|t| &t.parts).all(|p| !p.is_thought()));
}

#[tokio::test]
async fn max_turns_exhaustion_still_answers() {
    let turns: Vec<Vec<StreamEvent>> = (0..MAX_TURNS)
        .map(|i| tool_turn(vec![call("probe", json!({"turn": i}))]))
        .collect();
    let state = test_state(ScriptedLlm::new(turns));
    let (_, events) = run_to_end(&state, "keep digging").await;

    assert_eq!(thinking_count(&events) as u32, MAX_TURNS);
    let answer = answers(&events);
    assert_eq!(answer.len(), 1);
    match answer[0] {
        ChatEvent::Answer { text, tool_calls } => {
            assert!(text.contains("ran out"), "fallback answer, got: {text}");
            assert_eq!(tool_calls.len(), MAX_TURNS as usize);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn cancellation_yields_error_and_no_answer() {
    let state = test_state(ScriptedLlm::new(vec![text_turn("never seen")]));
    let session_id = state.sessions.create(Utc::now());
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut rx = run_chat(
        state.clone(),
        ChatInput {
            session_id,
            history: Vec::new(),
            message: "hi".into(),
        },
        cancel,
    );
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(answers(&events).is_empty());
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::Error { message } if message == "cancelled")));
}

#[tokio::test]
async fn dropped_receiver_still_persists_the_session() {
    let state = test_state(ScriptedLlm::new(vec![text_turn("Hello.")]));
    let session_id = state.sessions.create(Utc::now());

    let rx = run_chat(
        state.clone(),
        ChatInput {
            session_id,
            history: Vec::new(),
            message: "hi".into(),
        },
        CancelToken::new(),
    );
    drop(rx); // client gone

    // The orchestration finishes in the background and persists anyway.
    let mut persisted = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        if state
            .sessions
            .get(&session_id, Utc::now())
            .is_some_and(|h| h.len() == 2)
        {
            persisted = true;
            break;
        }
    }
    assert!(persisted, "history was not persisted after disconnect");
}

#[tokio::test]
async fn large_tool_payloads_are_trimmed_before_persist() {
    struct Firehose;

    #[async_trait::async_trait]
    impl Tool for Firehose {
        fn name(&self) -> &'static str {
            "firehose"
        }
        fn label(&self) -> &'static str {
            "Hosing"
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "firehose".into(),
                description: "test".into(),
                parameters: json!({"type": "object"}),
            }
        }
        async fn run(&self, _args: Value) -> std::result::Result<Value, ToolError> {
            let posts: Vec<Value> = (0..8).map(|i| json!({"id": i})).collect();
            Ok(json!({ "posts": posts, "totalFetched": 8 }))
        }
    }

    let store: Arc<dyn Collections> = Arc::new(JsonStore::in_memory());
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Firehose));
    let state = AppState {
        config: Arc::new(Config::default()),
        cache: Arc::new(Cache::new(store.clone())),
        store,
        actor: Arc::new(ActorClient::from_config(&ActorConfig::default()).unwrap()),
        sessions: Arc::new(SessionStore::new(10, chrono::Duration::minutes(30))),
        registry: Arc::new(registry),
        llm: LlmHandle::fixed(ScriptedLlm::new(vec![
            tool_turn(vec![call("firehose", json!({}))]),
            text_turn("done"),
        ])),
    };
    let (session_id, _) = run_to_end(&state, "flood me").await;

    let history = state.sessions.get(&session_id, Utc::now()).unwrap();
    let payload = history
        .iter()
        .flat_map(|t| &t.parts)
        .find_map(|p| match p {
            Part::FunctionResponse { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(payload["posts"], "[8 posts — trimmed for context]");
    assert_eq!(payload["totalFetched"], 8);
}
