//! HTTP shell. Thin adapters over the runtime: routing, request validation,
//! and response shaping live here; everything stateful lives below.

pub mod chat;
pub mod health;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/chat/{session_id}", delete(chat::delete_session))
        .route("/health", get(health::health))
}
