use axum::extract::State;
use axum::response::{IntoResponse, Json};

use bp_store::Filter;

use crate::state::AppState;
use crate::tools::MONITORED_COLL;

/// GET /health — liveness plus session and store signals.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db = match state.store.count(MONITORED_COLL, &Filter::new()).await {
        Ok(_) => "ok",
        Err(_) => "error",
    };
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.count(),
        "db": db,
    }))
}
