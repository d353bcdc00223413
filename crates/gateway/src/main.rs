use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use bp_actor::ActorClient;
use bp_domain::config::Config;
use bp_gateway::api;
use bp_gateway::scheduler;
use bp_gateway::state::{AppState, LlmHandle};
use bp_gateway::tools::{self, ToolDeps, HASHTAG_POSTS_COLL, POSTS_COLL};
use bp_sessions::SessionStore;
use bp_store::{Cache, Collections, JsonStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ──────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bp_gateway=debug")),
        )
        .json()
        .init();

    tracing::info!("BrandPulse starting");

    // ── Config ───────────────────────────────────────────────────────
    let config = Arc::new(Config::from_env());

    // ── Document store + cache ───────────────────────────────────────
    let json_store =
        Arc::new(JsonStore::open(&config.store.state_dir).context("opening document store")?);
    let store: Arc<dyn Collections> = json_store.clone();

    let cache = Arc::new(Cache::new(store.clone()));
    cache.register_ttl_indexes();
    // Domain collections age out too; a week covers every analytics window.
    store.create_ttl_index(POSTS_COLL, "fetchedAt", chrono::Duration::days(7));
    store.create_ttl_index(HASHTAG_POSTS_COLL, "fetchedAt", chrono::Duration::days(7));

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new(
        config.sessions.max_sessions,
        chrono::Duration::seconds(config.sessions.idle_ttl_secs as i64),
    ));

    // ── Upstream actor client ────────────────────────────────────────
    let actor =
        Arc::new(ActorClient::from_config(&config.actor).context("building actor client")?);
    if config.actor.token.is_none() {
        tracing::warn!("APIFY_TOKEN not set — actor-backed tools will fail upstream auth");
    }

    // ── Tool registry ────────────────────────────────────────────────
    let registry = Arc::new(tools::build_registry(ToolDeps {
        cache: cache.clone(),
        actor: actor.clone(),
        store: store.clone(),
        config: config.clone(),
    }));
    tracing::info!(tools = registry.definitions().len(), "tool registry ready");

    // ── App state ────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        cache,
        actor,
        sessions: sessions.clone(),
        registry,
        llm: LlmHandle::from_config(config.llm.clone()),
    };

    // ── Background loops ─────────────────────────────────────────────
    {
        // Periodic store flush.
        let json_store = json_store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                if let Err(e) = json_store.flush() {
                    tracing::warn!(error = %e, "document store flush failed");
                }
            }
        });
    }
    {
        // TTL index application.
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
            loop {
                interval.tick().await;
                store.sweep_expired(chrono::Utc::now());
            }
        });
    }
    {
        // Session idle sweep.
        let sessions = sessions.clone();
        let every = std::time::Duration::from_secs(config.sessions.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                sessions.sweep_expired(chrono::Utc::now());
            }
        });
    }

    scheduler::spawn(state.clone());

    // ── Router ───────────────────────────────────────────────────────
    let cors = match &config.server.cors_origin {
        Some(origin) => {
            let origin = origin
                .parse::<axum::http::HeaderValue>()
                .context("parsing BP_CORS_ORIGIN")?;
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    };
    let app = api::router().layer(cors).with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "BrandPulse listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
