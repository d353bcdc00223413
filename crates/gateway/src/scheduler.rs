//! Background jobs: campaign-post monitoring and home-hashtag prefetch.
//!
//! Both jobs run on fixed intervals with a running-flag overlap guard — a
//! tick that lands while the previous execution is still going is skipped,
//! never queued. Jobs go through the same dispatcher as chat-driven tool
//! calls, with no event emitter attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use bp_store::{Filter, FindOptions};

use crate::state::AppState;
use crate::tools::MONITORED_COLL;

const MONITOR_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);
const PREFETCH_INTERVAL: StdDuration = StdDuration::from_secs(6 * 60 * 60);
const PREFETCH_STARTUP_DELAY: StdDuration = StdDuration::from_secs(10);

/// Spawn both background jobs. The tasks are plain `tokio::spawn`s — they
/// die with the runtime and keep nothing alive on their own.
pub fn spawn(state: AppState) {
    spawn_guarded_loop(
        "monitor_active_posts",
        state.clone(),
        MONITOR_INTERVAL,
        Some(MONITOR_INTERVAL),
        |state| Box::pin(async move { monitor_active_posts(&state).await }),
    );
    spawn_guarded_loop(
        "prefetch_hashtags",
        state,
        PREFETCH_INTERVAL,
        Some(PREFETCH_STARTUP_DELAY),
        |state| Box::pin(async move { prefetch_hashtags(&state).await }),
    );
}

fn spawn_guarded_loop(
    name: &'static str,
    state: AppState,
    every: StdDuration,
    initial_delay: Option<StdDuration>,
    job: fn(AppState) -> futures_util::future::BoxFuture<'static, ()>,
) {
    tokio::spawn(async move {
        let running = Arc::new(AtomicBool::new(false));

        if let Some(delay) = initial_delay {
            tokio::time::sleep(delay).await;
            run_guarded(name, &running, &state, job);
        }

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // immediate first tick
        loop {
            interval.tick().await;
            run_guarded(name, &running, &state, job);
        }
    });
}

fn run_guarded(
    name: &'static str,
    running: &Arc<AtomicBool>,
    state: &AppState,
    job: fn(AppState) -> futures_util::future::BoxFuture<'static, ()>,
) {
    if running.swap(true, Ordering::SeqCst) {
        tracing::warn!(job = name, "previous run still in progress, skipping tick");
        return;
    }
    let state = state.clone();
    let flag = running.clone();
    tokio::spawn(async move {
        tracing::debug!(job = name, "scheduled job starting");
        job(state).await;
        flag.store(false, Ordering::SeqCst);
        tracing::debug!(job = name, "scheduled job finished");
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// monitor_active_posts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-post check cadence based on age since registration: young posts move
/// fast, old posts barely change.
pub(crate) fn check_interval(age: Duration) -> Duration {
    if age < Duration::hours(24) {
        Duration::hours(2)
    } else if age < Duration::hours(72) {
        Duration::hours(4)
    } else if age < Duration::days(7) {
        Duration::hours(12)
    } else {
        Duration::hours(24)
    }
}

pub(crate) fn is_due(doc: &Value, now: DateTime<Utc>) -> bool {
    let Some(registered) = parse_ts(doc, "registeredAt") else {
        return false;
    };
    let last_checked = parse_ts(doc, "lastCheckedAt").unwrap_or(registered);
    now - last_checked >= check_interval(now - registered)
}

async fn monitor_active_posts(state: &AppState) {
    let posts = match state
        .store
        .find(
            MONITORED_COLL,
            &Filter::new().ne("state", "deleted"),
            &FindOptions::default(),
        )
        .await
    {
        Ok(posts) => posts,
        Err(e) => {
            tracing::warn!(error = %e, "loading monitored posts failed");
            return;
        }
    };

    let now = Utc::now();
    let throttle = StdDuration::from_millis(state.config.monitor.throttle_ms);
    let mut checked = 0usize;

    for doc in posts {
        if !is_due(&doc, now) {
            continue;
        }
        let Some(post_id) = doc.get("postId").and_then(Value::as_str) else {
            continue;
        };

        let (_, info) = state
            .registry
            .invoke("monitor_post", json!({ "postId": post_id }), None)
            .await;
        match info.error {
            Some(err) => tracing::warn!(post_id, error = %err, "post check failed"),
            None => checked += 1,
        }

        tokio::time::sleep(throttle).await;
    }

    tracing::info!(checked, "post monitoring pass complete");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prefetch_hashtags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn prefetch_hashtags(state: &AppState) {
    let throttle = StdDuration::from_millis(state.config.monitor.throttle_ms);

    for hashtag in &state.config.monitor.home_hashtags {
        let (_, info) = state
            .registry
            .invoke("get_hashtag_posts", json!({ "hashtag": hashtag }), None)
            .await;
        if let Some(err) = info.error {
            tracing::warn!(hashtag = %hashtag, error = %err, "hashtag prefetch failed");
        }
        tokio::time::sleep(throttle).await;
    }

    tracing::info!(
        hashtags = state.config.monitor.home_hashtags.len(),
        "hashtag prefetch pass complete"
    );
}

fn parse_ts(doc: &Value, field: &str) -> Option<DateTime<Utc>> {
    let raw = doc.get(field)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
