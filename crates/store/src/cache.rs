//! Cache-first read-through over the document store.
//!
//! Each cache kind has its own TTL and collection. Reads apply the freshness
//! predicate (`now - cachedAt < ttl`) so stale documents are never served
//! even before the TTL index physically removes them. Writes stamp
//! `cachedAt` and are best-effort: a failed write never fails the caller.
//! No single-flight — concurrent misses may duplicate upstream work, which
//! is tolerated because upserts are idempotent on key.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::collection::Collections;

/// The timestamp field stamped on every cached document.
pub const CACHED_AT_FIELD: &str = "cachedAt";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Profile,
    Post,
    Reel,
    HashtagPosts,
    HashtagStats,
    Snapshot,
}

impl CacheKind {
    pub const ALL: [CacheKind; 6] = [
        CacheKind::Profile,
        CacheKind::Post,
        CacheKind::Reel,
        CacheKind::HashtagPosts,
        CacheKind::HashtagStats,
        CacheKind::Snapshot,
    ];

    pub fn ttl(self) -> Duration {
        match self {
            CacheKind::Profile => Duration::hours(24),
            CacheKind::Post | CacheKind::Reel => Duration::hours(6),
            CacheKind::HashtagPosts | CacheKind::HashtagStats => Duration::hours(12),
            CacheKind::Snapshot => Duration::days(180),
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            CacheKind::Profile => "cache_profiles",
            CacheKind::Post => "cache_posts",
            CacheKind::Reel => "cache_reels",
            CacheKind::HashtagPosts => "cache_hashtag_posts",
            CacheKind::HashtagStats => "cache_hashtag_stats",
            CacheKind::Snapshot => "cache_snapshots",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read-through
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Cache {
    store: Arc<dyn Collections>,
}

impl Cache {
    pub fn new(store: Arc<dyn Collections>) -> Self {
        Self { store }
    }

    /// Register a TTL index per cache kind so the store eventually deletes
    /// what the freshness predicate already refuses to serve.
    pub fn register_ttl_indexes(&self) {
        for kind in CacheKind::ALL {
            self.store
                .create_ttl_index(kind.collection(), CACHED_AT_FIELD, kind.ttl());
        }
    }

    /// Fetch the cached document for `key` iff it is still fresh.
    pub async fn read(&self, kind: CacheKind, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let doc = match self.store.find_one(kind.collection(), key).await {
            Ok(doc) => doc?,
            Err(e) => {
                tracing::warn!(kind = ?kind, key, error = %e, "cache read failed");
                return None;
            }
        };
        is_fresh(&doc, kind.ttl(), now).then_some(doc)
    }

    /// Upsert `payload` under `key`, stamping `cachedAt := now`. Best-effort.
    pub async fn write(&self, kind: CacheKind, key: &str, mut payload: Value) {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(
                CACHED_AT_FIELD.to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        if let Err(e) = self.store.upsert(kind.collection(), key, payload).await {
            tracing::warn!(kind = ?kind, key, error = %e, "cache write failed");
        }
    }
}

fn is_fresh(doc: &Value, ttl: Duration, now: DateTime<Utc>) -> bool {
    let Some(raw) = doc.get(CACHED_AT_FIELD).and_then(Value::as_str) else {
        return false;
    };
    let Ok(cached_at) = DateTime::parse_from_rfc3339(raw) else {
        return false;
    };
    now - cached_at.with_timezone(&Utc) < ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::JsonStore;
    use serde_json::json;

    fn cache() -> (Cache, Arc<JsonStore>) {
        let store = Arc::new(JsonStore::in_memory());
        (Cache::new(store.clone()), store)
    }

    #[tokio::test]
    async fn write_then_read_is_fresh() {
        let (cache, _) = cache();
        cache
            .write(CacheKind::Profile, "acme", json!({"followers": 10}))
            .await;
        let doc = cache
            .read(CacheKind::Profile, "acme", Utc::now())
            .await
            .unwrap();
        assert_eq!(doc["followers"], 10);
        assert!(doc.get(CACHED_AT_FIELD).is_some());
    }

    #[tokio::test]
    async fn stale_document_is_a_miss_before_physical_expiry() {
        let (cache, store) = cache();
        cache
            .write(CacheKind::Post, "acme:12", json!({"posts": []}))
            .await;

        // Reads apply the predicate even though the TTL index hasn't run.
        let later = Utc::now() + CacheKind::Post.ttl() + Duration::minutes(1);
        assert!(cache.read(CacheKind::Post, "acme:12", later).await.is_none());
        assert!(store
            .find_one(CacheKind::Post.collection(), "acme:12")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn second_write_wins() {
        let (cache, _) = cache();
        cache.write(CacheKind::Profile, "k", json!({"v": 1})).await;
        cache.write(CacheKind::Profile, "k", json!({"v": 2})).await;
        let doc = cache
            .read(CacheKind::Profile, "k", Utc::now())
            .await
            .unwrap();
        assert_eq!(doc["v"], 2);
    }

    #[tokio::test]
    async fn document_without_stamp_is_never_fresh() {
        let (cache, store) = cache();
        store
            .upsert(CacheKind::Profile.collection(), "raw", json!({"x": 1}))
            .await
            .unwrap();
        assert!(cache.read(CacheKind::Profile, "raw", Utc::now()).await.is_none());
    }

    #[test]
    fn kind_ttls_match_contract() {
        assert_eq!(CacheKind::Profile.ttl(), Duration::hours(24));
        assert_eq!(CacheKind::Post.ttl(), Duration::hours(6));
        assert_eq!(CacheKind::HashtagStats.ttl(), Duration::hours(12));
        assert_eq!(CacheKind::Snapshot.ttl(), Duration::days(180));
    }
}
