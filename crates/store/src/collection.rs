//! The collection interface and its JSON-file-backed implementation.
//!
//! Collections are keyed documents (`serde_json::Value` objects). Persistence
//! is one JSON file per collection under the state dir: loaded on open,
//! flushed best-effort on a timer by the gateway. TTL indexes are registered
//! per collection and applied by [`Collections::sweep_expired`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use bp_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Field equality/inequality filter.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    eq: Vec<(String, Value)>,
    ne: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq.push((field.into(), value.into()));
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ne.push((field.into(), value.into()));
        self
    }

    fn matches(&self, doc: &Value) -> bool {
        for (field, expected) in &self.eq {
            if doc.get(field) != Some(expected) {
                return false;
            }
        }
        for (field, excluded) in &self.ne {
            if doc.get(field) == Some(excluded) {
                return false;
            }
        }
        true
    }
}

/// Sort/limit options for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Sort descending by this field (numbers numerically, strings lexically
    /// — which orders RFC 3339 timestamps correctly).
    pub sort_desc: Option<String>,
    pub limit: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collection interface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed collection access as the core consumes it. Implementations may be
/// remote; the shipped one is [`JsonStore`].
#[async_trait::async_trait]
pub trait Collections: Send + Sync {
    async fn find(&self, coll: &str, filter: &Filter, opts: &FindOptions) -> Result<Vec<Value>>;

    async fn find_one(&self, coll: &str, key: &str) -> Result<Option<Value>>;

    /// Upsert by key. Two successive upserts leave the second document.
    async fn upsert(&self, coll: &str, key: &str, doc: Value) -> Result<()>;

    /// Upsert each document keyed by its `key_field` value. Documents without
    /// the key field are skipped. Returns the number written.
    async fn bulk_upsert(&self, coll: &str, key_field: &str, docs: Vec<Value>) -> Result<usize>;

    async fn delete(&self, coll: &str, key: &str) -> Result<bool>;

    async fn count(&self, coll: &str, filter: &Filter) -> Result<usize>;

    /// Register a TTL index: documents whose `ts_field` timestamp is older
    /// than `ttl` are physically removed by `sweep_expired`.
    fn create_ttl_index(&self, coll: &str, ts_field: &str, ttl: Duration);

    /// Apply all TTL indexes. Returns the number of documents removed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> usize;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JsonStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type CollectionMap = HashMap<String, HashMap<String, Value>>;

/// In-memory collections with optional one-file-per-collection persistence.
pub struct JsonStore {
    dir: Option<PathBuf>,
    collections: RwLock<CollectionMap>,
    ttl_indexes: RwLock<HashMap<String, (String, Duration)>>,
}

impl JsonStore {
    /// A store with no disk backing (tests, ephemeral deployments).
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            collections: RwLock::new(HashMap::new()),
            ttl_indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or create) a store under `dir`, loading every `<coll>.json`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;

        let mut collections: CollectionMap = HashMap::new();
        for entry in std::fs::read_dir(dir).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            match serde_json::from_str::<HashMap<String, Value>>(&raw) {
                Ok(docs) => {
                    collections.insert(name.to_string(), docs);
                }
                Err(e) => {
                    tracing::warn!(collection = name, error = %e, "skipping unreadable collection file");
                }
            }
        }

        tracing::info!(
            collections = collections.len(),
            path = %dir.display(),
            "document store loaded"
        );

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            collections: RwLock::new(collections),
            ttl_indexes: RwLock::new(HashMap::new()),
        })
    }

    /// Persist every collection to disk. No-op for in-memory stores.
    pub fn flush(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let collections = self.collections.read();
        for (name, docs) in collections.iter() {
            let json = serde_json::to_string(docs)?;
            std::fs::write(dir.join(format!("{name}.json")), json).map_err(Error::Io)?;
        }
        Ok(())
    }

}

#[async_trait::async_trait]
impl Collections for JsonStore {
    async fn find(&self, coll: &str, filter: &Filter, opts: &FindOptions) -> Result<Vec<Value>> {
        let collections = self.collections.read();
        let mut docs: Vec<Value> = collections
            .get(coll)
            .map(|m| m.values().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();

        if let Some(field) = &opts.sort_desc {
            docs.sort_by(|a, b| cmp_field(b, a, field));
        }
        if let Some(limit) = opts.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn find_one(&self, coll: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(coll)
            .and_then(|m| m.get(key))
            .cloned())
    }

    async fn upsert(&self, coll: &str, key: &str, doc: Value) -> Result<()> {
        self.collections
            .write()
            .entry(coll.to_string())
            .or_default()
            .insert(key.to_string(), doc);
        Ok(())
    }

    async fn bulk_upsert(&self, coll: &str, key_field: &str, docs: Vec<Value>) -> Result<usize> {
        let mut collections = self.collections.write();
        let target = collections.entry(coll.to_string()).or_default();
        let mut written = 0;
        for doc in docs {
            let Some(key) = doc_key(&doc, key_field) else {
                continue;
            };
            target.insert(key, doc);
            written += 1;
        }
        Ok(written)
    }

    async fn delete(&self, coll: &str, key: &str) -> Result<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(coll)
            .is_some_and(|m| m.remove(key).is_some()))
    }

    async fn count(&self, coll: &str, filter: &Filter) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .get(coll)
            .map(|m| m.values().filter(|d| filter.matches(d)).count())
            .unwrap_or(0))
    }

    fn create_ttl_index(&self, coll: &str, ts_field: &str, ttl: Duration) {
        self.ttl_indexes
            .write()
            .insert(coll.to_string(), (ts_field.to_string(), ttl));
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let indexes = self.ttl_indexes.read().clone();
        let mut collections = self.collections.write();
        let mut removed = 0;

        for (coll, (field, ttl)) in &indexes {
            let Some(docs) = collections.get_mut(coll) else {
                continue;
            };
            let before = docs.len();
            docs.retain(|_, doc| match parse_ts(doc, field) {
                Some(ts) => now - ts < *ttl,
                // Documents without the indexed field never expire.
                None => true,
            });
            removed += before - docs.len();
        }

        if removed > 0 {
            tracing::debug!(removed, "ttl sweep removed expired documents");
        }
        removed
    }
}

// ── helpers ─────────────────────────────────────────────────────────

fn doc_key(doc: &Value, key_field: &str) -> Option<String> {
    match doc.get(key_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_ts(doc: &Value, field: &str) -> Option<DateTime<Utc>> {
    let raw = doc.get(field)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn cmp_field(a: &Value, b: &Value, field: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_is_last_write_wins() {
        let store = JsonStore::in_memory();
        store
            .upsert("profiles", "acme", json!({"followers": 1}))
            .await
            .unwrap();
        store
            .upsert("profiles", "acme", json!({"followers": 2}))
            .await
            .unwrap();
        let doc = store.find_one("profiles", "acme").await.unwrap().unwrap();
        assert_eq!(doc["followers"], 2);
    }

    #[tokio::test]
    async fn find_applies_filter_sort_and_limit() {
        let store = JsonStore::in_memory();
        for (id, likes, state) in [("a", 10, "active"), ("b", 30, "active"), ("c", 20, "deleted")]
        {
            store
                .upsert("posts", id, json!({"id": id, "likes": likes, "state": state}))
                .await
                .unwrap();
        }

        let docs = store
            .find(
                "posts",
                &Filter::new().ne("state", "deleted"),
                &FindOptions {
                    sort_desc: Some("likes".into()),
                    limit: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["id"], "b");
    }

    #[tokio::test]
    async fn filter_eq_on_missing_field_excludes() {
        let store = JsonStore::in_memory();
        store.upsert("posts", "a", json!({"id": "a"})).await.unwrap();
        let docs = store
            .find(
                "posts",
                &Filter::new().eq("username", "acme"),
                &FindOptions::default(),
            )
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn bulk_upsert_skips_docs_without_key() {
        let store = JsonStore::in_memory();
        let written = store
            .bulk_upsert(
                "posts",
                "id",
                vec![
                    json!({"id": "a", "likes": 1}),
                    json!({"likes": 2}),
                    json!({"id": 37, "likes": 3}),
                ],
            )
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert!(store.find_one("posts", "37").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ttl_sweep_removes_only_expired() {
        let store = JsonStore::in_memory();
        let now = Utc::now();
        store.create_ttl_index("snapshots", "cachedAt", Duration::hours(1));

        store
            .upsert(
                "snapshots",
                "old",
                json!({"cachedAt": (now - Duration::hours(2)).to_rfc3339()}),
            )
            .await
            .unwrap();
        store
            .upsert(
                "snapshots",
                "fresh",
                json!({"cachedAt": now.to_rfc3339()}),
            )
            .await
            .unwrap();
        store
            .upsert("snapshots", "no_ts", json!({"likes": 1}))
            .await
            .unwrap();

        assert_eq!(store.sweep_expired(now), 1);
        assert!(store.find_one("snapshots", "old").await.unwrap().is_none());
        assert!(store.find_one("snapshots", "fresh").await.unwrap().is_some());
        assert!(store.find_one("snapshots", "no_ts").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn flush_and_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonStore::open(dir.path()).unwrap();
            store
                .upsert("profiles", "acme", json!({"followers": 42}))
                .await
                .unwrap();
            store.flush().unwrap();
        }
        let store = JsonStore::open(dir.path()).unwrap();
        let doc = store.find_one("profiles", "acme").await.unwrap().unwrap();
        assert_eq!(doc["followers"], 42);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = JsonStore::in_memory();
        store.upsert("x", "k", json!({})).await.unwrap();
        assert!(store.delete("x", "k").await.unwrap());
        assert!(!store.delete("x", "k").await.unwrap());
    }
}
