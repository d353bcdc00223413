//! The session store.
//!
//! Mutations are short (swap a history vector, stamp a timestamp) so a
//! single `RwLock` around the map is enough; nothing async happens under the
//! lock. Predicates take `now` as an argument so tests control time.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use bp_domain::turn::Turn;

pub const DEFAULT_MAX_SESSIONS: usize = 500;
pub const DEFAULT_IDLE_TTL_SECS: u64 = 1800;

struct SessionEntry {
    history: Vec<Turn>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Bounded keyed store of conversation histories.
pub struct SessionStore {
    max_sessions: usize,
    idle_ttl: Duration,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionStore {
    pub fn new(max_sessions: usize, idle_ttl: Duration) -> Self {
        Self {
            max_sessions,
            idle_ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a new session with an empty history. Evicts under pressure so
    /// the store never exceeds `max_sessions`.
    pub fn create(&self, now: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write();
        Self::make_room(&mut sessions, self.max_sessions, self.idle_ttl, now);
        sessions.insert(
            id,
            SessionEntry {
                history: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    /// Fetch a session's history. Unknown or idle-expired sessions return
    /// `None` (expired ones are removed); a successful read touches
    /// `updated_at`.
    pub fn get(&self, id: &Uuid, now: DateTime<Utc>) -> Option<Vec<Turn>> {
        let mut sessions = self.sessions.write();
        let expired = match sessions.get(id) {
            Some(entry) => now - entry.updated_at >= self.idle_ttl,
            None => return None,
        };
        if expired {
            sessions.remove(id);
            return None;
        }
        let entry = sessions.get_mut(id)?;
        entry.updated_at = now;
        Some(entry.history.clone())
    }

    /// Overwrite a session's history, creating the session if absent.
    pub fn set(&self, id: Uuid, history: Vec<Turn>, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&id) {
            Some(entry) => {
                entry.history = history;
                entry.updated_at = now;
            }
            None => {
                Self::make_room(&mut sessions, self.max_sessions, self.idle_ttl, now);
                sessions.insert(
                    id,
                    SessionEntry {
                        history,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }

    pub fn delete(&self, id: &Uuid) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Remove every session idle longer than the TTL. Run periodically by
    /// the gateway. Returns the number removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        let ttl = self.idle_ttl;
        sessions.retain(|_, entry| now - entry.updated_at < ttl);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "session sweep");
        }
        removed
    }

    /// Expiry sweep first, then LRU eviction by `updated_at` until there is
    /// room for one more session.
    fn make_room(
        sessions: &mut HashMap<Uuid, SessionEntry>,
        max: usize,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        if sessions.len() < max {
            return;
        }
        sessions.retain(|_, entry| now - entry.updated_at < ttl);

        while sessions.len() >= max {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, e)| e.updated_at)
                .map(|(id, _)| *id)
            else {
                break;
            };
            tracing::debug!(session_id = %oldest, "evicting least-recently-used session");
            sessions.remove(&oldest);
        }
    }

    /// Creation timestamp, for diagnostics.
    pub fn created_at(&self, id: &Uuid) -> Option<DateTime<Utc>> {
        self.sessions.read().get(id).map(|e| e.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_domain::turn::Turn;

    fn store(max: usize, ttl_secs: i64) -> SessionStore {
        SessionStore::new(max, Duration::seconds(ttl_secs))
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = store(10, 60);
        let now = Utc::now();
        let id = store.create(now);
        let history = vec![Turn::user_text("hi")];
        store.set(id, history.clone(), now);
        assert_eq!(store.get(&id, now), Some(history));
    }

    #[test]
    fn get_touches_updated_at() {
        let store = store(10, 60);
        let t0 = Utc::now();
        let id = store.create(t0);

        // 59s idle: still alive because each read touches the clock.
        let t1 = t0 + Duration::seconds(50);
        assert!(store.get(&id, t1).is_some());
        let t2 = t1 + Duration::seconds(50);
        assert!(store.get(&id, t2).is_some());
    }

    #[test]
    fn idle_session_expires_on_get() {
        let store = store(10, 60);
        let t0 = Utc::now();
        let id = store.create(t0);
        assert!(store.get(&id, t0 + Duration::seconds(61)).is_none());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn sweep_removes_expired_only() {
        let store = store(10, 60);
        let t0 = Utc::now();
        let old = store.create(t0);
        let fresh = store.create(t0 + Duration::seconds(55));

        assert_eq!(store.sweep_expired(t0 + Duration::seconds(61)), 1);
        assert!(store.get(&old, t0 + Duration::seconds(61)).is_none());
        assert!(store.get(&fresh, t0 + Duration::seconds(61)).is_some());
    }

    #[test]
    fn lru_eviction_keeps_store_bounded() {
        let store = store(3, 3600);
        let t0 = Utc::now();
        let a = store.create(t0);
        let b = store.create(t0 + Duration::seconds(1));
        let c = store.create(t0 + Duration::seconds(2));

        // Touch `a` so `b` becomes the LRU.
        assert!(store.get(&a, t0 + Duration::seconds(3)).is_some());

        let d = store.create(t0 + Duration::seconds(4));
        assert_eq!(store.count(), 3);
        assert!(store.get(&b, t0 + Duration::seconds(5)).is_none());
        for id in [&a, &c, &d] {
            assert!(store.get(id, t0 + Duration::seconds(5)).is_some());
        }
    }

    #[test]
    fn count_never_exceeds_max() {
        let store = store(5, 3600);
        let t0 = Utc::now();
        for i in 0..20 {
            store.create(t0 + Duration::seconds(i));
            assert!(store.count() <= 5);
        }
    }

    #[test]
    fn delete_is_idempotent() {
        let store = store(10, 60);
        let id = store.create(Utc::now());
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
    }

    #[test]
    fn set_creates_missing_session() {
        let store = store(10, 60);
        let id = Uuid::new_v4();
        store.set(id, vec![Turn::user_text("restored")], Utc::now());
        assert_eq!(store.count(), 1);
    }
}
