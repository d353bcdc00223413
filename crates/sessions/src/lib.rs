//! Bounded in-memory session store: conversation histories keyed by
//! server-issued v4 UUIDs, with idle-TTL expiry and LRU eviction.

mod store;

pub use store::{SessionStore, DEFAULT_IDLE_TTL_SECS, DEFAULT_MAX_SESSIONS};
