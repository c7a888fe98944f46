//! Shared key-value store with TTL expiry and publish/subscribe.
//!
//! Every piece of state that more than one process touches lives behind
//! [`CoordinationStore`]: progress snapshots, submission trackers, per-domain
//! caches and the circuit breaker counters. Counters are only ever mutated
//! through [`CoordinationStore::incr_ex`] or plain overwrites, never through a
//! read-modify-write across a network round trip.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

pub mod memory;
pub mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrites `key` with a value that expires after `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Sets `key` only when it does not exist yet. Returns whether it was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, StoreError>;

    /// Atomically increments the integer at `key` and (re)arms its expiry.
    async fn incr_ex(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError>;

    /// Atomically increments a counter that never expires.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Re-arms the expiry of an existing key. Returns false when it is gone.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError>;

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Keys matching a glob pattern (`*` only). Administrative use.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError>;
}

/// Key of a unit's [`ProgressSnapshot`](crate::models::ProgressSnapshot).
pub fn progress_key(unit_id: &str) -> String {
    format!("validation_results:{unit_id}")
}

/// Key of a multi-unit [`SubmissionTracker`](crate::models::SubmissionTracker).
pub fn tracker_key(request_id: &str) -> String {
    format!("multi_batch:{request_id}")
}

/// Reverse lookup from a unit to the submission it belongs to.
pub fn parent_key(unit_id: &str) -> String {
    format!("batch_parent:{unit_id}")
}

/// Reads and decodes a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CoordinationStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encodes and writes a JSON value with a TTL.
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn CoordinationStore,
    key: &str,
    value: &T,
    ttl_secs: u64,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(value)?;
    store.set_ex(key, &json, ttl_secs).await
}

/// Glob match supporting `*` wildcards, mirroring the subset of Redis `KEYS`
/// patterns used by the service.
pub(crate) fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }

    let mut rest = candidate;
    let first = parts[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    let last = parts[parts.len() - 1];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
