//! Query cache with explicit invalidation.
//!
//! Holds the latest successfully fetched copy of list and detail queries,
//! keyed by a hierarchical [`QueryKey`]. Mutations call
//! [`QueryCache::invalidate`] with a key prefix; every entry under that
//! prefix is marked stale so the next read re-fetches it.
//!
//! The cache is an ordinary value shared through `Arc`. Nothing in the crate
//! reaches it through a global.
//!
//! ```rust
//! use knowflow::cache::{QueryCache, QueryKey};
//!
//! let cache = QueryCache::new();
//! cache.put(&QueryKey::document_list_for("kb-1"), serde_json::json!([]));
//! cache.invalidate(&QueryKey::document_list());
//! assert!(cache.is_stale(&QueryKey::document_list_for("kb-1")));
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Hierarchical cache key, e.g. `["documents", "kb-1"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Every document list, whatever knowledge base it belongs to.
    pub fn document_list() -> Self {
        Self::new(["documents"])
    }

    pub fn document_list_for(kb_id: &str) -> Self {
        Self::new(["documents", kb_id])
    }

    pub fn knowledge_bases() -> Self {
        Self::new(["knowledgebases"])
    }

    pub fn users() -> Self {
        Self::new(["users"])
    }

    pub fn teams() -> Self {
        Self::new(["teams"])
    }

    /// Members of one team; nested under [`QueryKey::teams`] so team
    /// mutations invalidate both.
    pub fn team_members(team_id: &str) -> Self {
        Self::new(["teams", team_id, "members"])
    }

    pub fn files() -> Self {
        Self::new(["files"])
    }

    pub fn chunking_config(doc_id: &str) -> Self {
        Self::new(["chunking-config", doc_id])
    }

    /// A key nested under `self`.
    pub fn join<I, S>(&self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut key = self.0.clone();
        key.extend(parts.into_iter().map(Into::into));
        Self(key)
    }

    /// Whether `self` lies under `prefix`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

struct Entry {
    value: serde_json::Value,
    stale: bool,
}

/// Shared cache of query results.
pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    invalidations: Mutex<HashMap<QueryKey, u64>>,
    events: broadcast::Sender<QueryKey>,
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(HashMap::new()),
            invalidations: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Store a fresh value for `key`.
    pub fn put(&self, key: &QueryKey, value: serde_json::Value) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.clone(), Entry { value, stale: false });
    }

    /// Fresh value for `key`, or `None` if absent or stale.
    pub fn get(&self, key: &QueryKey) -> Option<serde_json::Value> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|e| !e.stale)
            .map(|e| e.value.clone())
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.stale).unwrap_or(true)
    }

    /// Mark every entry under `prefix` stale and notify subscribers.
    pub fn invalidate(&self, prefix: &QueryKey) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            for (key, entry) in entries.iter_mut() {
                if key.starts_with(prefix) {
                    entry.stale = true;
                }
            }
        }
        {
            let mut counts = self
                .invalidations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *counts.entry(prefix.clone()).or_insert(0) += 1;
        }
        tracing::debug!(key = %prefix, "cache invalidated");
        // No receivers is fine.
        let _ = self.events.send(prefix.clone());
    }

    /// Number of times exactly `prefix` was passed to [`invalidate`](Self::invalidate).
    pub fn invalidation_count(&self, prefix: &QueryKey) -> u64 {
        let counts = self
            .invalidations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        counts.get(prefix).copied().unwrap_or(0)
    }

    /// Receive every invalidated prefix from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.events.subscribe()
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// Fetch errors are returned unchanged and leave the cache untouched.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: &QueryKey, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key) {
            if let Ok(hit) = serde_json::from_value::<T>(value) {
                return Ok(hit);
            }
        }
        let fresh = fetch().await?;
        if let Ok(value) = serde_json::to_value(&fresh) {
            self.put(key, value);
        }
        Ok(fresh)
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}
