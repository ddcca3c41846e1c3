//! View cache for rendered list responses.
//!
//! Keys are view paths such as `/leads` or `/projects?client_id=...`.
//! Mutations call [`ViewCache::revalidate_path`] so the next read recomputes.
//! Each view root (`/leads`, `/projects`, ...) carries a generation that
//! revalidation bumps; a view computed under an older generation is not
//! stored.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde_json::Value;

pub const DEFAULT_CAPACITY: usize = 256;

/// View roots invalidated by mutations.
pub mod paths {
    pub const LEADS: &str = "/leads";
    pub const CLIENTS: &str = "/clients";
    pub const PROJECTS: &str = "/projects";
    pub const TASKS: &str = "/tasks";
    pub const TEMPLATES: &str = "/email-templates";
    pub const PROPOSALS: &str = "/proposals";
    pub const INVOICES: &str = "/invoices";
    pub const MEETINGS: &str = "/meetings";
    pub const BILLING: &str = "/settings/billing";
}

struct CacheState {
    entries: LruCache<String, Value>,
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, key: &str) -> u64 {
        self.generations.get(root(key)).copied().unwrap_or(0)
    }
}

pub struct ViewCache {
    state: Mutex<CacheState>,
}

impl ViewCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                generations: HashMap::new(),
            }),
        }
    }

    // The cache only holds derived data, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().entries.get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.lock().entries.put(key.into(), value);
    }

    /// Current generation of the root `key` belongs to. Read it before
    /// computing a view and hand it to [`ViewCache::insert_if_current`].
    pub fn generation(&self, key: &str) -> u64 {
        self.lock().generation(key)
    }

    /// Store `value` only if its root was not revalidated since `generation`
    /// was read. Returns whether the value was stored.
    pub fn insert_if_current(&self, key: impl Into<String>, value: Value, generation: u64) -> bool {
        let key = key.into();
        let mut state = self.lock();
        if state.generation(&key) != generation {
            return false;
        }
        state.entries.put(key, value);
        true
    }

    /// Drop `path` and every view under it (`path/...` and `path?...`).
    pub fn revalidate_path(&self, path: &str) -> usize {
        let path = path.trim_end_matches('/');
        let mut state = self.lock();
        *state.generations.entry(root(path).to_string()).or_default() += 1;
        let stale: Vec<String> = state
            .entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| is_under(key, path))
            .cloned()
            .collect();
        for key in &stale {
            state.entries.pop(key);
        }
        if !stale.is_empty() {
            tracing::debug!(path, dropped = stale.len(), "Revalidated view cache");
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// First segment of a view path: `/leads/abc?x=1` -> `/leads`.
fn root(path: &str) -> &str {
    let end = path
        .char_indices()
        .skip(1)
        .find(|(_, c)| matches!(c, '/' | '?'))
        .map_or(path.len(), |(i, _)| i);
    &path[..end]
}

fn is_under(key: &str, path: &str) -> bool {
    match key.strip_prefix(path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn revalidate_drops_path_and_children_only() {
        let cache = ViewCache::new(16);
        cache.insert("/leads", json!([1]));
        cache.insert("/leads?status=new", json!([2]));
        cache.insert("/leads/abc", json!({"id": "abc"}));
        cache.insert("/leadsheet", json!([]));
        cache.insert("/clients", json!([]));

        assert_eq!(cache.revalidate_path("/leads"), 3);
        assert!(cache.get("/leads").is_none());
        assert!(cache.get("/leads/abc").is_none());
        assert_eq!(cache.get("/leadsheet"), Some(json!([])));
        assert_eq!(cache.get("/clients"), Some(json!([])));
        assert_eq!(cache.revalidate_path("/leads"), 0);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = ViewCache::new(2);
        cache.insert("/a", json!(1));
        cache.insert("/b", json!(2));
        assert!(cache.get("/a").is_some());
        cache.insert("/c", json!(3));
        assert!(cache.get("/b").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = ViewCache::new(0);
        cache.insert("/a", json!(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn views_computed_before_a_revalidation_are_not_stored() {
        let cache = ViewCache::new(16);
        let leads = cache.generation("/leads?status=new");
        let clients = cache.generation("/clients");

        cache.revalidate_path("/leads");
        assert!(!cache.insert_if_current("/leads?status=new", json!(["stale"]), leads));
        assert!(cache.get("/leads?status=new").is_none());

        assert!(cache.insert_if_current("/clients", json!([]), clients));
        assert_eq!(cache.get("/clients"), Some(json!([])));

        let fresh = cache.generation("/leads/abc");
        assert!(cache.insert_if_current("/leads/abc", json!({"id": "abc"}), fresh));
        assert_eq!(cache.get("/leads/abc"), Some(json!({"id": "abc"})));
    }

    #[test]
    fn roots_stop_at_the_first_segment() {
        assert_eq!(root("/leads"), "/leads");
        assert_eq!(root("/leads/abc"), "/leads");
        assert_eq!(root("/projects?client_id=1"), "/projects");
        assert_eq!(root("/settings/billing"), "/settings");
    }
}
