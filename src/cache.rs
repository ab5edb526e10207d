//! In-memory TTL cache, the fast tier in front of the persistent store
//!
//! Values are stored as JSON so one cache can hold results of every operation
//! type. Expired entries are ignored on read and removed by [`MemoryCache::prune`],
//! which the scheduler calls periodically.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, Value)>>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Instant, Value)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries();
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Typed read. An entry that no longer deserializes is treated as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries().insert(key.into(), (Instant::now(), value));
    }

    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v),
            Err(e) => log::warn!("[cache] value not cacheable: {}", e),
        }
    }

    pub fn remove(&self, key: &str) {
        self.entries().remove(key);
    }

    /// Drop expired entries; returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

pub fn listing_key(page: &str) -> String {
    format!("doujin-{}", page)
}

pub fn search_key(query: &str, page: u32) -> String {
    format!("search-{}-{}", query, page)
}

pub fn detail_key(slug: &str) -> String {
    format!("detail-{}", slug)
}

pub fn comic_key(slug: &str) -> String {
    format!("comic-{}", slug)
}

pub fn proxy_key(hash: &str) -> String {
    format!("proxy-{}", hash)
}
