//! In-memory cache of decoded JSON responses.
//!
//! Entries are immutable once inserted and keyed by the full request URL, so
//! concurrent readers can share them freely.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct CacheEntry {
    value: Arc<Value>,
    inserted_at: Instant,
}

/// TTL and size bounded response cache.
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the cache stores anything at all.
    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0 && !self.ttl.is_zero()
    }

    /// Return a live entry, dropping it if it has expired.
    pub async fn get(&self, key: &str) -> Option<Arc<Value>> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    /// Insert a value, evicting expired entries first and then the oldest.
    pub async fn insert(&self, key: String, value: Arc<Value>) {
        if !self.is_enabled() {
            return;
        }
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            while entries.len() >= self.max_entries {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::ResponseCache;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn returns_inserted_value() {
        let cache = ResponseCache::new(Duration::from_secs(60), 4);
        cache.insert("a".into(), Arc::new(json!({"k": 1}))).await;
        let hit = cache.get("a").await.expect("cached");
        assert_eq!(hit["k"], 1);
        assert!(cache.get("b").await.is_none());
    }

    #[tokio::test]
    async fn evicts_oldest_when_full() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), Arc::new(json!(1))).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert("b".into(), Arc::new(json!(2))).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert("c".into(), Arc::new(json!(3))).await;
        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = ResponseCache::new(Duration::from_millis(10), 4);
        cache.insert("a".into(), Arc::new(json!(1))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn zero_capacity_disables_cache() {
        let cache = ResponseCache::new(Duration::from_secs(60), 0);
        cache.insert("a".into(), Arc::new(json!(1))).await;
        assert!(cache.get("a").await.is_none());
    }
}
