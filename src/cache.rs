//! Content-addressed cache of classification outcomes.
//!
//! Keys are the normalized message text, so the same message from two
//! players shares one entry. Entries expire after a TTL and the map is
//! bounded, evicting the least recently used entry beyond the cap.

use crate::classifier::ModerationResult;
use crate::text::normalize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct CachedClassification {
    pub flagged: bool,
    pub category: String,
    pub score: f64,
}

struct CacheEntry {
    value: CachedClassification,
    inserted: Instant,
    last_access: Instant,
}

pub struct MessageCache {
    enabled: bool,
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MessageCache {
    pub fn new(enabled: bool, max_entries: usize, ttl: Duration) -> Self {
        MessageCache {
            enabled,
            max_entries: max_entries.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, message: &str) -> Option<CachedClassification> {
        if !self.enabled {
            return None;
        }

        let key = normalize(message);
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return None,
        };

        let now = Instant::now();
        match entries.get_mut(&key) {
            Some(entry) if now.duration_since(entry.inserted) < self.ttl => {
                entry.last_access = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, message: &str, result: &ModerationResult) {
        if !self.enabled {
            return;
        }

        let (category, score) = result.highest_category();
        let value = CachedClassification {
            flagged: result.flagged,
            category,
            score,
        };

        let key = normalize(message);
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let now = Instant::now();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| now.duration_since(entry.inserted) < self.ttl);
            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted: now,
                last_access: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn result(flagged: bool, scores: &[(&str, f64)]) -> ModerationResult {
        ModerationResult {
            flagged,
            categories: Map::new(),
            category_scores: scores
                .iter()
                .map(|(category, score)| (category.to_string(), *score))
                .collect(),
            error: None,
        }
    }

    #[test]
    fn round_trips_by_normalized_key() {
        let cache = MessageCache::new(true, 10, Duration::from_secs(60));
        cache.put("Buy GOLD now", &result(true, &[("spam", 0.9)]));

        // Different casing and spacing hit the same entry.
        let hit = cache.get("  buy   gold NOW ").unwrap();
        assert!(hit.flagged);
        assert_eq!(hit.category, "spam");
        assert!((hit.score - 0.9).abs() < f64::EPSILON);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = MessageCache::new(false, 10, Duration::from_secs(60));
        cache.put("hello", &result(false, &[]));
        assert!(cache.get("hello").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = MessageCache::new(true, 10, Duration::from_millis(30));
        cache.put("hello", &result(false, &[("spam", 0.1)]));
        assert!(cache.get("hello").is_some());
        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.get("hello").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn evicts_least_recently_used_beyond_cap() {
        let cache = MessageCache::new(true, 2, Duration::from_secs(60));
        cache.put("first", &result(false, &[("spam", 0.1)]));
        std::thread::sleep(Duration::from_millis(5));
        cache.put("second", &result(false, &[("spam", 0.2)]));
        std::thread::sleep(Duration::from_millis(5));

        // Touch "first" so "second" becomes the LRU entry.
        assert!(cache.get("first").is_some());
        std::thread::sleep(Duration::from_millis(5));
        cache.put("third", &result(false, &[("spam", 0.3)]));

        assert!(cache.get("first").is_some());
        assert!(cache.get("second").is_none());
        assert!(cache.get("third").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = MessageCache::new(true, 10, Duration::from_secs(60));
        assert!(cache.get("missing").is_none());
        cache.put("present", &result(false, &[("spam", 0.1)]));
        assert!(cache.get("present").is_some());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }
}
