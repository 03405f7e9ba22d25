//! TTL-bounded result cache.
//!
//! Keyed by a deterministic fingerprint of the query and its options.
//! Capacity-bounded as well as TTL-bounded, so a burst of distinct queries
//! cannot grow the cache without limit; expired entries are simply absent on
//! the next read.

use crate::types::{SearchCandidate, SearchOptions};
use moka::sync::Cache;
use scout_core::QueryCacheConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct ResultCache {
    /// `None` when caching is disabled; lookups then count nothing.
    inner: Option<Cache<String, Arc<Vec<SearchCandidate>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(config: &QueryCacheConfig) -> Self {
        let inner = if config.enabled {
            Some(
                Cache::builder()
                    .max_capacity(config.max_size)
                    .time_to_live(Duration::from_millis(config.ttl_ms))
                    .build(),
            )
        } else {
            None
        };
        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Deterministic fingerprint of a query and its options. Terms are
    /// sorted so equivalent queries share an entry regardless of expansion
    /// order.
    pub fn fingerprint(kind: &str, terms: &[String], options: &SearchOptions) -> String {
        let mut sorted: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        sorted.sort();
        let options_json = serde_json::to_string(options).unwrap_or_default();
        format!("{kind}:{}|{options_json}", sorted.join(","))
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<SearchCandidate>>> {
        let inner = self.inner.as_ref()?;
        match inner.get(key) {
            Some(results) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "result cache hit");
                Some(results)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, results: Arc<Vec<SearchCandidate>>) {
        if let Some(inner) = &self.inner {
            inner.insert(key, results);
        }
    }

    /// Drop every entry. Counters are preserved; only contents clear.
    pub fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.invalidate_all();
            debug!("result cache cleared");
        }
    }

    /// `hits / (hits + misses) * 100`; 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64) -> SearchCandidate {
        SearchCandidate {
            id,
            path: format!("src/{id}.rs"),
            filename: format!("{id}.rs"),
            score: 1.0,
            matches: Vec::new(),
            metadata: Default::default(),
        }
    }

    fn enabled_config() -> QueryCacheConfig {
        QueryCacheConfig {
            enabled: true,
            max_size: 10,
            ttl_ms: 60_000,
        }
    }

    #[test]
    fn miss_then_hit_is_fifty_percent() {
        let cache = ResultCache::new(&enabled_config());
        let key = "tags:rust|{}".to_string();

        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), Arc::new(vec![candidate(1)]));
        assert!(cache.get(&key).is_some());

        assert!((cache.hit_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disabled_cache_counts_nothing() {
        let cache = ResultCache::new(&QueryCacheConfig {
            enabled: false,
            ..enabled_config()
        });
        cache.insert("k".into(), Arc::new(vec![]));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.hit_rate(), 0.0);
    }

    #[test]
    fn expired_entries_are_absent() {
        let cache = ResultCache::new(&QueryCacheConfig {
            ttl_ms: 20,
            ..enabled_config()
        });
        cache.insert("k".into(), Arc::new(vec![candidate(1)]));
        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn clear_empties_contents() {
        let cache = ResultCache::new(&enabled_config());
        cache.insert("k".into(), Arc::new(vec![candidate(1)]));
        cache.clear();
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn fingerprint_ignores_term_order() {
        let options = SearchOptions::default();
        let a = ResultCache::fingerprint(
            "tags",
            &["rust".to_string(), "async".to_string()],
            &options,
        );
        let b = ResultCache::fingerprint(
            "tags",
            &["async".to_string(), "rust".to_string()],
            &options,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_options() {
        let terms = vec!["rust".to_string()];
        let a = ResultCache::fingerprint("tags", &terms, &SearchOptions::default());
        let b = ResultCache::fingerprint(
            "tags",
            &terms,
            &SearchOptions {
                limit: Some(5),
                ..Default::default()
            },
        );
        assert_ne!(a, b);
    }
}
