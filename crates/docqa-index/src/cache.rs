//! Two-stage caching in front of the vector index.
//!
//! A distance cache keyed by (query fingerprint, document id) stores scalar
//! distances; a query-result cache keyed by (query fingerprint, filter
//! fingerprint) stores returned result lists. The result cache is TTL and
//! LRU bounded and is invalidated by every index write.

use crate::types::{SearchFilter, SearchResult};
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Default TTL of the query-result cache.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Default entry bound of the query-result cache.
pub const DEFAULT_RESULT_CAPACITY: u64 = 1000;

/// Fingerprint of a query vector: SHA-256 over its little-endian bytes.
pub fn query_fingerprint(query: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for value in query {
        hasher.update(value.to_le_bytes());
    }
    hex_digest(hasher)
}

/// Fingerprint of a search filter over its stable serialization.
pub fn filter_fingerprint(filter: &SearchFilter) -> String {
    let mut parts = Vec::new();
    parts.push(format!("min_score={:.6}", filter.min_score));
    parts.push(format!("max_results={}", filter.max_results));

    if let Some(file_ids) = &filter.file_ids {
        let mut ids = file_ids.clone();
        ids.sort();
        parts.push(format!("file_ids={}", ids.join(",")));
    }

    let mut metadata: Vec<_> = filter.metadata.iter().collect();
    metadata.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in metadata {
        parts.push(format!("meta:{}={}", key, value));
    }

    let mut hasher = Sha256::new();
    hasher.update(parts.join(";").as_bytes());
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Cache key for scalar distances.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DistanceKey {
    pub query_fp: String,
    pub doc_id: String,
}

/// Cache of scalar distances per (query, document) pair.
pub struct DistanceCache {
    cache: Cache<DistanceKey, f32>,
}

impl DistanceCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    pub fn get(&self, query_fp: &str, doc_id: &str) -> Option<f32> {
        self.cache.get(&DistanceKey {
            query_fp: query_fp.to_string(),
            doc_id: doc_id.to_string(),
        })
    }

    pub fn insert(&self, query_fp: &str, doc_id: &str, distance: f32) {
        self.cache.insert(
            DistanceKey {
                query_fp: query_fp.to_string(),
                doc_id: doc_id.to_string(),
            },
            distance,
        );
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

/// Cache key for query results.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub query_fp: String,
    pub filter_fp: String,
}

/// TTL + LRU bounded cache of search result lists.
pub struct ResultCache {
    cache: Cache<ResultKey, Arc<Vec<SearchResult>>>,
}

impl ResultCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, query_fp: &str, filter_fp: &str) -> Option<Arc<Vec<SearchResult>>> {
        self.cache.get(&ResultKey {
            query_fp: query_fp.to_string(),
            filter_fp: filter_fp.to_string(),
        })
    }

    pub fn insert(&self, query_fp: &str, filter_fp: &str, results: Vec<SearchResult>) {
        self.cache.insert(
            ResultKey {
                query_fp: query_fp.to_string(),
                filter_fp: filter_fp.to_string(),
            },
            Arc::new(results),
        );
    }

    /// Drop every cached result list. Called on any index write.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_fingerprint_is_stable() {
        let a = query_fingerprint(&[0.1, 0.2, 0.3]);
        let b = query_fingerprint(&[0.1, 0.2, 0.3]);
        let c = query_fingerprint(&[0.1, 0.2, 0.4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_filter_fingerprint_ignores_ordering() {
        let mut f1 = SearchFilter::default();
        f1.file_ids = Some(vec!["b".into(), "a".into()]);
        f1.metadata.insert("x".into(), "1".into());
        f1.metadata.insert("y".into(), "2".into());

        let mut f2 = SearchFilter::default();
        f2.file_ids = Some(vec!["a".into(), "b".into()]);
        f2.metadata.insert("y".into(), "2".into());
        f2.metadata.insert("x".into(), "1".into());

        assert_eq!(filter_fingerprint(&f1), filter_fingerprint(&f2));

        f2.min_score = 0.9;
        assert_ne!(filter_fingerprint(&f1), filter_fingerprint(&f2));
    }

    #[test]
    fn test_distance_cache_round_trip() {
        let cache = DistanceCache::new(100);
        assert!(cache.get("q", "d").is_none());
        cache.insert("q", "d", 0.25);
        assert_eq!(cache.get("q", "d"), Some(0.25));
        cache.clear();
        assert!(cache.get("q", "d").is_none());
    }

    #[test]
    fn test_result_cache_round_trip() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        assert!(cache.get("q", "f").is_none());
        cache.insert("q", "f", Vec::new());
        assert!(cache.get("q", "f").is_some());
        cache.clear();
        assert!(cache.get("q", "f").is_none());
    }
}
