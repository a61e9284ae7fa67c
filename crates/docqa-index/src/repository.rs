//! The vector index repository: validated writes, filtered top-K search,
//! two-stage caching, and optional flat-file persistence.

use crate::cache::{
    filter_fingerprint, query_fingerprint, DistanceCache, ResultCache, DEFAULT_RESULT_CAPACITY,
    DEFAULT_RESULT_TTL,
};
use crate::persist::FlatFilePersistence;
use crate::store::{scan_distances, FlatStore};
use crate::types::{normalize, Distance, SearchFilter, SearchResult, VectorDocument};
use chrono::Utc;
use docqa_core::error::{DocQaError, Result};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration record for the vector repository.
#[derive(Debug, Clone)]
pub struct VectorRepositoryConfig {
    pub dimension: usize,
    pub distance: Distance,
    /// Index file path; `None` keeps the index purely in memory
    pub path: Option<PathBuf>,
    /// Create a fresh index when the files are missing
    pub create_if_not_exists: bool,
    /// Persist after this many mutations (flat-file backend)
    pub persist_every: u64,
    pub result_cache_ttl: Duration,
    pub result_cache_capacity: u64,
    /// K used when a filter passes `max_results == 0`
    pub default_limit: usize,
}

impl VectorRepositoryConfig {
    pub fn new(dimension: usize, distance: Distance) -> Self {
        Self {
            dimension,
            distance,
            path: None,
            create_if_not_exists: true,
            persist_every: 100,
            result_cache_ttl: DEFAULT_RESULT_TTL,
            result_cache_capacity: DEFAULT_RESULT_CAPACITY,
            default_limit: 10,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }
}

/// Single-writer concurrent vector index with query caching.
///
/// One reader-writer lock guards the index; writes take the write lock,
/// searches take the read lock and never await while holding it.
pub struct VectorRepository {
    config: VectorRepositoryConfig,
    store: RwLock<FlatStore>,
    op_count: AtomicU64,
    persistence: Option<FlatFilePersistence>,
    distance_cache: DistanceCache,
    result_cache: ResultCache,
}

impl VectorRepository {
    /// Create an in-memory repository.
    pub fn new_memory(config: VectorRepositoryConfig) -> Self {
        info!(
            "creating in-memory vector index: dimension={}, distance={:?}",
            config.dimension, config.distance
        );
        Self::build(config, FlatStore::default(), 0, None)
    }

    /// Open (or create) a flat-file backed repository.
    pub async fn open(config: VectorRepositoryConfig) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| DocQaError::config("flat-file index requires vectordb.path"))?;
        let persistence = FlatFilePersistence::new(path.clone());

        match persistence.load(config.dimension).await? {
            Some((store, op_count)) => {
                info!(
                    "opened vector index from {}: {} documents",
                    path.display(),
                    store.len()
                );
                Ok(Self::build(config, store, op_count, Some(persistence)))
            }
            None if config.create_if_not_exists => {
                info!("creating fresh vector index at {}", path.display());
                Ok(Self::build(config, FlatStore::default(), 0, Some(persistence)))
            }
            None => Err(DocQaError::not_found("vector index", path.display().to_string())),
        }
    }

    fn build(
        config: VectorRepositoryConfig,
        store: FlatStore,
        op_count: u64,
        persistence: Option<FlatFilePersistence>,
    ) -> Self {
        let result_cache = ResultCache::new(config.result_cache_capacity, config.result_cache_ttl);
        Self {
            distance_cache: DistanceCache::new(config.result_cache_capacity * 64),
            result_cache,
            store: RwLock::new(store),
            op_count: AtomicU64::new(op_count),
            persistence,
            config,
        }
    }

    /// Insert a single document.
    pub async fn add(&self, doc: VectorDocument) -> Result<()> {
        self.add_batch(vec![doc]).await
    }

    /// Insert multiple documents.
    ///
    /// Every vector is validated before anything is inserted; a failure
    /// aborts the whole batch.
    pub async fn add_batch(&self, docs: Vec<VectorDocument>) -> Result<()> {
        for doc in &docs {
            self.validate_vector(&doc.vector)?;
        }

        let count = docs.len();
        {
            let mut store = self.store.write();
            for mut doc in docs {
                if doc.created_at.timestamp() == 0 {
                    doc.created_at = Utc::now();
                }
                if self.config.distance == Distance::Cosine {
                    normalize(&mut doc.vector);
                }
                store.insert(doc);
            }
        }

        debug!("added {} vector documents", count);
        self.after_write(count as u64).await
    }

    /// Fetch a document by id.
    pub async fn get(&self, id: &str) -> Result<VectorDocument> {
        let store = self.store.read();
        store
            .get(id)
            .map(|doc| (*doc).clone())
            .ok_or_else(|| DocQaError::not_found("vector document", id))
    }

    /// Delete a document by id.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let removed = self.store.write().remove(id).is_some();
        if !removed {
            return Err(DocQaError::not_found("vector document", id));
        }
        self.distance_cache.clear();
        self.after_write(1).await
    }

    /// Delete every document belonging to a file.
    pub async fn delete_by_file_id(&self, file_id: &str) -> Result<usize> {
        let removed = self.store.write().remove_by_file(file_id);
        debug!("deleted {} vector documents for file {}", removed, file_id);
        if removed == 0 {
            // Nothing changed; still drop cached results referencing the file.
            self.result_cache.clear();
            return Ok(0);
        }
        self.distance_cache.clear();
        self.after_write(removed as u64).await?;
        Ok(removed)
    }

    /// Filtered top-K similarity search, sorted by score descending.
    pub async fn search(&self, query: &[f32], filter: &SearchFilter) -> Result<Vec<SearchResult>> {
        self.validate_vector(query)?;

        let query_fp = query_fingerprint(query);
        let filter_fp = filter_fingerprint(filter);

        if let Some(cached) = self.result_cache.get(&query_fp, &filter_fp) {
            debug!("query result cache hit");
            return Ok((*cached).clone());
        }

        let limit = if filter.max_results == 0 {
            self.config.default_limit
        } else {
            filter.max_results
        };

        let mut results = {
            let store = self.store.read();
            let candidates = store.candidates(filter.file_ids.as_deref());
            let scanned = scan_distances(
                query,
                &query_fp,
                &candidates,
                self.config.distance,
                &self.distance_cache,
            );

            scanned
                .into_iter()
                .filter(|(doc, _)| filter.matches_metadata(doc))
                .map(|(doc, distance)| SearchResult {
                    score: self.config.distance.score(distance),
                    document: (*doc).clone(),
                })
                .filter(|result| result.score >= filter.min_score)
                .collect::<Vec<_>>()
        };

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        self.result_cache.insert(&query_fp, &filter_fp, results.clone());
        debug!("search returned {} results", results.len());
        Ok(results)
    }

    /// Number of stored documents.
    pub async fn count(&self) -> usize {
        self.store.read().len()
    }

    /// Number of distinct files in the by-file index.
    pub async fn file_count(&self) -> usize {
        self.store.read().file_count()
    }

    /// The fixed embedding dimension.
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// The configured distance function.
    pub fn distance(&self) -> Distance {
        self.config.distance
    }

    /// Persist outstanding state and release the index.
    pub async fn close(&self) -> Result<()> {
        if self.persistence.is_some() {
            self.persist_now().await?;
        }
        info!("vector index closed");
        Ok(())
    }

    fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(DocQaError::invalid_argument("empty vector"));
        }
        if vector.len() != self.config.dimension {
            return Err(DocQaError::InvalidDimension {
                expected: self.config.dimension,
                got: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(DocQaError::invalid_argument(
                "vector contains non-finite components",
            ));
        }
        Ok(())
    }

    /// Bookkeeping after any mutation: result-cache invalidation and
    /// periodic persistence.
    async fn after_write(&self, ops: u64) -> Result<()> {
        self.result_cache.clear();
        let before = self.op_count.fetch_add(ops, Ordering::SeqCst);
        let crossed_interval =
            (before / self.config.persist_every) != ((before + ops) / self.config.persist_every);
        if crossed_interval && self.persistence.is_some() {
            if let Err(e) = self.persist_now().await {
                warn!("periodic index persistence failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn persist_now(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let snapshot = self.store.read().clone();
        let ops = self.op_count.load(Ordering::SeqCst);
        persistence.save(&snapshot, ops).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn repo(dimension: usize) -> VectorRepository {
        VectorRepository::new_memory(VectorRepositoryConfig::new(dimension, Distance::Cosine))
    }

    fn doc(id: &str, file_id: &str, vector: Vec<f32>) -> VectorDocument {
        VectorDocument::new(id, file_id, 0, format!("text of {}", id), vector)
    }

    #[tokio::test]
    async fn test_add_get_round_trip() {
        let repo = repo(3);
        repo.add(doc("a_0", "a", vec![1.0, 2.0, 2.0])).await.unwrap();

        let stored = repo.get("a_0").await.unwrap();
        assert_eq!(stored.id, "a_0");
        assert_eq!(stored.file_id, "a");

        // Cosine storage normalizes.
        let norm: f32 = stored.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let repo = repo(3);
        let err = repo.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_then_get_not_found() {
        let repo = repo(2);
        repo.add(doc("a_0", "a", vec![1.0, 0.0])).await.unwrap();
        repo.delete("a_0").await.unwrap();
        assert!(repo.get("a_0").await.unwrap_err().is_not_found());
        assert!(repo.delete("a_0").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_dimension_validation() {
        let repo = repo(3);
        let err = repo.add(doc("a_0", "a", vec![1.0])).await.unwrap_err();
        assert!(matches!(err, DocQaError::InvalidDimension { expected: 3, got: 1 }));

        let err = repo.add(doc("a_0", "a", vec![])).await.unwrap_err();
        assert!(matches!(err, DocQaError::InvalidArgument(_)));

        let err = repo.add(doc("a_0", "a", vec![f32::NAN, 0.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, DocQaError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_batch_validation_aborts_whole_batch() {
        let repo = repo(2);
        let result = repo
            .add_batch(vec![doc("a_0", "a", vec![1.0, 0.0]), doc("a_1", "a", vec![1.0])])
            .await;
        assert!(result.is_err());
        assert_eq!(repo.count().await, 0);
    }

    #[tokio::test]
    async fn test_search_empty_index() {
        let repo = repo(2);
        let results = repo.search(&[1.0, 0.0], &SearchFilter::default()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_sorted_and_truncated() {
        let repo = repo(2);
        repo.add_batch(vec![
            doc("a_0", "a", vec![1.0, 0.0]),
            doc("a_1", "a", vec![0.9, 0.1]),
            doc("a_2", "a", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();

        let filter = SearchFilter {
            max_results: 2,
            ..Default::default()
        };
        let results = repo.search(&[1.0, 0.0], &filter).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.id, "a_0");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_zero_max_results_uses_default_limit() {
        let repo = repo(2);
        let docs: Vec<_> = (0..15)
            .map(|i| doc(&format!("a_{}", i), "a", vec![1.0, i as f32 * 0.01]))
            .collect();
        repo.add_batch(docs).await.unwrap();

        let results = repo.search(&[1.0, 0.0], &SearchFilter::default()).await.unwrap();
        assert_eq!(results.len(), 10);
    }

    #[tokio::test]
    async fn test_search_file_filter() {
        let repo = repo(2);
        repo.add_batch(vec![
            doc("a_0", "f1", vec![1.0, 0.0]),
            doc("a_1", "f1", vec![0.8, 0.2]),
            doc("b_0", "f2", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

        let filter = SearchFilter {
            file_ids: Some(vec!["f1".to_string()]),
            ..Default::default()
        };
        let results = repo.search(&[1.0, 0.0], &filter).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.document.file_id == "f1"));
    }

    #[tokio::test]
    async fn test_search_min_score_filter() {
        let repo = repo(2);
        repo.add_batch(vec![
            doc("a_0", "a", vec![1.0, 0.0]),
            doc("a_1", "a", vec![-1.0, 0.0]),
        ])
        .await
        .unwrap();

        let filter = SearchFilter {
            min_score: 0.9,
            ..Default::default()
        };
        let results = repo.search(&[1.0, 0.0], &filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "a_0");
        assert_relative_eq!(results[0].score, 1.0, epsilon = 1e-5);
    }

    #[tokio::test]
    async fn test_search_metadata_filter() {
        let repo = repo(2);
        let mut tagged = doc("a_0", "a", vec![1.0, 0.0]);
        tagged.metadata.insert("lang".to_string(), "english".to_string());
        repo.add_batch(vec![tagged, doc("a_1", "a", vec![1.0, 0.0])])
            .await
            .unwrap();

        let mut filter = SearchFilter::default();
        filter.metadata.insert("lang".to_string(), "^=eng".to_string());
        let results = repo.search(&[1.0, 0.0], &filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "a_0");
    }

    #[tokio::test]
    async fn test_write_invalidates_result_cache() {
        let repo = repo(2);
        repo.add(doc("a_0", "a", vec![1.0, 0.0])).await.unwrap();

        let filter = SearchFilter::default();
        let first = repo.search(&[1.0, 0.0], &filter).await.unwrap();
        assert_eq!(first.len(), 1);

        repo.add(doc("a_1", "a", vec![1.0, 0.0])).await.unwrap();
        let second = repo.search(&[1.0, 0.0], &filter).await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_file_id() {
        let repo = repo(2);
        repo.add_batch(vec![
            doc("a_0", "f1", vec![1.0, 0.0]),
            doc("a_1", "f1", vec![0.0, 1.0]),
            doc("b_0", "f2", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

        assert_eq!(repo.delete_by_file_id("f1").await.unwrap(), 2);
        assert_eq!(repo.count().await, 1);

        let filter = SearchFilter {
            file_ids: Some(vec!["f1".to_string()]),
            ..Default::default()
        };
        assert!(repo.search(&[1.0, 0.0], &filter).await.unwrap().is_empty());

        // Deleting an absent file is a no-op.
        assert_eq!(repo.delete_by_file_id("f1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flat_file_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        {
            let config = VectorRepositoryConfig::new(2, Distance::Cosine).with_path(path.clone());
            let repo = VectorRepository::open(config).await.unwrap();
            repo.add_batch(vec![
                doc("a_0", "a", vec![1.0, 0.0]),
                doc("a_1", "a", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
            repo.close().await.unwrap();
        }

        {
            let config = VectorRepositoryConfig::new(2, Distance::Cosine).with_path(path);
            let repo = VectorRepository::open(config).await.unwrap();
            assert_eq!(repo.count().await, 2);
            let results = repo.search(&[1.0, 0.0], &SearchFilter::default()).await.unwrap();
            assert_eq!(results[0].document.id, "a_0");
        }
    }

    #[tokio::test]
    async fn test_periodic_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");

        let mut config = VectorRepositoryConfig::new(2, Distance::Cosine).with_path(path.clone());
        config.persist_every = 3;
        let repo = VectorRepository::open(config).await.unwrap();

        repo.add(doc("a_0", "a", vec![1.0, 0.0])).await.unwrap();
        repo.add(doc("a_1", "a", vec![1.0, 0.0])).await.unwrap();
        assert!(!path.exists());

        repo.add(doc("a_2", "a", vec![1.0, 0.0])).await.unwrap();
        assert!(path.exists());
    }
}
