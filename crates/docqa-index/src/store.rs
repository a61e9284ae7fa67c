//! In-memory flat vector store with brute-force scanning.

use crate::cache::DistanceCache;
use crate::types::{Distance, VectorDocument};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Candidate-count threshold above which the scan is parallelised.
const PARALLEL_THRESHOLD: usize = 100;

/// Flat store of vector documents plus the by-file index.
#[derive(Clone, Default)]
pub(crate) struct FlatStore {
    documents: HashMap<String, Arc<VectorDocument>>,
    file_index: HashMap<String, HashSet<String>>,
}

impl FlatStore {
    pub fn insert(&mut self, doc: VectorDocument) {
        // Re-adding an id replaces the previous row, keeping retries idempotent.
        if let Some(previous) = self.documents.remove(&doc.id) {
            self.unlink_file(&previous.file_id, &previous.id);
        }
        self.file_index
            .entry(doc.file_id.clone())
            .or_default()
            .insert(doc.id.clone());
        self.documents.insert(doc.id.clone(), Arc::new(doc));
    }

    pub fn get(&self, id: &str) -> Option<Arc<VectorDocument>> {
        self.documents.get(id).cloned()
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<VectorDocument>> {
        let doc = self.documents.remove(id)?;
        self.unlink_file(&doc.file_id, id);
        Some(doc)
    }

    /// Remove every document of a file; returns the removed count.
    pub fn remove_by_file(&mut self, file_id: &str) -> usize {
        let Some(ids) = self.file_index.remove(file_id) else {
            return 0;
        };
        let mut removed = 0;
        for id in ids {
            if self.documents.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    fn unlink_file(&mut self, file_id: &str, doc_id: &str) {
        if let Some(ids) = self.file_index.get_mut(file_id) {
            ids.remove(doc_id);
            if ids.is_empty() {
                self.file_index.remove(file_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn file_count(&self) -> usize {
        self.file_index.len()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<VectorDocument>> {
        self.documents.values()
    }

    /// Snapshot the candidate set for a scan, honoring a file-id restriction.
    pub fn candidates(&self, file_ids: Option<&[String]>) -> Vec<Arc<VectorDocument>> {
        match file_ids {
            Some(file_ids) => {
                let mut out = Vec::new();
                for file_id in file_ids {
                    if let Some(ids) = self.file_index.get(file_id) {
                        out.extend(ids.iter().filter_map(|id| self.documents.get(id)).cloned());
                    }
                }
                out
            }
            None => self.documents.values().cloned().collect(),
        }
    }
}

/// Compute distances for every candidate against the query.
///
/// When the candidate set exceeds 100 vectors and at least two cores are
/// available the computation is split into `floor(cores * 0.8)` shards. The
/// caller holds the index read lock throughout; the candidate slice is an
/// immutable snapshot.
pub(crate) fn scan_distances(
    query: &[f32],
    query_fp: &str,
    candidates: &[Arc<VectorDocument>],
    distance: Distance,
    cache: &DistanceCache,
) -> Vec<(Arc<VectorDocument>, f32)> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    if candidates.len() > PARALLEL_THRESHOLD && cores >= 2 {
        let shards = ((cores as f32 * 0.8).floor() as usize).max(1);
        let shard_size = candidates.len().div_ceil(shards);

        use rayon::prelude::*;
        candidates
            .par_chunks(shard_size)
            .flat_map_iter(|shard| {
                shard
                    .iter()
                    .map(|doc| (doc.clone(), cached_distance(query, query_fp, doc, distance, cache)))
                    .collect::<Vec<_>>()
            })
            .collect()
    } else {
        candidates
            .iter()
            .map(|doc| (doc.clone(), cached_distance(query, query_fp, doc, distance, cache)))
            .collect()
    }
}

fn cached_distance(
    query: &[f32],
    query_fp: &str,
    doc: &Arc<VectorDocument>,
    distance: Distance,
    cache: &DistanceCache,
) -> f32 {
    if let Some(hit) = cache.get(query_fp, &doc.id) {
        return hit;
    }
    let computed = distance.compute(query, &doc.vector);
    cache.insert(query_fp, &doc.id, computed);
    computed
}
