//! Flat-file persistence: a binary vector file plus a JSON metadata sidecar.
//!
//! The vector file holds the raw embeddings (bincode, ordered by position);
//! the sidecar `*.meta.json` holds everything else: document rows, the
//! by-file index, the id-to-position map, and the operation counter. Both
//! files are written atomically via a temp file and rename.

use crate::store::FlatStore;
use crate::types::VectorDocument;
use bincode::config;
use chrono::{DateTime, Utc};
use docqa_core::error::{DocQaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Document row as stored in the metadata sidecar (vector lives in the
/// binary file, addressed through `id_to_position`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    file_id: String,
    file_name: String,
    position: usize,
    text: String,
    created_at: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMeta {
    documents: Vec<StoredDocument>,
    file_to_doc_ids: HashMap<String, Vec<String>>,
    id_to_position: HashMap<String, usize>,
    operation_count: u64,
}

/// On-disk persistence for the flat index.
pub(crate) struct FlatFilePersistence {
    index_path: PathBuf,
    meta_path: PathBuf,
}

impl FlatFilePersistence {
    pub fn new(index_path: PathBuf) -> Self {
        let meta_path = meta_path_for(&index_path);
        Self {
            index_path,
            meta_path,
        }
    }

    /// Load the persisted index, or `None` when either file is missing.
    pub async fn load(&self, dimension: usize) -> Result<Option<(FlatStore, u64)>> {
        if !self.index_path.exists() || !self.meta_path.exists() {
            return Ok(None);
        }

        debug!("loading vector index from {}", self.index_path.display());

        let raw_vectors = fs::read(&self.index_path).await?;
        let (vectors, _): (Vec<Vec<f32>>, usize) =
            bincode::serde::decode_from_slice(&raw_vectors, config::standard())
                .map_err(|e| DocQaError::storage(format!("index file decode failed: {}", e)))?;

        let raw_meta = fs::read_to_string(&self.meta_path).await?;
        let meta: StoredMeta = serde_json::from_str(&raw_meta)?;

        let mut store = FlatStore::default();
        for row in meta.documents {
            let slot = meta.id_to_position.get(&row.id).ok_or_else(|| {
                DocQaError::storage(format!("document '{}' missing from position map", row.id))
            })?;
            let vector = vectors.get(*slot).cloned().ok_or_else(|| {
                DocQaError::storage(format!("vector slot {} out of range", slot))
            })?;
            if vector.len() != dimension {
                return Err(DocQaError::InvalidDimension {
                    expected: dimension,
                    got: vector.len(),
                });
            }
            store.insert(VectorDocument {
                id: row.id,
                file_id: row.file_id,
                file_name: row.file_name,
                position: row.position,
                text: row.text,
                vector,
                created_at: row.created_at,
                metadata: row.metadata,
            });
        }

        info!(
            "vector index loaded: {} documents, {} operations recorded",
            store.len(),
            meta.operation_count
        );
        Ok(Some((store, meta.operation_count)))
    }

    /// Persist a snapshot of the store.
    pub async fn save(&self, store: &FlatStore, operation_count: u64) -> Result<()> {
        let mut documents = Vec::with_capacity(store.len());
        let mut vectors = Vec::with_capacity(store.len());
        let mut file_to_doc_ids: HashMap<String, Vec<String>> = HashMap::new();
        let mut id_to_position = HashMap::with_capacity(store.len());

        let mut rows: Vec<_> = store.documents().collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));

        for (slot, doc) in rows.into_iter().enumerate() {
            id_to_position.insert(doc.id.clone(), slot);
            file_to_doc_ids
                .entry(doc.file_id.clone())
                .or_default()
                .push(doc.id.clone());
            vectors.push(doc.vector.clone());
            documents.push(StoredDocument {
                id: doc.id.clone(),
                file_id: doc.file_id.clone(),
                file_name: doc.file_name.clone(),
                position: doc.position,
                text: doc.text.clone(),
                created_at: doc.created_at,
                metadata: doc.metadata.clone(),
            });
        }

        let meta = StoredMeta {
            documents,
            file_to_doc_ids,
            id_to_position,
            operation_count,
        };

        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let encoded = bincode::serde::encode_to_vec(&vectors, config::standard())
            .map_err(|e| DocQaError::storage(format!("index file encode failed: {}", e)))?;
        write_atomic(&self.index_path, &encoded).await?;

        let meta_json = serde_json::to_vec_pretty(&meta)?;
        write_atomic(&self.meta_path, &meta_json).await?;

        debug!(
            "vector index persisted to {} ({} documents)",
            self.index_path.display(),
            meta.operation_count
        );
        Ok(())
    }
}

fn meta_path_for(index_path: &Path) -> PathBuf {
    let mut name = index_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    name.push_str(".meta.json");
    index_path.with_file_name(name)
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_path_sibling() {
        let meta = meta_path_for(Path::new("/data/vectors.idx"));
        assert_eq!(meta, Path::new("/data/vectors.meta.json"));
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");
        let persistence = FlatFilePersistence::new(path.clone());

        let mut store = FlatStore::default();
        let mut doc = VectorDocument::new("a_0", "a", 0, "hello", vec![0.1, 0.2, 0.3]);
        doc.metadata.insert("k".to_string(), "v".to_string());
        store.insert(doc);
        store.insert(VectorDocument::new("b_0", "b", 0, "world", vec![0.4, 0.5, 0.6]));

        persistence.save(&store, 42).await.unwrap();
        assert!(path.exists());
        assert!(dir.path().join("vectors.meta.json").exists());

        let (loaded, ops) = persistence.load(3).await.unwrap().unwrap();
        assert_eq!(ops, 42);
        assert_eq!(loaded.len(), 2);
        let restored = loaded.get("a_0").unwrap();
        assert_eq!(restored.text, "hello");
        assert_eq!(restored.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(restored.metadata.get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FlatFilePersistence::new(dir.path().join("missing.idx"));
        assert!(persistence.load(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.idx");
        let persistence = FlatFilePersistence::new(path);

        let mut store = FlatStore::default();
        store.insert(VectorDocument::new("a_0", "a", 0, "hello", vec![0.1, 0.2]));
        persistence.save(&store, 1).await.unwrap();

        assert!(persistence.load(3).await.is_err());
    }
}
