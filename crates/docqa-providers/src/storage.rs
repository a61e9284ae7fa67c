//! Blob storage backends.

use async_trait::async_trait;
use chrono::Utc;
use docqa_core::error::{DocQaError, Result};
use docqa_core::traits::{BlobStore, FileInfo};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Local-filesystem blob store. Blobs are stored under a generated id,
/// keeping the original extension so parsers can sniff the format.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!("local blob store at {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        // Ids are generated by `save`; reject anything path-like.
        if id.is_empty() || id.contains('/') || id.contains("..") {
            return Err(DocQaError::invalid_argument(format!("invalid blob id '{}'", id)));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save(&self, content: &[u8], name: &str) -> Result<FileInfo> {
        let extension = Path::new(name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let id = format!("{}{}", Uuid::new_v4(), extension);

        let path = self.path_for(&id)?;
        fs::write(&path, content).await?;
        debug!("stored blob {} ({} bytes)", id, content.len());

        Ok(FileInfo {
            id,
            name: name.to_string(),
            size: content.len() as i64,
            path: path.to_string_lossy().into_owned(),
            uploaded_at: Utc::now(),
        })
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(DocQaError::not_found("blob", id));
        }
        Ok(fs::read(path).await?)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(DocQaError::not_found("blob", id));
        }
        fs::remove_file(path).await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.path_for(id)?.exists())
    }

    async fn list(&self) -> Result<Vec<FileInfo>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(FileInfo {
                id: name.clone(),
                name,
                size: metadata.len() as i64,
                path: entry.path().to_string_lossy().into_owned(),
                uploaded_at: metadata
                    .modified()
                    .ok()
                    .map(chrono::DateTime::from)
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(files)
    }
}
