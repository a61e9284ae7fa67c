//! SQLite-backed repository for documents and their segments.

use crate::schema::init_schema;
use chrono::{DateTime, Utc};
use docqa_core::error::{DocQaError, Result};
use docqa_core::types::{Document, DocumentSegment, DocumentStatus, ProcessingStage};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

/// Repository for document and segment rows.
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    /// Connect to a SQLite database, creating the file and schema as needed.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = if dsn == ":memory:" || dsn == "sqlite::memory:" {
            // A second in-memory connection would see an empty database,
            // and reclaiming the only one would drop it entirely.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::new().in_memory(true))
                .await?
        } else {
            let path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(
                    SqliteConnectOptions::new()
                        .filename(path)
                        .create_if_missing(true)
                        .foreign_keys(true),
                )
                .await?
        };

        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (schema must already exist).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or fully update a document row.
    pub async fn save(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO documents (
                id, file_name, file_type, file_path, file_size, status,
                uploaded_at, updated_at, processed_at, progress, error,
                segment_count, tags, metadata, current_stage, current_task_id,
                retry_count
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(id) DO UPDATE SET
                file_name = excluded.file_name,
                file_type = excluded.file_type,
                file_path = excluded.file_path,
                file_size = excluded.file_size,
                status = excluded.status,
                updated_at = excluded.updated_at,
                processed_at = excluded.processed_at,
                progress = excluded.progress,
                error = excluded.error,
                segment_count = excluded.segment_count,
                tags = excluded.tags,
                metadata = excluded.metadata,
                current_stage = excluded.current_stage,
                current_task_id = excluded.current_task_id,
                retry_count = excluded.retry_count
            ",
        )
        .bind(&doc.id)
        .bind(&doc.file_name)
        .bind(&doc.file_type)
        .bind(&doc.file_path)
        .bind(doc.file_size)
        .bind(doc.status.as_str())
        .bind(doc.uploaded_at.to_rfc3339())
        .bind(doc.updated_at.to_rfc3339())
        .bind(doc.processed_at.map(|t| t.to_rfc3339()))
        .bind(doc.progress)
        .bind(&doc.error)
        .bind(doc.segment_count)
        .bind(&doc.tags)
        .bind(serde_json::to_string(&doc.metadata)?)
        .bind(doc.current_stage.map(|s| s.as_str()))
        .bind(&doc.current_task_id)
        .bind(doc.retry_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a document by id.
    pub async fn get_by_id(&self, id: &str) -> Result<Document> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| document_from_row(&r))
            .transpose()?
            .ok_or_else(|| DocQaError::not_found("document", id))
    }

    /// List documents matching the given filters, newest first.
    ///
    /// Recognized keys: `status`, `tags` (substring), `start_time` /
    /// `end_time` (RFC3339 bounds on uploaded_at), `file_name` (substring).
    /// Unknown keys are ignored.
    pub async fn list(
        &self,
        offset: i64,
        limit: i64,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<Document>> {
        let mut sql = String::from("SELECT * FROM documents WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        for (key, value) in filters {
            match key.as_str() {
                "status" => {
                    // Validate so an unknown status filters nothing out silently.
                    let status = DocumentStatus::from_str(value)?;
                    sql.push_str(" AND status = ?");
                    binds.push(status.as_str().to_string());
                }
                "tags" => {
                    sql.push_str(" AND tags LIKE ?");
                    binds.push(format!("%{}%", value));
                }
                "file_name" => {
                    sql.push_str(" AND file_name LIKE ?");
                    binds.push(format!("%{}%", value));
                }
                "start_time" => {
                    let ts = parse_rfc3339(value)?;
                    sql.push_str(" AND uploaded_at >= ?");
                    binds.push(ts.to_rfc3339());
                }
                "end_time" => {
                    let ts = parse_rfc3339(value)?;
                    sql.push_str(" AND uploaded_at <= ?");
                    binds.push(ts.to_rfc3339());
                }
                other => {
                    debug!("ignoring unknown document filter '{}'", other);
                }
            }
        }

        sql.push_str(" ORDER BY uploaded_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query = query.bind(limit).bind(offset);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(document_from_row).collect()
    }

    /// Delete a document and (via cascade plus explicit cleanup) its
    /// segments. Deleting an absent document is a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.delete_segments_by_document(id).await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            debug!("delete of absent document '{}' ignored", id);
        }
        Ok(())
    }

    /// Persist a batch of segments, replacing rows with the same segment id.
    pub async fn save_segments(&self, segments: &[DocumentSegment]) -> Result<()> {
        for segment in segments {
            sqlx::query(
                r"
                INSERT INTO document_segments (
                    document_id, segment_id, position, text, created_at,
                    updated_at, metadata, task_id, vector_id
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(segment_id) DO UPDATE SET
                    text = excluded.text,
                    updated_at = excluded.updated_at,
                    metadata = excluded.metadata,
                    task_id = excluded.task_id,
                    vector_id = excluded.vector_id
                ",
            )
            .bind(&segment.document_id)
            .bind(&segment.segment_id)
            .bind(segment.position)
            .bind(&segment.text)
            .bind(segment.created_at.to_rfc3339())
            .bind(segment.updated_at.to_rfc3339())
            .bind(serde_json::to_string(&segment.metadata)?)
            .bind(&segment.task_id)
            .bind(&segment.vector_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Load all segments of a document ordered by position.
    pub async fn segments_by_document(&self, document_id: &str) -> Result<Vec<DocumentSegment>> {
        let rows = sqlx::query(
            "SELECT * FROM document_segments WHERE document_id = ?1 ORDER BY position ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(segment_from_row).collect()
    }

    /// Remove all segments of a document.
    pub async fn delete_segments_by_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM document_segments WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DocQaError::invalid_argument(format!("invalid timestamp '{}': {}", value, e)))
}

fn required_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DocQaError::storage(format!("corrupt {} timestamp: {}", column, e)))
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status_raw: String = row.get("status");
    let stage_raw: Option<String> = row.get("current_stage");
    let uploaded_at: String = row.get("uploaded_at");
    let updated_at: String = row.get("updated_at");
    let processed_at: Option<String> = row.get("processed_at");
    let metadata_raw: String = row.get("metadata");

    let current_stage = match stage_raw {
        Some(raw) => match ProcessingStage::from_str(&raw) {
            Ok(stage) => Some(stage),
            Err(_) => {
                warn!("ignoring corrupt stage value '{}'", raw);
                None
            }
        },
        None => None,
    };

    Ok(Document {
        id: row.get("id"),
        file_name: row.get("file_name"),
        file_type: row.get("file_type"),
        file_path: row.get("file_path"),
        file_size: row.get("file_size"),
        status: DocumentStatus::from_str(&status_raw)?,
        uploaded_at: required_timestamp(&uploaded_at, "uploaded_at")?,
        updated_at: required_timestamp(&updated_at, "updated_at")?,
        processed_at: processed_at
            .map(|raw| required_timestamp(&raw, "processed_at"))
            .transpose()?,
        progress: row.get("progress"),
        error: row.get("error"),
        segment_count: row.get("segment_count"),
        tags: row.get("tags"),
        metadata: serde_json::from_str(&metadata_raw)?,
        current_stage,
        current_task_id: row.get("current_task_id"),
        retry_count: row.get("retry_count"),
    })
}

fn segment_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentSegment> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let metadata_raw: String = row.get("metadata");

    Ok(DocumentSegment {
        id: row.get("id"),
        document_id: row.get("document_id"),
        segment_id: row.get("segment_id"),
        position: row.get("position"),
        text: row.get("text"),
        created_at: required_timestamp(&created_at, "created_at")?,
        updated_at: required_timestamp(&updated_at, "updated_at")?,
        metadata: serde_json::from_str(&metadata_raw)?,
        task_id: row.get("task_id"),
        vector_id: row.get("vector_id"),
    })
}
