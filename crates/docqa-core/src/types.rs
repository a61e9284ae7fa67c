//! Core domain types: documents, segments, tasks, and callbacks.

use crate::error::{DocQaError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states carry a `processed_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = DocQaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "uploaded" => Ok(Self::Uploaded),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(DocQaError::invalid_argument(format!(
                "unknown document status '{}'",
                s
            ))),
        }
    }
}

/// Label on a document's processing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Parsing,
    Chunking,
    Vectorizing,
    Completed,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Chunking => "chunking",
            Self::Vectorizing => "vectorizing",
            Self::Completed => "completed",
        }
    }

    /// Stage-typical progress floor applied when the stage is entered.
    pub fn progress_floor(&self) -> i32 {
        match self {
            Self::Parsing => 20,
            Self::Chunking => 50,
            Self::Vectorizing => 75,
            Self::Completed => 100,
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProcessingStage {
    type Err = DocQaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "parsing" => Ok(Self::Parsing),
            "chunking" => Ok(Self::Chunking),
            "vectorizing" => Ok(Self::Vectorizing),
            "completed" => Ok(Self::Completed),
            _ => Err(DocQaError::invalid_argument(format!(
                "unknown processing stage '{}'",
                s
            ))),
        }
    }
}

/// An ingested document with its persistent metadata.
///
/// The id is caller-supplied. `processed_at` is set exactly when the status
/// is terminal; progress reaches 100 on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub file_name: String,
    /// File extension without the dot
    pub file_type: String,
    pub file_path: String,
    pub file_size: i64,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Percentage in [0, 100]
    pub progress: i32,
    pub error: Option<String>,
    pub segment_count: i64,
    /// Comma-joined, substring-searchable
    pub tags: String,
    pub metadata: serde_json::Value,
    pub current_stage: Option<ProcessingStage>,
    pub current_task_id: Option<String>,
    pub retry_count: i32,
}

impl Document {
    /// Create a freshly uploaded document.
    pub fn new(
        id: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        file_path: impl Into<String>,
        file_size: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            file_name: file_name.into(),
            file_type: file_type.into(),
            file_path: file_path.into(),
            file_size,
            status: DocumentStatus::Uploaded,
            uploaded_at: now,
            updated_at: now,
            processed_at: None,
            progress: 0,
            error: None,
            segment_count: 0,
            tags: String::new(),
            metadata: serde_json::Value::Null,
            current_stage: None,
            current_task_id: None,
            retry_count: 0,
        }
    }
}

/// A contiguous text piece produced by splitting a parsed document.
///
/// `(document_id, position)` is unique; `segment_id` has the form
/// `"<docID>_<position>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSegment {
    /// Database rowid; 0 until persisted
    pub id: i64,
    pub document_id: String,
    pub segment_id: String,
    pub position: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub task_id: Option<String>,
    pub vector_id: Option<String>,
}

impl DocumentSegment {
    pub fn new(document_id: impl Into<String>, position: i64, text: impl Into<String>) -> Self {
        let document_id = document_id.into();
        let now = Utc::now();
        Self {
            id: 0,
            segment_id: format!("{}_{}", document_id, position),
            document_id,
            position,
            text: text.into(),
            created_at: now,
            updated_at: now,
            metadata: serde_json::Value::Null,
            task_id: None,
            vector_id: None,
        }
    }
}

/// Kind of queued work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DocumentParse,
    TextChunk,
    Vectorize,
    ProcessComplete,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentParse => "document_parse",
            Self::TextChunk => "text_chunk",
            Self::Vectorize => "vectorize",
            Self::ProcessComplete => "process_complete",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = DocQaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "document_parse" => Ok(Self::DocumentParse),
            "text_chunk" => Ok(Self::TextChunk),
            "vectorize" => Ok(Self::Vectorize),
            "process_complete" => Ok(Self::ProcessComplete),
            _ => Err(DocQaError::invalid_argument(format!(
                "unknown task type '{}'",
                s
            ))),
        }
    }
}

/// Status of a queued task. Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = DocQaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(DocQaError::invalid_argument(format!(
                "unknown task status '{}'",
                s
            ))),
        }
    }
}

/// A unit of queued work.
///
/// `started_at` is stamped on the first transition to Processing,
/// `completed_at` on any transition to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub document_id: String,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_retries: u32,
}

impl Task {
    /// Create a pending task with a fresh UUID.
    pub fn new(
        task_type: TaskType,
        document_id: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type,
            document_id: document_id.into(),
            status: TaskStatus::Pending,
            payload,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            attempts: 0,
            max_retries,
        }
    }
}

/// Completion notification delivered by an external processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCallback {
    pub task_id: String,
    pub document_id: String,
    pub status: TaskStatus,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl TaskCallback {
    /// Parse the callback timestamp.
    ///
    /// Accepts ISO-8601 with or without a timezone; a missing zone means UTC.
    /// An unparseable timestamp substitutes "now" with a warning.
    pub fn parsed_timestamp(&self) -> DateTime<Utc> {
        let Some(raw) = self.timestamp.as_deref() else {
            return Utc::now();
        };

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return dt.with_timezone(&Utc);
        }

        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return naive.and_utc();
            }
        }

        tracing::warn!("unparseable callback timestamp '{}', using now", raw);
        Utc::now()
    }
}

/// A single chunk's embedding carried in a vectorize callback result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorInfo {
    pub chunk_index: usize,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Result body of a vectorize / process-complete callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizeResult {
    pub vectors: Vec<VectorInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            let parsed: DocumentStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("uploading".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_task_creation() {
        let task = Task::new(TaskType::Vectorize, "doc-1", serde_json::json!({"k": 1}), 3);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.document_id, "doc-1");
        assert!(task.started_at.is_none());
        assert!(!task.id.is_empty());
    }

    #[test]
    fn test_segment_id_form() {
        let segment = DocumentSegment::new("doc-1", 2, "hello");
        assert_eq!(segment.segment_id, "doc-1_2");
        assert_eq!(segment.position, 2);
    }

    #[test]
    fn test_stage_floors() {
        assert_eq!(ProcessingStage::Parsing.progress_floor(), 20);
        assert_eq!(ProcessingStage::Chunking.progress_floor(), 50);
        assert_eq!(ProcessingStage::Vectorizing.progress_floor(), 75);
        assert_eq!(ProcessingStage::Completed.progress_floor(), 100);
    }

    #[test]
    fn test_callback_timestamp_with_zone() {
        let cb = TaskCallback {
            task_id: "t".into(),
            document_id: "d".into(),
            status: TaskStatus::Completed,
            task_type: TaskType::Vectorize,
            result: None,
            error: None,
            timestamp: Some("2024-05-01T10:30:00+02:00".into()),
        };
        let ts = cb.parsed_timestamp();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T08:30:00+00:00");
    }

    #[test]
    fn test_callback_timestamp_without_zone_assumes_utc() {
        let cb = TaskCallback {
            task_id: "t".into(),
            document_id: "d".into(),
            status: TaskStatus::Completed,
            task_type: TaskType::Vectorize,
            result: None,
            error: None,
            timestamp: Some("2024-05-01T10:30:00".into()),
        };
        let ts = cb.parsed_timestamp();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }

    #[test]
    fn test_callback_wire_names() {
        let json = r#"{
            "task_id": "t1",
            "document_id": "d1",
            "status": "completed",
            "type": "text_chunk",
            "result": {"chunks": 3},
            "error": "",
            "timestamp": "2024-05-01T10:30:00Z"
        }"#;
        let cb: TaskCallback = serde_json::from_str(json).unwrap();
        assert_eq!(cb.task_type, TaskType::TextChunk);
        assert_eq!(cb.status, TaskStatus::Completed);
    }
}
