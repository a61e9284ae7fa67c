//! Error types shared across the document QA system.

/// Result type alias for document QA operations.
pub type Result<T> = std::result::Result<T, DocQaError>;

/// Main error type for the document QA system.
#[derive(Debug, thiserror::Error)]
pub enum DocQaError {
    /// A document, task, or vector was not found
    #[error("not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Invalid caller input (empty id, empty question, empty vector)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Vector dimension does not match the index dimension
    #[error("invalid dimension: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },

    /// Illegal document lifecycle transition
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Operation exceeded its deadline
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Operation was cancelled by the caller
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Retryable network or storage failure
    #[error("transient failure: {0}")]
    Transient(String),

    /// Non-retryable remote failure (4xx, parse error)
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Blob or index storage errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Task queue errors
    #[error("queue error: {0}")]
    Queue(String),

    /// Cache layer errors
    #[error("cache error: {0}")]
    Cache(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Relational database errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis errors
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DocQaError {
    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new invalid transition error
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new cancelled error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a new transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a new permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new queue error
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Create a new cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an invalid transition error
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the queue should redeliver work that failed with this error.
    ///
    /// Network and storage failures are retried; argument, dimension, and
    /// transition errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout(_) | Self::Io(_) | Self::Redis(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
