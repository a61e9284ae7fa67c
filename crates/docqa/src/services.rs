//! Service wiring.
//!
//! Builds every component from the configuration with explicit constructor
//! parameters: backend selection is a static match on the configuration
//! tags, and the ingestion handlers are registered here so the callback
//! dispatcher never learns about the document service.

use docqa_core::config::AppConfig;
use docqa_core::error::{DocQaError, Result};
use docqa_core::traits::{BlobStore, Cache, DocumentParser, Embedder, LlmClient};
use docqa_index::{Distance, VectorRepository, VectorRepositoryConfig};
use docqa_ingest::{DocumentService, IngestConfig, IngestMode, SplitType};
use docqa_providers::{
    LocalBlobStore, MemoryCache, MockEmbedder, MockLlm, OpenAiChatClient, OpenAiEmbedder,
    PlainTextParser, RedisCache,
};
use docqa_qa::{QaConfig, QaService};
use docqa_queue::{
    CallbackDispatcher, HandlerRegistry, MemoryTaskQueue, RedisTaskQueue, TaskQueue, WorkerConfig,
    WorkerPool,
};
use docqa_store::{DocumentRepository, DocumentStatusManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Every wired component of the system.
pub struct Services {
    pub config: AppConfig,
    pub index: Arc<VectorRepository>,
    pub queue: Arc<dyn TaskQueue>,
    pub handlers: Arc<HandlerRegistry>,
    pub dispatcher: Arc<CallbackDispatcher>,
    pub status: Arc<DocumentStatusManager>,
    pub documents: DocumentService,
    pub qa: Arc<QaService>,
    pub workers: Arc<WorkerPool>,
}

impl Services {
    /// Wire all components from configuration.
    pub async fn build(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let index = build_index(&config).await?;
        let queue = build_queue(&config).await?;
        let cache = build_cache(&config).await?;
        let storage = build_storage(&config).await?;
        let embedder = build_embedder(&config)?;
        let llm = build_llm(&config)?;
        let parser: Arc<dyn DocumentParser> = Arc::new(PlainTextParser);

        let repo = Arc::new(DocumentRepository::connect(&config.database.dsn).await?);
        let status = Arc::new(DocumentStatusManager::new(repo));

        let handlers = Arc::new(HandlerRegistry::new());
        let dispatcher = Arc::new(CallbackDispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&handlers),
        ));

        let mode = if config.document.processor_endpoint.is_empty() {
            IngestMode::Sync
        } else {
            IngestMode::Async
        };
        let ingest_config = IngestConfig {
            mode,
            chunk_size: config.document.chunk_size,
            chunk_overlap: config.document.chunk_overlap,
            split_type: SplitType::Paragraph,
            processor_endpoint: config.document.processor_endpoint.clone(),
            callback_url: config.queue.callback_url.clone(),
            embed_model: config.embed.model.clone(),
            ..Default::default()
        };

        let documents = DocumentService::new(
            Arc::clone(&status),
            Arc::clone(&index),
            Arc::clone(&queue),
            Arc::clone(&handlers),
            storage,
            parser,
            Arc::clone(&embedder),
            ingest_config,
        );
        // Handler registration happens at wiring time, never from the
        // dispatcher's side.
        documents.register_handlers();

        let qa = Arc::new(QaService::new(
            embedder,
            llm,
            Arc::clone(&index),
            cache,
            QaConfig {
                min_score: config.search.min_score,
                max_results: config.search.limit,
                answer_ttl: Duration::from_secs(config.cache.ttl),
                ..Default::default()
            },
        ));

        let workers = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&handlers),
            WorkerConfig {
                concurrency: config.queue.concurrency,
                retry_delay: Duration::from_secs(config.queue.retry_delay),
                ..Default::default()
            },
        ));

        info!("services wired");
        Ok(Self {
            config,
            index,
            queue,
            handlers,
            dispatcher,
            status,
            documents,
            qa,
            workers,
        })
    }

    /// Start the worker pool (no-op when the queue is disabled in config).
    pub async fn start_workers(&self) {
        if self.config.queue.enable {
            self.workers.start().await;
        }
    }

    /// Stop workers and flush the index.
    pub async fn shutdown(&self) -> Result<()> {
        self.workers.shutdown().await;
        self.index.close().await
    }
}

async fn build_index(config: &AppConfig) -> Result<Arc<VectorRepository>> {
    let distance = Distance::parse(&config.vectordb.distance)?;
    let repo_config = VectorRepositoryConfig {
        default_limit: config.search.limit,
        ..VectorRepositoryConfig::new(config.vectordb.dim, distance)
    };

    let repo = match config.vectordb.backend.as_str() {
        "memory" => VectorRepository::new_memory(repo_config),
        "flat-file" => {
            VectorRepository::open(repo_config.with_path(config.vectordb.path.clone())).await?
        }
        other => return Err(DocQaError::config(format!("unknown vectordb type '{}'", other))),
    };
    Ok(Arc::new(repo))
}

async fn build_queue(config: &AppConfig) -> Result<Arc<dyn TaskQueue>> {
    match config.queue.backend.as_str() {
        "memory" => Ok(Arc::new(
            MemoryTaskQueue::new().with_default_max_retries(config.queue.retry_limit),
        )),
        "redis" => Ok(Arc::new(
            RedisTaskQueue::connect(
                &config.queue.redis_addr,
                &config.queue.redis_password,
                config.queue.redis_db,
            )
            .await?
            .with_default_max_retries(config.queue.retry_limit),
        )),
        other => Err(DocQaError::config(format!("unknown queue type '{}'", other))),
    }
}

async fn build_cache(config: &AppConfig) -> Result<Option<Arc<dyn Cache>>> {
    if !config.cache.enable {
        return Ok(None);
    }
    let ttl = Duration::from_secs(config.cache.ttl);
    let cache: Arc<dyn Cache> = match config.cache.backend.as_str() {
        "memory" => Arc::new(MemoryCache::new(10_000, ttl)),
        "redis" => Arc::new(
            RedisCache::connect(
                &config.cache.address,
                &config.cache.password,
                config.cache.db,
                ttl,
            )
            .await?,
        ),
        other => return Err(DocQaError::config(format!("unknown cache type '{}'", other))),
    };
    Ok(Some(cache))
}

async fn build_storage(config: &AppConfig) -> Result<Arc<dyn BlobStore>> {
    match config.storage.backend.as_str() {
        "local" => Ok(Arc::new(LocalBlobStore::new(config.storage.path.clone()).await?)),
        // The MinIO wrapper is an external collaborator; wire your adapter
        // in place of this error.
        "minio" => Err(DocQaError::config(
            "minio blob storage requires an external adapter",
        )),
        other => Err(DocQaError::config(format!("unknown storage type '{}'", other))),
    }
}

fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    match config.embed.provider.as_str() {
        "mock" => Ok(Arc::new(MockEmbedder::new(config.vectordb.dim))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(&config.embed, config.vectordb.dim)?)),
        other => Err(DocQaError::config(format!("unknown embed provider '{}'", other))),
    }
}

fn build_llm(config: &AppConfig) -> Result<Arc<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "mock" => Ok(Arc::new(MockLlm::default())),
        "openai" => Ok(Arc::new(OpenAiChatClient::new(&config.llm)?)),
        other => Err(DocQaError::config(format!("unknown llm provider '{}'", other))),
    }
}
