//! Application state and service initialization
//!
//! Centralizes the service dependency graph. Configuration is read exactly
//! once in `main` and handed in by value; nothing below this layer touches
//! the environment.

use std::sync::Arc;
use std::time::Duration;

use crate::api::health::HealthState;
use crate::model::Config;
use crate::retriever::{Bm25QueryEncoder, PatentIndex, PineconeIndex};
use crate::service::embedding::{Embedder, OpenAiEmbedder};
use crate::service::llm::ChatModel;
use crate::service::{
    AnalysisPipeline, AnalysisService, GradingService, HistorySink, HybridSearchService,
    InputSandbox, LlmClient, NoopHistory, QueryExpansionService, RateLimiter, RedisHistory,
    RerankService,
};

/// Application state containing all services and shared resources
pub struct AppState {
    pub pipeline: Arc<AnalysisPipeline>,
    pub rate_limiter: RateLimiter,
    pub health: HealthState,
}

impl AppState {
    /// Initialize all services and build the application state
    pub fn new(config: Config) -> Result<Self, AppError> {
        if config.embedding.api_key.is_empty() {
            return Err(AppError::MissingConfig("OPENAI_API_KEY"));
        }
        if config.index.api_key.is_empty() {
            return Err(AppError::MissingConfig("PINECONE_API_KEY"));
        }
        if config.index.host.is_empty() {
            return Err(AppError::MissingConfig("index.host"));
        }

        let timeout = Duration::from_secs(config.reasoning.timeout_s);
        let connect_timeout = Duration::from_secs(config.reasoning.connect_timeout_s);

        let llm_client = LlmClient::new(&config.embedding.api_key, timeout, connect_timeout)
            .map_err(|_| AppError::InvalidConfig("Invalid OPENAI_API_KEY"))?;
        let chat: Arc<dyn ChatModel> = Arc::new(llm_client);

        let embedder: Arc<dyn Embedder> = Arc::new(
            OpenAiEmbedder::new(
                &config.embedding.api_key,
                &config.embedding.model,
                config.embedding.dim,
                timeout,
                connect_timeout,
            )
            .map_err(|_| AppError::InvalidConfig("Invalid OPENAI_API_KEY"))?,
        );

        let index: Arc<dyn PatentIndex> = Arc::new(
            PineconeIndex::new(&config.index, config.embedding.dim)
                .map_err(|e| AppError::IndexInit(e.to_string()))?,
        );

        // Missing BM25 parameters degrade retrieval to dense-only rather
        // than failing startup.
        let sparse_encoder = match Bm25QueryEncoder::load(&config.index.sparse_params_path) {
            Ok(encoder) => Some(Arc::new(encoder)),
            Err(e) => {
                tracing::warn!(error = %e, "BM25 parameters unavailable, sparse search disabled");
                None
            }
        };

        let history: Arc<dyn HistorySink> = match config.redis_url.as_deref() {
            Some(url) => match RedisHistory::new(url) {
                Ok(history) => Arc::new(history),
                Err(e) => {
                    tracing::warn!(error = %e, "History store unavailable, runs will not be recorded");
                    Arc::new(NoopHistory)
                }
            },
            None => Arc::new(NoopHistory),
        };

        let pipeline = Arc::new(AnalysisPipeline::new(
            InputSandbox::new(),
            QueryExpansionService::new(
                Arc::clone(&chat),
                config.reasoning.model.clone(),
                config.retrieval.multi_query_n,
            ),
            HybridSearchService::new(
                embedder,
                index,
                sparse_encoder,
                config.index.hybrid_alpha,
                config.retrieval.top_k,
                config.retrieval.max_parallel_queries,
            ),
            Arc::new(RerankService::new(config.reranker.clone())),
            GradingService::new(
                Arc::clone(&chat),
                config.reasoning.model.clone(),
                config.grading.cutoff_threshold,
                config.grading.rewrite_threshold,
            ),
            AnalysisService::new(
                chat,
                config.reasoning.model.clone(),
                config.parsing.model.clone(),
                config.grading.clone(),
            ),
            history,
            config.retrieval.top_k,
        ));

        let rate_limiter = RateLimiter::new(config.redis_url.as_deref(), config.limits.clone());

        let health = HealthState {
            index_configured: true,
            redis_configured: config.redis_url.is_some(),
        };

        tracing::info!(
            reasoning_model = %config.reasoning.model,
            parsing_model = %config.parsing.model,
            index = %config.index.name,
            "Application services initialized"
        );

        Ok(Self {
            pipeline,
            rate_limiter,
            health,
        })
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Vector index client construction failed
    #[error("Index initialization failed: {0}")]
    IndexInit(String),
}
