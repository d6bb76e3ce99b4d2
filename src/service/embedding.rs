//! Dense embedding access for retrieval queries

use std::time::Duration;

use async_trait::async_trait;
use rig::embeddings::EmbeddingModel as _;
use rig::providers::openai;

use crate::service::llm::{with_retries, LlmError, RetryPolicy};

/// Dense text embedding used by the hybrid retriever.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// OpenAI embedding model with transient-only retry.
pub struct OpenAiEmbedder {
    model: openai::EmbeddingModel,
    dim: usize,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        model: &str,
        dim: usize,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| LlmError::Connect(e.to_string()))?;

        let client = openai::Client::builder(api_key)
            .custom_client(http_client)
            .build()
            .map_err(|e| LlmError::Auth(e.to_string()))?;
        Ok(Self {
            model: client.embedding_model(model),
            dim,
            retry: RetryPolicy::default(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let embedding = with_retries("embed", self.retry, || async move {
            self.model
                .embed_text(text)
                .await
                .map_err(|e| LlmError::classify(&e.to_string()))
        })
        .await?;

        let vector: Vec<f32> = embedding.vec.iter().map(|v| *v as f32).collect();
        if vector.len() != self.dim {
            return Err(LlmError::Api(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }
        Ok(vector)
    }
}
