//! Cross-encoder reranking of retrieval candidates
//!
//! The model is constructed on first use behind an async-aware single-flight
//! cell so concurrent first callers share one load. Inference is CPU-bound
//! and always runs on a blocking worker, never on the event loop. An
//! unavailable model degrades this stage to a passthrough.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::Array2;
use ort::session::Session;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;

use crate::model::candidate::Candidate;
use crate::model::config::RerankerConfig;

#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("Model download failed: {0}")]
    Download(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// ONNX cross-encoder scoring (query, document) pairs.
pub struct CrossEncoder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl CrossEncoder {
    /// Download model files and build the inference session.
    async fn load(model_id: &str) -> Result<Self, RerankError> {
        let repo = hf_hub::api::tokio::Api::new()
            .map_err(|e| RerankError::Download(e.to_string()))?
            .model(model_id.to_string());

        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| RerankError::Download(e.to_string()))?;
        let model_path = repo
            .get("onnx/model.onnx")
            .await
            .map_err(|e| RerankError::Download(e.to_string()))?;

        // Session and tokenizer construction read large files; keep them off
        // the event loop.
        tokio::task::spawn_blocking(move || {
            let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| RerankError::Tokenizer(e.to_string()))?;
            tokenizer.with_padding(Some(tokenizers::PaddingParams::default()));

            let session = Session::builder()
                .map_err(|e| RerankError::Inference(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e| RerankError::Inference(e.to_string()))?;

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        })
        .await
        .map_err(|e| RerankError::Inference(e.to_string()))?
    }

    /// Score (query, document) pairs; higher means more relevant.
    fn predict(&self, pairs: Vec<(String, String)>) -> Result<Vec<f32>, RerankError> {
        let inputs: Vec<_> = pairs
            .into_iter()
            .map(|(q, d)| tokenizers::EncodeInput::Dual(q.into(), d.into()))
            .collect();

        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| RerankError::Tokenizer(e.to_string()))?;

        let batch = encodings.len();
        let seq_len = encodings.iter().map(|e| e.len()).max().unwrap_or(0);

        let mut input_ids = Array2::<i64>::zeros((batch, seq_len));
        let mut attention_mask = Array2::<i64>::zeros((batch, seq_len));
        let mut token_type_ids = Array2::<i64>::zeros((batch, seq_len));
        for (i, encoding) in encodings.iter().enumerate() {
            for (j, &id) in encoding.get_ids().iter().enumerate() {
                input_ids[[i, j]] = id as i64;
            }
            for (j, &mask) in encoding.get_attention_mask().iter().enumerate() {
                attention_mask[[i, j]] = mask as i64;
            }
            for (j, &tid) in encoding.get_type_ids().iter().enumerate() {
                token_type_ids[[i, j]] = tid as i64;
            }
        }

        let mut session = self.session.lock().expect("reranker session poisoned");
        let outputs = session
            .run(
                ort::inputs![
                    "input_ids" => ort::value::Value::from_array(input_ids)
                        .map_err(|e| RerankError::Inference(e.to_string()))?,
                    "attention_mask" => ort::value::Value::from_array(attention_mask)
                        .map_err(|e| RerankError::Inference(e.to_string()))?,
                    "token_type_ids" => ort::value::Value::from_array(token_type_ids)
                        .map_err(|e| RerankError::Inference(e.to_string()))?,
                ],
            )
            .map_err(|e| RerankError::Inference(e.to_string()))?;

        let (shape, logits) = outputs["logits"]
            .try_extract_tensor::<f32>()
            .map_err(|e| RerankError::Inference(e.to_string()))?;
        let cols = if shape.len() > 1 { shape[1] as usize } else { 1 };

        Ok((0..batch).map(|i| logits[i * cols]).collect())
    }
}

/// Lazily initialized reranking stage.
pub struct RerankService {
    config: RerankerConfig,
    encoder: OnceCell<Option<Arc<CrossEncoder>>>,
    unavailable_logged: AtomicBool,
}

impl RerankService {
    pub fn new(config: RerankerConfig) -> Self {
        Self {
            config,
            encoder: OnceCell::new(),
            unavailable_logged: AtomicBool::new(false),
        }
    }

    /// Disabled service used when reranking is switched off in config and by
    /// orchestration tests.
    pub fn disabled() -> Self {
        Self::new(RerankerConfig {
            enabled: false,
            ..RerankerConfig::default()
        })
    }

    /// Reorder candidates by cross-encoder relevance to `query`, returning
    /// the top `top_k`. Falls through to the incoming order when the model
    /// is unavailable or inference fails.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Vec<Candidate> {
        if candidates.is_empty() {
            return candidates;
        }

        let Some(encoder) = self.encoder().await else {
            self.log_unavailable_once();
            candidates.truncate(top_k);
            return candidates;
        };

        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|c| {
                (
                    query.to_string(),
                    c.combined_text(self.config.text_max_chars),
                )
            })
            .collect();

        let scores =
            tokio::task::spawn_blocking(move || encoder.predict(pairs)).await;

        match scores {
            Ok(Ok(scores)) => {
                let mut reranked = apply_rerank_scores(candidates, &scores);
                reranked.truncate(top_k);
                tracing::info!(reranked = reranked.len(), top_k = top_k, "Reranking complete");
                reranked
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Reranking failed, keeping retrieval order");
                candidates.truncate(top_k);
                candidates
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reranking task panicked, keeping retrieval order");
                candidates.truncate(top_k);
                candidates
            }
        }
    }

    async fn encoder(&self) -> Option<Arc<CrossEncoder>> {
        if !self.config.enabled {
            return None;
        }
        self.encoder
            .get_or_init(|| async {
                match CrossEncoder::load(&self.config.model_id).await {
                    Ok(encoder) => {
                        tracing::info!(model = %self.config.model_id, "Reranker model loaded");
                        Some(Arc::new(encoder))
                    }
                    Err(e) => {
                        tracing::warn!(
                            model = %self.config.model_id,
                            error = %e,
                            "Reranker model load failed, stage becomes a passthrough"
                        );
                        None
                    }
                }
            })
            .await
            .clone()
    }

    fn log_unavailable_once(&self) {
        if !self.unavailable_logged.swap(true, Ordering::Relaxed) {
            tracing::info!("Reranker unavailable, passing candidates through unchanged");
        }
    }
}

/// Attach rerank scores and sort descending. Score count mismatches keep
/// the original order for unscored tail entries.
fn apply_rerank_scores(mut candidates: Vec<Candidate>, scores: &[f32]) -> Vec<Candidate> {
    for (candidate, score) in candidates.iter_mut().zip(scores) {
        candidate.rerank_score = Some(*score);
    }
    candidates.sort_by(|a, b| {
        let a_score = a.rerank_score.unwrap_or(f32::MIN);
        let b_score = b.rerank_score.unwrap_or(f32::MIN);
        b_score
            .partial_cmp(&a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}
