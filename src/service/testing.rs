//! Shared test doubles for pipeline services

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use crate::retriever::{HybridQuery, IndexError, IndexMatch, PatentIndex};
use crate::service::embedding::Embedder;
use crate::service::llm::{ChatModel, ChatRequest, LlmError, TokenStream};

/// Scripted chat model: pops one scripted outcome per call and records every
/// request for prompt-contract assertions.
#[derive(Default)]
pub struct MockChat {
    completions: Mutex<VecDeque<Result<String, LlmError>>>,
    streams: Mutex<VecDeque<Result<Vec<Result<String, LlmError>>, LlmError>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_completion(&self, response: impl Into<String>) {
        self.completions
            .lock()
            .unwrap()
            .push_back(Ok(response.into()));
    }

    pub fn push_completion_error(&self, error: LlmError) {
        self.completions.lock().unwrap().push_back(Err(error));
    }

    /// Script one streaming call that yields the given tokens.
    pub fn push_stream(&self, tokens: &[&str]) {
        let items = tokens.iter().map(|t| Ok(t.to_string())).collect();
        self.streams.lock().unwrap().push_back(Ok(items));
    }

    /// Script one streaming call that yields tokens then a mid-stream error.
    pub fn push_stream_with_error(&self, tokens: &[&str], error: LlmError) {
        let mut items: Vec<Result<String, LlmError>> =
            tokens.iter().map(|t| Ok(t.to_string())).collect();
        items.push(Err(error));
        self.streams.lock().unwrap().push_back(Ok(items));
    }

    pub fn completion_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn recorded_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| format!("{}\n{}", r.preamble, r.prompt))
            .collect()
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Api("mock: no scripted completion".into())))
    }

    async fn stream(&self, request: ChatRequest) -> Result<TokenStream, LlmError> {
        self.requests.lock().unwrap().push(request);
        let scripted = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Api("mock: no scripted stream".into())))?;
        Ok(futures::stream::iter(scripted).boxed())
    }
}

/// Deterministic embedder: hashes the text into a fixed-dimension vector.
pub struct MockEmbedder {
    pub dim: usize,
    pub fail: bool,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim, fail: false }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if self.fail {
            return Err(LlmError::Connect("mock embedder down".into()));
        }
        let seed = text.len() as f32;
        Ok((0..self.dim).map(|i| (seed + i as f32).sin()).collect())
    }
}

/// Scripted index: returns the same match set for every hybrid query and
/// counts invocations (the rewrite-bound property checks this counter).
#[derive(Default)]
pub struct MockIndex {
    pub matches: Mutex<VecDeque<Result<Vec<IndexMatch>, IndexError>>>,
    pub fetch_results: Mutex<Vec<IndexMatch>>,
    pub query_count: Mutex<usize>,
}

impl MockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_matches(&self, matches: Vec<IndexMatch>) {
        self.matches.lock().unwrap().push_back(Ok(matches));
    }

    pub fn push_error(&self, error: IndexError) {
        self.matches.lock().unwrap().push_back(Err(error));
    }

    pub fn queries_issued(&self) -> usize {
        *self.query_count.lock().unwrap()
    }
}

#[async_trait]
impl PatentIndex for MockIndex {
    async fn hybrid_query(&self, _query: &HybridQuery) -> Result<Vec<IndexMatch>, IndexError> {
        *self.query_count.lock().unwrap() += 1;
        self.matches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_by_ids(
        &self,
        publication_numbers: &[String],
    ) -> Result<Vec<IndexMatch>, IndexError> {
        Ok(self
            .fetch_results
            .lock()
            .unwrap()
            .iter()
            .filter(|m| publication_numbers.contains(&m.publication_number))
            .cloned()
            .collect())
    }
}

/// Convenience constructor for index matches in tests.
pub fn index_match(publication_number: &str, dense: f32, sparse: f32) -> IndexMatch {
    IndexMatch {
        chunk_id: format!("{publication_number}#0"),
        publication_number: publication_number.to_string(),
        title: format!("{publication_number} 발명의 명칭"),
        abstract_text: "증강 현실 내비게이션을 위한 장치 및 방법".to_string(),
        claims: Some("청구항 1. 디스플레이를 포함하는 장치로서...".to_string()),
        ipc_code: "G06Q 50/10".to_string(),
        dense_score: dense,
        sparse_score: sparse,
    }
}
