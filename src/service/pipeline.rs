//! Self-RAG pipeline orchestration
//!
//! Strict stage order per request: sandbox → expand → (retrieve → rerank →
//! grade) → [one rewrite round] → analyze → parse. The only feedback edge is
//! the grading-to-expansion rewrite, bounded at one extra retrieval round.
//! The returned stream always ends with exactly one terminal event; dropping
//! it cancels all in-flight work at the next suspension point.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::model::{Candidate, PipelineEvent, Query};
use crate::service::analysis::AnalysisService;
use crate::service::expansion::QueryExpansionService;
use crate::service::grading::GradingService;
use crate::service::history::{HistoryEntry, HistorySink};
use crate::service::llm::LlmError;
use crate::service::rerank::RerankService;
use crate::service::sandbox::{wrap, InputSandbox};
use crate::service::search::{dedup_by_publication, extract_patent_ids, HybridSearchService};

/// One analysis request entering the pipeline.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub idea: String,
    pub session_id: String,
    pub ipc_filters: Vec<String>,
}

/// The assembled Self-RAG pipeline. Stateless per request; the only shared
/// state is the lazily constructed reranker.
pub struct AnalysisPipeline {
    sandbox: InputSandbox,
    expansion: QueryExpansionService,
    search: HybridSearchService,
    rerank: Arc<RerankService>,
    grading: GradingService,
    analysis: AnalysisService,
    history: Arc<dyn HistorySink>,
    rerank_top_k: usize,
}

impl AnalysisPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sandbox: InputSandbox,
        expansion: QueryExpansionService,
        search: HybridSearchService,
        rerank: Arc<RerankService>,
        grading: GradingService,
        analysis: AnalysisService,
        history: Arc<dyn HistorySink>,
        rerank_top_k: usize,
    ) -> Self {
        Self {
            sandbox,
            expansion,
            search,
            rerank,
            grading,
            analysis,
            history,
            rerank_top_k,
        }
    }

    /// Run the full pipeline, yielding progress, stream tokens, and exactly
    /// one terminal event.
    pub fn run(self: Arc<Self>, request: RunRequest) -> BoxStream<'static, PipelineEvent> {
        let stream = async_stream::stream! {
            // C1 — sandbox. Rejections terminate before any model call.
            let sanitized = match self.sandbox.sanitize(&request.idea) {
                Ok(sanitized) => sanitized,
                Err(e) => {
                    yield PipelineEvent::error(e.code(), e.to_string());
                    return;
                }
            };
            let wrapped = wrap(&sanitized);

            // C2 — query expansion.
            yield PipelineEvent::progress(10, "가상 청구항 및 검색 쿼리 생성 중");
            let prioritized = self
                .search
                .fetch_prioritized(&extract_patent_ids(&sanitized))
                .await;
            let queries = self.expansion.expand(&wrapped, &sanitized).await;

            // C3 + C4 — retrieval round one.
            yield PipelineEvent::progress(35, "하이브리드 특허 검색 중");
            let candidates = self
                .retrieval_round(&queries, &sanitized, &request.ipc_filters, &prioritized)
                .await;

            // C5 — grading, with at most one rewrite round.
            yield PipelineEvent::progress(60, "선행 특허 관련성 평가 중");
            let (mut graded, mut grading_response) =
                self.grading.grade(&wrapped, candidates).await;

            if self.grading.needs_rewrite(&grading_response) {
                tracing::info!(
                    event = "rewrite_triggered",
                    average_score = grading_response.average_score as f64,
                    rewrite_threshold = self.grading.rewrite_threshold() as f64,
                    "Mean grade below threshold, rewriting query"
                );
                let rewritten = self
                    .grading
                    .rewrite_query(&wrapped, &sanitized, &queries, &graded)
                    .await;
                let retry_candidates = self
                    .retrieval_round(
                        &[rewritten],
                        &sanitized,
                        &request.ipc_filters,
                        &prioritized,
                    )
                    .await;
                // Accept whatever the second round produces; there is no
                // third round.
                let (regraded, reresponse) =
                    self.grading.grade(&wrapped, retry_candidates).await;
                graded = regraded;
                grading_response = reresponse;
            }

            let survivors = self.grading.survivors(&graded);
            debug_assert_eq!(
                survivors.len(),
                grading_response.filter_stats.after_filter
            );

            if survivors.is_empty() {
                tracing::info!("No candidate survived the cutoff, emitting empty result");
                yield PipelineEvent::Empty {};
                return;
            }

            // C6 — streamed grounded analysis.
            let mut full_text = String::new();
            let mut token_stream = self.analysis.analyze_stream(&wrapped, &survivors).await;
            while let Some(item) = token_stream.next().await {
                match item {
                    Ok(token) => {
                        full_text.push_str(&token);
                        yield PipelineEvent::StreamToken { text: token };
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Analysis stream failed mid-flight");
                        yield PipelineEvent::error(error_code(&e), e.to_string());
                        return;
                    }
                }
            }

            // C6 — structured parse; degrades to an empty report, never errors.
            let survivor_ids: Vec<String> = survivors
                .iter()
                .map(|c| c.publication_number.clone())
                .collect();
            let report = self
                .analysis
                .parse_to_structured(&full_text, &survivor_ids)
                .await;

            self.history
                .record(HistoryEntry {
                    session_id: request.session_id.clone(),
                    idea: sanitized.clone(),
                    report: report.clone(),
                    created_at: Utc::now(),
                })
                .await;

            yield PipelineEvent::Complete { result: report };
        };
        stream.boxed()
    }

    /// One retrieval round: multi-query hybrid search, merge of explicitly
    /// referenced patents, then reranking. A fully exhausted retrieval is
    /// equivalent to an all-below-cutoff round and returns only the
    /// prioritized candidates.
    async fn retrieval_round(
        &self,
        queries: &[Query],
        sanitized_idea: &str,
        ipc_filters: &[String],
        prioritized: &[Candidate],
    ) -> Vec<Candidate> {
        let retrieved = match self.search.search(queries, sanitized_idea, ipc_filters).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Retrieval exhausted, continuing with referenced patents only");
                Vec::new()
            }
        };

        let combined = dedup_by_publication(
            prioritized.iter().cloned().chain(retrieved.into_iter()),
        );

        let mut ranked = self
            .rerank
            .rerank(sanitized_idea, combined, self.rerank_top_k)
            .await;

        // Explicitly referenced patents must reach grading even if the
        // cross-encoder ranked them below the cut.
        for candidate in prioritized {
            if !ranked
                .iter()
                .any(|c| c.publication_number == candidate.publication_number)
            {
                ranked.push(candidate.clone());
            }
        }
        ranked
    }
}

fn error_code(e: &LlmError) -> &'static str {
    match e {
        LlmError::RateLimited | LlmError::Timeout | LlmError::Connect(_) => "UpstreamUnavailable",
        LlmError::Auth(_) => "ConfigurationError",
        LlmError::Api(_) | LlmError::Parse(_) => "InternalError",
    }
}
