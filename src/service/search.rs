//! Multi-query hybrid retrieval with score fusion and deduplication

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::StreamExt;
use regex::Regex;

use crate::model::{Candidate, Query, QueryKind};
use crate::retriever::{
    Bm25QueryEncoder, HybridQuery, IndexMatch, KeywordExtractor, PatentIndex, SparseVector,
};
use crate::service::embedding::Embedder;

const MAX_SPARSE_KEYWORDS: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Every expanded query failed; the grading loop treats this the same
    /// as an all-below-cutoff round.
    #[error("All retrieval queries failed")]
    RetrievalExhausted,
}

/// Runs the expanded query set against the index with bounded parallelism,
/// fuses dense and sparse scores, and deduplicates across queries.
pub struct HybridSearchService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn PatentIndex>,
    sparse_encoder: Option<Arc<Bm25QueryEncoder>>,
    hybrid_alpha: f32,
    top_k: usize,
    max_parallel: usize,
}

impl HybridSearchService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn PatentIndex>,
        sparse_encoder: Option<Arc<Bm25QueryEncoder>>,
        hybrid_alpha: f32,
        top_k: usize,
        max_parallel: usize,
    ) -> Self {
        if sparse_encoder.is_none() {
            tracing::warn!("No BM25 parameters loaded; retrieval degrades to dense-only");
        }
        Self {
            embedder,
            index,
            sparse_encoder,
            hybrid_alpha,
            top_k,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Execute all queries and return at most `top_k` fused, deduplicated
    /// candidates sorted by fused score descending.
    ///
    /// Per-query failures are isolated: one failed query must not sink the
    /// batch. Only when every query fails does this surface
    /// `RetrievalExhausted`.
    pub async fn search(
        &self,
        queries: &[Query],
        idea_text: &str,
        ipc_filters: &[String],
    ) -> Result<Vec<Candidate>, SearchError> {
        if queries.is_empty() {
            return Err(SearchError::RetrievalExhausted);
        }

        let results: Vec<Option<Vec<Candidate>>> = futures::stream::iter(queries)
            .map(|query| self.search_one(query, idea_text, ipc_filters))
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        let succeeded: Vec<Vec<Candidate>> = results.into_iter().flatten().collect();
        if succeeded.is_empty() {
            return Err(SearchError::RetrievalExhausted);
        }

        let total: usize = succeeded.iter().map(Vec::len).sum();
        let mut merged = dedup_by_publication(succeeded.into_iter().flatten());
        merged.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(self.top_k);

        tracing::info!(
            raw_matches = total,
            unique = merged.len(),
            queries = queries.len(),
            "Multi-query search complete"
        );
        Ok(merged)
    }

    /// Fetch passages for publication numbers named verbatim in the idea.
    /// These bypass search ranking and are always carried into grading.
    pub async fn fetch_prioritized(&self, publication_numbers: &[String]) -> Vec<Candidate> {
        if publication_numbers.is_empty() {
            return Vec::new();
        }
        match self.index.fetch_by_ids(publication_numbers).await {
            Ok(matches) => {
                tracing::info!(
                    requested = publication_numbers.len(),
                    found = matches.len(),
                    "Fetched explicitly referenced patents"
                );
                matches
                    .into_iter()
                    .map(|m| {
                        let mut candidate = self.to_candidate(m, QueryKind::Original);
                        candidate.is_prioritized = true;
                        candidate.fused_score = 1.0;
                        candidate
                    })
                    .collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fetch of referenced patents failed, continuing without them");
                Vec::new()
            }
        }
    }

    async fn search_one(
        &self,
        query: &Query,
        idea_text: &str,
        ipc_filters: &[String],
    ) -> Option<Vec<Candidate>> {
        match self.execute_query(query, idea_text, ipc_filters).await {
            Ok(candidates) => Some(candidates),
            Err(e) => {
                tracing::warn!(
                    event = "retrieval_query_failed",
                    query_fingerprint = %query.fingerprint(),
                    provenance = query.kind.as_str(),
                    error = %e,
                    "Retrieval query failed"
                );
                None
            }
        }
    }

    async fn execute_query(
        &self,
        query: &Query,
        idea_text: &str,
        ipc_filters: &[String],
    ) -> Result<Vec<Candidate>, Box<dyn std::error::Error + Send + Sync>> {
        let dense = self.embedder.embed(&query.text).await?;
        let sparse = self.encode_sparse(idea_text, &query.text);

        let matches = self
            .index
            .hybrid_query(&HybridQuery {
                dense,
                sparse,
                top_k: self.top_k,
                ipc_filters: ipc_filters.to_vec(),
            })
            .await?;

        Ok(matches
            .into_iter()
            .map(|m| self.to_candidate(m, query.kind.clone()))
            .collect())
    }

    fn encode_sparse(&self, idea_text: &str, query_text: &str) -> SparseVector {
        let Some(encoder) = &self.sparse_encoder else {
            return SparseVector::default();
        };
        let keywords =
            KeywordExtractor::extract(&format!("{idea_text} {query_text}"), MAX_SPARSE_KEYWORDS);
        encoder.encode(&keywords.join(" "))
    }

    fn to_candidate(&self, m: IndexMatch, source: QueryKind) -> Candidate {
        let fused =
            self.hybrid_alpha * m.dense_score + (1.0 - self.hybrid_alpha) * m.sparse_score;
        Candidate {
            publication_number: m.publication_number,
            title: m.title,
            abstract_text: m.abstract_text,
            claims: m.claims,
            ipc_codes: if m.ipc_code.is_empty() {
                Vec::new()
            } else {
                vec![m.ipc_code]
            },
            dense_score: m.dense_score,
            sparse_score: m.sparse_score,
            fused_score: fused,
            rerank_score: None,
            grading_score: 0.0,
            grading_reason: String::new(),
            source_queries: vec![source],
            is_prioritized: false,
        }
    }
}

/// Collapse duplicate publications, keeping the highest fused score and
/// accumulating source-query provenance.
pub(crate) fn dedup_by_publication(candidates: impl Iterator<Item = Candidate>) -> Vec<Candidate> {
    let mut by_id: HashMap<String, Candidate> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for candidate in candidates {
        match by_id.get_mut(&candidate.publication_number) {
            Some(existing) => existing.merge(candidate),
            None => {
                order.push(candidate.publication_number.clone());
                by_id.insert(candidate.publication_number.clone(), candidate);
            }
        }
    }
    order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
}

/// Extract patent publication numbers (e.g. `KR-102842452-B1`,
/// `CN-119821168-A`) written verbatim in the idea text.
pub fn extract_patent_ids(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"\b([A-Z]{2}-?\d{4,}(?:-[A-Z0-9]+)?)\b").expect("valid pattern");
    let mut ids: Vec<String> = pattern
        .find_iter(text)
        .map(|m| m.as_str().to_uppercase())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::IndexError;
    use crate::service::testing::{index_match, MockEmbedder, MockIndex};

    fn service(index: Arc<MockIndex>) -> HybridSearchService {
        HybridSearchService::new(
            Arc::new(MockEmbedder::new(8)),
            index,
            None,
            0.7,
            20,
            4,
        )
    }

    fn queries(n: usize) -> Vec<Query> {
        (0..n)
            .map(|i| Query::new(format!("쿼리 {i}"), QueryKind::Paraphrase(i)))
            .collect()
    }

    #[tokio::test]
    async fn fuses_scores_with_alpha() {
        let index = Arc::new(MockIndex::new());
        index.push_matches(vec![index_match("KR-1000-B1", 0.8, 0.4)]);
        let results = service(Arc::clone(&index))
            .search(&queries(1), "아이디어", &[])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let expected = 0.7 * 0.8 + 0.3 * 0.4;
        assert!((results[0].fused_score - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn dedups_across_queries_keeping_max() {
        let index = Arc::new(MockIndex::new());
        index.push_matches(vec![index_match("KR-1000-B1", 0.2, 0.0)]);
        index.push_matches(vec![
            index_match("KR-1000-B1", 0.9, 0.0),
            index_match("KR-2000-B1", 0.5, 0.0),
        ]);
        let results = service(Arc::clone(&index))
            .search(&queries(2), "아이디어", &[])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        let first = results
            .iter()
            .find(|c| c.publication_number == "KR-1000-B1")
            .unwrap();
        assert!((first.fused_score - 0.7 * 0.9).abs() < 1e-6);
        assert_eq!(first.source_queries.len(), 2);
    }

    #[tokio::test]
    async fn one_failed_query_does_not_sink_the_batch() {
        let index = Arc::new(MockIndex::new());
        index.push_error(IndexError::RateLimited);
        index.push_matches(vec![index_match("KR-3000-B1", 0.6, 0.1)]);
        let results = service(Arc::clone(&index))
            .search(&queries(2), "아이디어", &[])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn all_queries_failed_is_retrieval_exhausted() {
        let index = Arc::new(MockIndex::new());
        index.push_error(IndexError::RateLimited);
        index.push_error(IndexError::Unauthorized);
        let result = service(Arc::clone(&index))
            .search(&queries(2), "아이디어", &[])
            .await;
        assert!(matches!(result, Err(SearchError::RetrievalExhausted)));
    }

    #[tokio::test]
    async fn results_sorted_and_truncated() {
        let index = Arc::new(MockIndex::new());
        let matches: Vec<_> = (0..30)
            .map(|i| index_match(&format!("KR-{i:04}-B1"), i as f32 / 30.0, 0.0))
            .collect();
        index.push_matches(matches);
        let results = service(Arc::clone(&index))
            .search(&queries(1), "아이디어", &[])
            .await
            .unwrap();
        assert_eq!(results.len(), 20);
        assert!(results
            .windows(2)
            .all(|w| w[0].fused_score >= w[1].fused_score));
    }

    #[tokio::test]
    async fn prioritized_fetch_marks_candidates() {
        let index = Arc::new(MockIndex::new());
        index
            .fetch_results
            .lock()
            .unwrap()
            .push(index_match("KR-9999-B1", 1.0, 0.0));
        let results = service(Arc::clone(&index))
            .fetch_prioritized(&["KR-9999-B1".to_string()])
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_prioritized);
        assert_eq!(results[0].fused_score, 1.0);
    }

    #[test]
    fn patent_id_extraction() {
        let ids = extract_patent_ids(
            "KR-102842452-B1 및 CN-119821168-A 와 비교해 주세요. US1234 는 제외.",
        );
        assert!(ids.contains(&"KR-102842452-B1".to_string()));
        assert!(ids.contains(&"CN-119821168-A".to_string()));
        assert!(ids.contains(&"US1234".to_string()));
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn patent_id_extraction_ignores_plain_words() {
        assert!(extract_patent_ids("스마트 안경 AR 내비게이션").is_empty());
    }
}
