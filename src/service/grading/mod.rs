//! LLM relevance grading with cutoff filtering and the rewrite decision

use std::sync::Arc;

use serde::Deserialize;

use crate::model::grading::{FilterStats, GradingResponse, GradingRow};
use crate::model::{Candidate, Query, QueryKind};
use crate::service::cutoff::log_cutoff_filter;
use crate::service::grading::prompts::{
    build_grading_prompt, build_rewrite_prompt, grading_system_prompt, REWRITE_SYSTEM_PROMPT,
};
use crate::service::llm::{ChatModel, ChatRequest};

pub mod prompts;

const PRIORITIZED_TAG: &str = "[PRIORITIZED]";

#[derive(Debug, Deserialize)]
struct RawGradingResponse {
    #[serde(default)]
    results: Vec<GradingRow>,
    #[serde(default)]
    average_score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RewriteResponse {
    #[serde(default)]
    optimized_query: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

/// Grades retrieval candidates against the frozen rubric and decides
/// whether the single rewrite round fires.
pub struct GradingService {
    chat: Arc<dyn ChatModel>,
    model: String,
    cutoff_threshold: f32,
    rewrite_threshold: f32,
}

impl GradingService {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        model: String,
        cutoff_threshold: f32,
        rewrite_threshold: f32,
    ) -> Self {
        Self {
            chat,
            model,
            cutoff_threshold,
            rewrite_threshold,
        }
    }

    /// Grade all candidates in one LLM call and return a new graded vector
    /// alongside the grading response. Filter statistics are computed here,
    /// once, and carried forward.
    ///
    /// A failed or unparseable grading call yields zero scores (prioritized
    /// candidates excepted), which the caller sees as a below-threshold
    /// round.
    pub async fn grade(
        &self,
        wrapped_idea: &str,
        candidates: Vec<Candidate>,
    ) -> (Vec<Candidate>, GradingResponse) {
        if candidates.is_empty() {
            return (candidates, GradingResponse::empty(self.cutoff_threshold));
        }

        let request = ChatRequest::new(
            &self.model,
            &grading_system_prompt(),
            build_grading_prompt(wrapped_idea, &candidates),
        )
        .with_temperature(0.1)
        .with_json_mode();

        let (rows, reported_average) = match self.chat.complete(request).await {
            Ok(raw) => match serde_json::from_str::<RawGradingResponse>(&raw) {
                Ok(parsed) => (parsed.results, parsed.average_score),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to parse grading response");
                    (Vec::new(), None)
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Grading call failed");
                (Vec::new(), None)
            }
        };

        let graded = join_scores(candidates, &rows);

        let scores: Vec<f32> = graded.iter().map(|c| c.grading_score).collect();
        // The grader's self-reported mean drives the rewrite decision; only
        // when the model omits it is a mean computed from the joined scores.
        let average_score = match reported_average {
            Some(average) => average.clamp(0.0, 1.0),
            None if scores.is_empty() => 0.0,
            None => scores.iter().sum::<f32>() / scores.len() as f32,
        };

        let filter_stats = FilterStats::compute(&scores, self.cutoff_threshold);
        log_cutoff_filter(&filter_stats);

        let results: Vec<GradingRow> = graded
            .iter()
            .map(|c| GradingRow {
                patent_id: c.publication_number.clone(),
                score: c.grading_score,
                reason: c.grading_reason.clone(),
            })
            .collect();

        tracing::info!(
            graded = results.len(),
            average_score = average_score as f64,
            "Grading complete"
        );

        (
            graded,
            GradingResponse {
                results,
                average_score,
                filter_stats,
            },
        )
    }

    /// Candidates at or above the cutoff, best grading score first.
    pub fn survivors(&self, graded: &[Candidate]) -> Vec<Candidate> {
        let mut survivors: Vec<Candidate> = graded
            .iter()
            .filter(|c| c.grading_score >= self.cutoff_threshold)
            .cloned()
            .collect();
        survivors.sort_by(|a, b| {
            b.grading_score
                .partial_cmp(&a.grading_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        survivors
    }

    /// Whether the mean grade is poor enough to spend the single rewrite.
    pub fn needs_rewrite(&self, response: &GradingResponse) -> bool {
        response.average_score < self.rewrite_threshold
    }

    pub fn rewrite_threshold(&self) -> f32 {
        self.rewrite_threshold
    }

    /// Produce the rewritten query for the second retrieval round.
    /// Falls back to the sanitized idea on any failure.
    pub async fn rewrite_query(
        &self,
        wrapped_idea: &str,
        sanitized_idea: &str,
        previous_queries: &[Query],
        low_scoring: &[Candidate],
    ) -> Query {
        let request = ChatRequest::new(
            &self.model,
            REWRITE_SYSTEM_PROMPT,
            build_rewrite_prompt(wrapped_idea, previous_queries, low_scoring),
        )
        .with_temperature(0.3)
        .with_json_mode();

        match self.chat.complete(request).await {
            Ok(raw) => match serde_json::from_str::<RewriteResponse>(&raw) {
                Ok(parsed) if !parsed.optimized_query.trim().is_empty() => {
                    tracing::info!(
                        keywords = ?parsed.keywords,
                        reasoning = %parsed.reasoning,
                        "Query rewritten"
                    );
                    Query::new(parsed.optimized_query.trim(), QueryKind::Rewritten)
                }
                Ok(_) => {
                    tracing::warn!("Rewrite produced an empty query, using original idea");
                    Query::new(sanitized_idea, QueryKind::Rewritten)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse rewrite response, using original idea");
                    Query::new(sanitized_idea, QueryKind::Rewritten)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Rewrite call failed, using original idea");
                Query::new(sanitized_idea, QueryKind::Rewritten)
            }
        }
    }
}

/// Join LLM grading rows back onto candidates by publication number,
/// producing a new graded vector. Prioritized candidates are always boosted
/// to 1.0, whether or not the model scored them.
fn join_scores(candidates: Vec<Candidate>, rows: &[GradingRow]) -> Vec<Candidate> {
    candidates
        .into_iter()
        .map(|mut candidate| {
            if let Some(row) = rows
                .iter()
                .find(|r| r.patent_id == candidate.publication_number)
            {
                candidate.grading_score = row.score.clamp(0.0, 1.0);
                candidate.grading_reason = row.reason.clone();
            }
            if candidate.is_prioritized {
                candidate.grading_score = 1.0;
                if candidate.grading_reason.is_empty() {
                    candidate.grading_reason =
                        format!("{PRIORITIZED_TAG} 사용자가 명시적으로 요청한 특허");
                } else if !candidate.grading_reason.contains(PRIORITIZED_TAG) {
                    candidate.grading_reason =
                        format!("{PRIORITIZED_TAG} {}", candidate.grading_reason);
                }
            }
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::llm::LlmError;
    use crate::service::testing::MockChat;

    const WRAPPED: &str = "<user_query>\n아이디어\n</user_query>";

    fn candidate(id: &str) -> Candidate {
        Candidate {
            publication_number: id.to_string(),
            title: "제목".into(),
            abstract_text: "초록".into(),
            claims: Some("청구항 1".into()),
            ipc_codes: vec![],
            dense_score: 0.5,
            sparse_score: 0.1,
            fused_score: 0.4,
            rerank_score: None,
            grading_score: 0.0,
            grading_reason: String::new(),
            source_queries: vec![QueryKind::Original],
            is_prioritized: false,
        }
    }

    fn service(chat: Arc<MockChat>) -> GradingService {
        GradingService::new(chat, "gpt-4o".to_string(), 0.3, 0.5)
    }

    #[tokio::test]
    async fn grade_joins_scores_by_publication_number() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion(
            r#"{"results": [
                {"patent_id": "KR-2", "score": 0.8, "reason": "KR-2와 핵심 구성 일치"},
                {"patent_id": "KR-1", "score": 0.2, "reason": "분야만 동일"}
            ], "average_score": 0.5}"#,
        );
        let (graded, response) = service(Arc::clone(&chat))
            .grade(WRAPPED, vec![candidate("KR-1"), candidate("KR-2")])
            .await;

        assert_eq!(graded[0].grading_score, 0.2);
        assert_eq!(graded[1].grading_score, 0.8);
        assert!((response.average_score - 0.5).abs() < 1e-6);
        assert_eq!(response.filter_stats.before_filter, 2);
        assert_eq!(response.filter_stats.after_filter, 1);
    }

    #[tokio::test]
    async fn scores_are_clamped_to_unit_interval() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion(
            r#"{"results": [{"patent_id": "KR-1", "score": 1.7, "reason": "r"}], "average_score": 1.7}"#,
        );
        let (graded, response) = service(Arc::clone(&chat))
            .grade(WRAPPED, vec![candidate("KR-1")])
            .await;
        assert_eq!(graded[0].grading_score, 1.0);
        assert_eq!(response.average_score, 1.0);
    }

    #[tokio::test]
    async fn reported_average_outranks_joined_scores() {
        let chat = Arc::new(MockChat::new());
        // The grader may weigh candidates unevenly; its own mean is what
        // the rewrite decision reads.
        chat.push_completion(
            r#"{"results": [{"patent_id": "KR-1", "score": 0.9, "reason": "r"}], "average_score": 0.2}"#,
        );
        let grading = service(Arc::clone(&chat));
        let (_, response) = grading.grade(WRAPPED, vec![candidate("KR-1")]).await;
        assert!((response.average_score - 0.2).abs() < 1e-6);
        assert!(grading.needs_rewrite(&response));
    }

    #[tokio::test]
    async fn missing_reported_average_falls_back_to_joined_mean() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion(
            r#"{"results": [
                {"patent_id": "KR-1", "score": 0.4, "reason": "r"},
                {"patent_id": "KR-2", "score": 0.8, "reason": "r"}
            ]}"#,
        );
        let (_, response) = service(Arc::clone(&chat))
            .grade(WRAPPED, vec![candidate("KR-1"), candidate("KR-2")])
            .await;
        assert!((response.average_score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn prioritized_candidates_survive_grading_failure() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion_error(LlmError::Timeout);
        let mut prioritized = candidate("KR-1");
        prioritized.is_prioritized = true;

        let (graded, response) = service(Arc::clone(&chat))
            .grade(WRAPPED, vec![prioritized, candidate("KR-2")])
            .await;

        assert_eq!(graded[0].grading_score, 1.0);
        assert!(graded[0].grading_reason.contains(PRIORITIZED_TAG));
        assert_eq!(graded[1].grading_score, 0.0);
        // Mean over (1.0, 0.0) — the failed round reads as low quality.
        assert!((response.average_score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit() {
        let chat = Arc::new(MockChat::new());
        let (graded, response) = service(Arc::clone(&chat)).grade(WRAPPED, vec![]).await;
        assert!(graded.is_empty());
        assert_eq!(response.average_score, 0.0);
        assert_eq!(chat.completion_calls(), 0);
    }

    #[tokio::test]
    async fn survivors_respect_cutoff_and_order() {
        let chat = Arc::new(MockChat::new());
        let grading = service(Arc::clone(&chat));
        let mut a = candidate("KR-1");
        a.grading_score = 0.9;
        let mut b = candidate("KR-2");
        b.grading_score = 0.3;
        let mut c = candidate("KR-3");
        c.grading_score = 0.29;

        let survivors = grading.survivors(&[b.clone(), c, a]);
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].publication_number, "KR-1");
        assert_eq!(survivors[1].publication_number, "KR-2");
    }

    #[tokio::test]
    async fn rewrite_decision_follows_threshold() {
        let chat = Arc::new(MockChat::new());
        let grading = service(Arc::clone(&chat));
        let low = GradingResponse {
            results: vec![],
            average_score: 0.2,
            filter_stats: FilterStats::compute(&[0.2], 0.3),
        };
        let high = GradingResponse {
            average_score: 0.5,
            ..low.clone()
        };
        assert!(grading.needs_rewrite(&low));
        assert!(!grading.needs_rewrite(&high));
    }

    #[tokio::test]
    async fn rewrite_query_parses_and_falls_back() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion(
            r#"{"optimized_query": "AR 글라스 경로 안내", "keywords": ["AR"], "reasoning": "용어 구체화"}"#,
        );
        let grading = service(Arc::clone(&chat));
        let queries = [Query::new("원래 쿼리", QueryKind::Original)];

        let rewritten = grading
            .rewrite_query(WRAPPED, "아이디어", &queries, &[])
            .await;
        assert_eq!(rewritten.kind, QueryKind::Rewritten);
        assert_eq!(rewritten.text, "AR 글라스 경로 안내");

        chat.push_completion_error(LlmError::Api("down".into()));
        let fallback = grading
            .rewrite_query(WRAPPED, "아이디어", &queries, &[])
            .await;
        assert_eq!(fallback.text, "아이디어");
        assert_eq!(fallback.kind, QueryKind::Rewritten);
    }
}
