//! Query expansion: hypothetical claim (HyDE) and multi-query paraphrases

use std::sync::Arc;

use serde::Deserialize;

use crate::model::{Query, QueryKind};
use crate::service::expansion::prompts::{
    build_hyde_prompt, build_multi_query_prompt, HYDE_SYSTEM_PROMPT, MULTI_QUERY_SYSTEM_PROMPT,
};
use crate::service::llm::{ChatModel, ChatRequest};

pub mod prompts;

#[derive(Debug, Deserialize)]
struct MultiQueryResponse {
    #[serde(default)]
    queries: Vec<String>,
}

/// Produces the query set handed to the hybrid retriever:
/// {hypothetical claim} ∪ {N paraphrases}, falling back to the original
/// idea on any expansion failure.
pub struct QueryExpansionService {
    chat: Arc<dyn ChatModel>,
    model: String,
    multi_query_n: usize,
}

impl QueryExpansionService {
    pub fn new(chat: Arc<dyn ChatModel>, model: String, multi_query_n: usize) -> Self {
        Self {
            chat,
            model,
            multi_query_n,
        }
    }

    /// Generate a hypothetical independent claim from the wrapped idea.
    ///
    /// Expansion is best-effort: on failure the sanitized idea itself is the
    /// search query, logged at WARNING.
    pub async fn hypothetical_claim(&self, wrapped_idea: &str, sanitized_idea: &str) -> Query {
        let request = ChatRequest::new(
            &self.model,
            HYDE_SYSTEM_PROMPT,
            build_hyde_prompt(wrapped_idea),
        )
        .with_temperature(0.3)
        .with_max_tokens(500);

        match self.chat.complete(request).await {
            Ok(claim) => {
                let claim = claim.trim().to_string();
                if claim.is_empty() {
                    tracing::warn!("Hypothetical claim came back empty, using original idea");
                    Query::new(sanitized_idea, QueryKind::Original)
                } else {
                    let query = Query::new(claim, QueryKind::HypotheticalClaim);
                    tracing::info!(
                        query_fingerprint = %query.fingerprint(),
                        "Generated hypothetical claim"
                    );
                    query
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Hypothetical claim generation failed, using original idea");
                Query::new(sanitized_idea, QueryKind::Original)
            }
        }
    }

    /// Generate up to N lexically diverse paraphrases of the idea.
    pub async fn multi_queries(&self, wrapped_idea: &str, sanitized_idea: &str) -> Vec<Query> {
        let request = ChatRequest::new(
            &self.model,
            MULTI_QUERY_SYSTEM_PROMPT,
            build_multi_query_prompt(wrapped_idea, self.multi_query_n),
        )
        .with_temperature(0.7)
        .with_json_mode();

        let fallback = || vec![Query::new(sanitized_idea, QueryKind::Original)];

        let raw = match self.chat.complete(request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Multi-query generation failed, using original idea");
                return fallback();
            }
        };

        match serde_json::from_str::<MultiQueryResponse>(&raw) {
            Ok(parsed) if !parsed.queries.is_empty() => {
                let queries: Vec<Query> = parsed
                    .queries
                    .into_iter()
                    .take(self.multi_query_n)
                    .enumerate()
                    .map(|(i, q)| Query::new(q, QueryKind::Paraphrase(i)))
                    .collect();
                tracing::info!(count = queries.len(), "Generated multi-queries");
                queries
            }
            Ok(_) => {
                tracing::warn!("Multi-query response contained no queries, using original idea");
                fallback()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse multi-query response, using original idea");
                fallback()
            }
        }
    }

    /// Full expansion: hypothetical claim plus paraphrases, deduplicated by
    /// text, fingerprints logged.
    pub async fn expand(&self, wrapped_idea: &str, sanitized_idea: &str) -> Vec<Query> {
        let claim = self.hypothetical_claim(wrapped_idea, sanitized_idea).await;
        let paraphrases = self.multi_queries(wrapped_idea, sanitized_idea).await;

        let mut queries = vec![claim];
        for query in paraphrases {
            if !queries.iter().any(|q| q.text == query.text) {
                queries.push(query);
            }
        }

        let fingerprints: Vec<String> = queries.iter().map(|q| q.fingerprint()).collect();
        tracing::info!(
            count = queries.len(),
            fingerprints = ?fingerprints,
            "Query expansion complete"
        );
        queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::llm::LlmError;
    use crate::service::testing::MockChat;

    const IDEA: &str = "스마트 안경 AR 내비게이션";
    const WRAPPED: &str = "<user_query>\n스마트 안경 AR 내비게이션\n</user_query>";

    fn service(chat: Arc<MockChat>) -> QueryExpansionService {
        QueryExpansionService::new(chat, "gpt-4o".to_string(), 3)
    }

    #[tokio::test]
    async fn hypothetical_claim_success() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion("청구항 1. 스마트 안경에 있어서...");
        let query = service(Arc::clone(&chat))
            .hypothetical_claim(WRAPPED, IDEA)
            .await;
        assert_eq!(query.kind, QueryKind::HypotheticalClaim);
        assert!(query.text.starts_with("청구항 1."));
    }

    #[tokio::test]
    async fn hypothetical_claim_falls_back_on_failure() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion_error(LlmError::Timeout);
        let query = service(Arc::clone(&chat))
            .hypothetical_claim(WRAPPED, IDEA)
            .await;
        assert_eq!(query.kind, QueryKind::Original);
        assert_eq!(query.text, IDEA);
    }

    #[tokio::test]
    async fn multi_queries_parses_and_caps() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion(r#"{"queries": ["q1", "q2", "q3", "q4", "q5"]}"#);
        let queries = service(Arc::clone(&chat)).multi_queries(WRAPPED, IDEA).await;
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].kind, QueryKind::Paraphrase(0));
        assert_eq!(queries[2].kind, QueryKind::Paraphrase(2));
    }

    #[tokio::test]
    async fn multi_queries_fallback_on_bad_json() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion("not json at all");
        let queries = service(Arc::clone(&chat)).multi_queries(WRAPPED, IDEA).await;
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].kind, QueryKind::Original);
    }

    #[tokio::test]
    async fn expand_unions_and_dedups() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion("공통 쿼리");
        chat.push_completion(r#"{"queries": ["공통 쿼리", "다른 쿼리"]}"#);
        let queries = service(Arc::clone(&chat)).expand(WRAPPED, IDEA).await;
        assert_eq!(queries.len(), 2);
    }

    #[tokio::test]
    async fn prompts_embed_only_wrapped_idea() {
        let chat = Arc::new(MockChat::new());
        chat.push_completion("청구항");
        chat.push_completion(r#"{"queries": ["q1"]}"#);
        service(Arc::clone(&chat)).expand(WRAPPED, IDEA).await;
        for prompt in chat.recorded_prompts() {
            assert_eq!(prompt.matches("<user_query>").count(), 1);
            assert_eq!(prompt.matches("</user_query>").count(), 1);
        }
    }
}
