//! Grounded streaming analysis and structured report extraction

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;

use crate::model::config::GradingConfig;
use crate::model::grading::FilterStats;
use crate::model::report::{AnalysisReport, RiskLevel, TopPatent};
use crate::model::Candidate;
use crate::service::analysis::prompts::{
    analysis_system_prompt, build_analysis_context, build_analysis_prompt, build_parse_prompt,
    PARSE_SYSTEM_PROMPT,
};
use crate::service::cutoff::log_analysis_cutoff;
use crate::service::llm::{with_retries, ChatModel, ChatRequest, RetryPolicy, TokenStream};

pub mod prompts;

/// Survivors rendered into the analysis context.
const MAX_CONTEXT_PATENTS: usize = 5;

const STAGE_STREAM: &str = "critical_analysis_stream";

#[derive(Debug, Deserialize)]
struct RawParsedPatent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    similarity: f64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct RawParsedReport {
    #[serde(default)]
    risk_score: f64,
    #[serde(default)]
    uniqueness: String,
    #[serde(default)]
    top_patents: Vec<RawParsedPatent>,
}

/// Streams the grounded critical analysis and converts the finished stream
/// into a typed report.
///
/// Cost contract: the reasoning model is used for streaming only; the parse
/// pass runs on the configured lightweight model.
pub struct AnalysisService {
    chat: Arc<dyn ChatModel>,
    reasoning_model: String,
    parsing_model: String,
    grading: GradingConfig,
    retry: RetryPolicy,
}

impl AnalysisService {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        reasoning_model: String,
        parsing_model: String,
        grading: GradingConfig,
    ) -> Self {
        Self {
            chat,
            reasoning_model,
            parsing_model,
            grading,
            retry: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stream the critical analysis token by token.
    ///
    /// The returned stream never panics the caller's loop: an initial or
    /// mid-stream transport failure surfaces as one final `Err` item and the
    /// stream ends.
    pub async fn analyze_stream(&self, wrapped_idea: &str, graded: &[Candidate]) -> TokenStream {
        let survivors = self.context_survivors(graded, STAGE_STREAM);
        if survivors.is_empty() {
            return futures::stream::iter(vec![Ok(
                "분석할 가치가 있는 관련 특허가 조회되지 않았습니다.".to_string()
            )])
            .boxed();
        }

        let request = ChatRequest::new(
            &self.reasoning_model,
            &analysis_system_prompt(),
            build_analysis_prompt(wrapped_idea, &build_analysis_context(&survivors)),
        )
        .with_temperature(0.2)
        .with_max_tokens(2500);

        match self.chat.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Analysis stream failed to start");
                futures::stream::iter(vec![Err(e)]).boxed()
            }
        }
    }

    /// Extract the typed report from the completed stream text.
    ///
    /// Never raises toward the caller: transient upstream failures are
    /// retried, anything else degrades to the well-formed empty report with
    /// one WARNING log line.
    pub async fn parse_to_structured(
        &self,
        streamed_text: &str,
        survivor_ids: &[String],
    ) -> AnalysisReport {
        if streamed_text.trim().is_empty() || survivor_ids.is_empty() {
            return AnalysisReport::empty();
        }

        let request = ChatRequest::new(
            &self.parsing_model,
            PARSE_SYSTEM_PROMPT,
            build_parse_prompt(streamed_text, survivor_ids),
        )
        .with_temperature(0.0)
        .with_json_mode();

        let outcome = with_retries("parse_report", self.retry, || {
            let request = request.clone();
            async move { self.chat.complete(request).await }
        })
        .await;

        let raw = match outcome {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(event = "parse_failed", error = %e, "Structured parse call failed");
                return AnalysisReport::empty();
            }
        };

        match serde_json::from_str::<RawParsedReport>(&raw) {
            Ok(parsed) => self.to_report(parsed, survivor_ids),
            Err(e) => {
                tracing::warn!(event = "parse_failed", error = %e, "Structured parse output unreadable");
                AnalysisReport::empty()
            }
        }
    }

    /// Apply the cutoff defensively, log the analysis-stage statistics, and
    /// keep the top survivors by grading score for the prompt context.
    fn context_survivors(&self, graded: &[Candidate], stage: &str) -> Vec<Candidate> {
        let scores: Vec<f32> = graded.iter().map(|c| c.grading_score).collect();
        let stats = FilterStats::compute(&scores, self.grading.cutoff_threshold);
        log_analysis_cutoff(stage, &stats);

        let mut survivors: Vec<Candidate> = graded
            .iter()
            .filter(|c| c.grading_score >= self.grading.cutoff_threshold)
            .cloned()
            .collect();
        survivors.sort_by(|a, b| {
            b.grading_score
                .partial_cmp(&a.grading_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        survivors.truncate(MAX_CONTEXT_PATENTS);
        survivors
    }

    /// Report coherence: only survivor ids may be cited, similarity and risk
    /// scores are clamped, and `similar_count` mirrors the citation list.
    fn to_report(&self, parsed: RawParsedReport, survivor_ids: &[String]) -> AnalysisReport {
        let mut top_patents: Vec<TopPatent> = parsed
            .top_patents
            .into_iter()
            .filter(|p| survivor_ids.contains(&p.id))
            .map(|p| TopPatent {
                id: p.id,
                similarity: p.similarity.clamp(0.0, 100.0).round() as u8,
                title: p.title,
                summary: p.summary,
            })
            .collect();
        top_patents.truncate(MAX_CONTEXT_PATENTS);

        let risk_score = parsed.risk_score.clamp(0.0, 100.0).round() as u8;

        AnalysisReport {
            risk_level: RiskLevel::from_score(risk_score, &self.grading),
            risk_score,
            similar_count: top_patents.len(),
            uniqueness: parsed.uniqueness,
            top_patents,
        }
    }
}
