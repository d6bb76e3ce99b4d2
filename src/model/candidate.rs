use serde::{Deserialize, Serialize};

use crate::model::query::QueryKind;

/// A retrieved patent passage, keyed by publication number for the whole
/// pipeline run.
///
/// Every stage produces a new vector of candidates; no stage mutates a
/// previous stage's output in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Primary key across the pipeline, e.g. `KR-102842452-B1`.
    pub publication_number: String,
    pub title: String,
    pub abstract_text: String,
    #[serde(default)]
    pub claims: Option<String>,
    #[serde(default)]
    pub ipc_codes: Vec<String>,
    pub dense_score: f32,
    pub sparse_score: f32,
    pub fused_score: f32,
    #[serde(default)]
    pub rerank_score: Option<f32>,
    /// Set by the grader; 0.0 until then.
    #[serde(default)]
    pub grading_score: f32,
    #[serde(default)]
    pub grading_reason: String,
    /// Provenance labels of every query that surfaced this passage.
    #[serde(skip)]
    pub source_queries: Vec<QueryKind>,
    /// Publication numbers named verbatim in the idea are fetched directly
    /// and always survive grading.
    #[serde(default)]
    pub is_prioritized: bool,
}

impl Candidate {
    /// Text handed to the cross-encoder and to prompt context builders.
    pub fn combined_text(&self, max_chars: usize) -> String {
        let mut text = format!(
            "{} {} {}",
            self.title,
            self.abstract_text,
            self.claims.as_deref().unwrap_or("")
        );
        if text.len() > max_chars {
            // Truncate on a char boundary.
            let cut = (0..=max_chars).rev().find(|i| text.is_char_boundary(*i));
            text.truncate(cut.unwrap_or(0));
        }
        text
    }

    /// Merge a re-retrieved copy of the same publication into `self`.
    ///
    /// Keeps the higher fused score and the score fields that came with it,
    /// and accumulates source-query provenance. The prioritized flag is
    /// sticky: once a passage was explicitly requested it stays prioritized.
    pub fn merge(&mut self, other: Candidate) {
        debug_assert_eq!(self.publication_number, other.publication_number);
        if other.fused_score > self.fused_score {
            self.dense_score = other.dense_score;
            self.sparse_score = other.sparse_score;
            self.fused_score = other.fused_score;
        }
        for kind in other.source_queries {
            if !self.source_queries.contains(&kind) {
                self.source_queries.push(kind);
            }
        }
        self.is_prioritized |= other.is_prioritized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, fused: f32) -> Candidate {
        Candidate {
            publication_number: id.to_string(),
            title: "제목".to_string(),
            abstract_text: "초록".to_string(),
            claims: None,
            ipc_codes: vec!["G06Q".to_string()],
            dense_score: fused,
            sparse_score: 0.0,
            fused_score: fused,
            rerank_score: None,
            grading_score: 0.0,
            grading_reason: String::new(),
            source_queries: vec![QueryKind::Original],
            is_prioritized: false,
        }
    }

    #[test]
    fn merge_keeps_highest_fused_score() {
        let mut a = candidate("KR-1000-B1", 0.4);
        let mut b = candidate("KR-1000-B1", 0.9);
        b.source_queries = vec![QueryKind::HypotheticalClaim];
        a.merge(b);
        assert_eq!(a.fused_score, 0.9);
        assert_eq!(a.source_queries.len(), 2);
    }

    #[test]
    fn merge_preserves_prioritized_flag() {
        let mut a = candidate("KR-1000-B1", 0.9);
        a.is_prioritized = true;
        a.merge(candidate("KR-1000-B1", 0.2));
        assert!(a.is_prioritized);
        assert_eq!(a.fused_score, 0.9);
    }

    #[test]
    fn combined_text_truncates_on_char_boundary() {
        let c = candidate("KR-1000-B1", 0.1);
        let text = c.combined_text(7);
        assert!(text.len() <= 7);
        // Must not panic on multi-byte boundaries.
        let _ = c.combined_text(8);
    }
}
