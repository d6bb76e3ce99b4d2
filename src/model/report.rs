use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::config::GradingConfig;

/// Infringement-risk verdict, monotone in `risk_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Bucket a 0-100 risk score using the configured cutoffs.
    pub fn from_score(score: u8, grading: &GradingConfig) -> Self {
        if score >= grading.risk_high_from {
            RiskLevel::High
        } else if score >= grading.risk_medium_from {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// One cited prior-art patent in the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TopPatent {
    pub id: String,
    /// Technical similarity to the idea, 0-100.
    pub similarity: u8,
    pub title: String,
    pub summary: String,
}

/// Typed analysis report extracted from the streamed prose.
///
/// Invariants: `similar_count == top_patents.len()`, every cited id is a
/// member of the grading survivor set for the run, and `risk_level` follows
/// `risk_score` through the configured buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisReport {
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub similar_count: usize,
    pub uniqueness: String,
    pub top_patents: Vec<TopPatent>,
}

impl AnalysisReport {
    /// Well-formed "nothing found / parse failed" report.
    ///
    /// Returned instead of an error whenever structured parsing fails or no
    /// survivor exists, so callers always receive a complete report shape.
    pub fn empty() -> Self {
        Self {
            risk_level: RiskLevel::Low,
            risk_score: 0,
            similar_count: 0,
            uniqueness: "유사한 선행 특허가 조회되지 않았습니다.".to_string(),
            top_patents: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucketing_is_monotone_with_defaults() {
        let grading = GradingConfig::default();
        assert_eq!(RiskLevel::from_score(0, &grading), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(39, &grading), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(40, &grading), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(74, &grading), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(75, &grading), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(100, &grading), RiskLevel::High);
    }

    #[test]
    fn empty_report_is_well_formed() {
        let report = AnalysisReport::empty();
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_eq!(report.risk_score, 0);
        assert_eq!(report.similar_count, report.top_patents.len());
    }

    #[test]
    fn risk_level_serializes_lowercase() {
        let json = serde_json::to_string(&RiskLevel::Medium).expect("serialize");
        assert_eq!(json, r#""medium""#);
    }
}
