use serde::{Deserialize, Serialize};

/// Frozen grading rubric anchors, quoted verbatim in the grading prompt.
///
/// 0.0 = unrelated domain, 0.3 = shared domain but no overlapping elements,
/// 0.7 = overlapping elements with substantive differences,
/// 1.0 = near-identical solution.
pub const RUBRIC_ANCHORS: &[(f32, &str)] = &[
    (0.0, "기술적으로 무관한 분야"),
    (0.3, "같은 기술 분야이나 겹치는 구성요소 없음"),
    (0.7, "구성요소가 겹치나 실질적 차이 존재"),
    (1.0, "거의 동일한 해결 수단"),
];

/// One graded candidate, as returned by the grading model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingRow {
    pub patent_id: String,
    pub score: f32,
    pub reason: String,
}

/// Cutoff filter statistics, computed exactly once per grading pass and
/// carried forward; downstream stages never recompute these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub before_filter: usize,
    pub after_filter: usize,
    pub filtered_out: usize,
    pub filter_ratio_pct: f32,
    pub threshold: f32,
}

impl FilterStats {
    /// Compute filter statistics over a set of grading scores.
    ///
    /// `ratio` is rounded to one decimal place. An empty input yields a
    /// zero ratio rather than a division by zero.
    pub fn compute(scores: &[f32], threshold: f32) -> Self {
        let before_filter = scores.len();
        let after_filter = scores.iter().filter(|s| **s >= threshold).count();
        let filtered_out = before_filter - after_filter;
        let filter_ratio_pct = if before_filter == 0 {
            0.0
        } else {
            (filtered_out as f32 / before_filter as f32 * 1000.0).round() / 10.0
        };
        Self {
            before_filter,
            after_filter,
            filtered_out,
            filter_ratio_pct,
            threshold,
        }
    }
}

/// Result of one grading pass over retrieved candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResponse {
    pub results: Vec<GradingRow>,
    pub average_score: f32,
    pub filter_stats: FilterStats,
}

impl GradingResponse {
    pub fn empty(threshold: f32) -> Self {
        Self {
            results: Vec::new(),
            average_score: 0.0,
            filter_stats: FilterStats::compute(&[], threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_stats_counts_survivors() {
        let stats = FilterStats::compute(&[0.1, 0.3, 0.5, 0.9], 0.3);
        assert_eq!(stats.before_filter, 4);
        assert_eq!(stats.after_filter, 3);
        assert_eq!(stats.filtered_out, 1);
        assert_eq!(stats.filter_ratio_pct, 25.0);
        assert_eq!(stats.threshold, 0.3);
    }

    #[test]
    fn filter_stats_all_filtered() {
        let stats = FilterStats::compute(&[0.0, 0.1, 0.2], 0.3);
        assert_eq!(stats.after_filter, 0);
        assert_eq!(stats.filter_ratio_pct, 100.0);
    }

    #[test]
    fn filter_stats_empty_input() {
        let stats = FilterStats::compute(&[], 0.3);
        assert_eq!(stats.before_filter, 0);
        assert_eq!(stats.filter_ratio_pct, 0.0);
    }

    #[test]
    fn filter_ratio_rounds_to_one_decimal() {
        // 1 of 3 filtered -> 33.333... -> 33.3
        let stats = FilterStats::compute(&[0.1, 0.5, 0.5], 0.3);
        assert_eq!(stats.filter_ratio_pct, 33.3);
    }

    #[test]
    fn boundary_score_survives() {
        // score == threshold counts as a survivor
        let stats = FilterStats::compute(&[0.3], 0.3);
        assert_eq!(stats.after_filter, 1);
    }
}
