//! Shared cutoff-statistics logging
//!
//! Exactly one place computes filter statistics (`FilterStats::compute`) and
//! exactly one place emits the structured log lines for them. Grading and
//! analysis both call in here; no stage recomputes or reformats the numbers.

use crate::model::grading::FilterStats;

/// Above this filtered-out ratio the cutoff log escalates to WARNING and an
/// additional alerting event is emitted.
const HIGH_RATIO_PCT: f32 = 80.0;

pub(crate) fn is_high_ratio(stats: &FilterStats) -> bool {
    stats.filter_ratio_pct > HIGH_RATIO_PCT
}

/// Emit the grading-stage cutoff log.
pub fn log_cutoff_filter(stats: &FilterStats) {
    if is_high_ratio(stats) {
        tracing::warn!(
            event = "cutoff_filter",
            before_filter = stats.before_filter,
            after_filter = stats.after_filter,
            filtered_out = stats.filtered_out,
            filter_ratio_pct = stats.filter_ratio_pct as f64,
            threshold = stats.threshold as f64,
            "Grading cutoff applied"
        );
        tracing::warn!(
            event = "high_cutoff_ratio_warning",
            filter_ratio_pct = stats.filter_ratio_pct as f64,
            threshold = stats.threshold as f64,
            "Unusually high cutoff ratio, retrieval quality is poor"
        );
    } else {
        tracing::info!(
            event = "cutoff_filter",
            before_filter = stats.before_filter,
            after_filter = stats.after_filter,
            filtered_out = stats.filtered_out,
            filter_ratio_pct = stats.filter_ratio_pct as f64,
            threshold = stats.threshold as f64,
            "Grading cutoff applied"
        );
    }
}

/// Emit the analysis-stage cutoff log with its stage label
/// (`critical_analysis` or `critical_analysis_stream`).
pub fn log_analysis_cutoff(stage: &str, stats: &FilterStats) {
    tracing::info!(
        event = "analysis_cutoff_filter",
        stage = stage,
        before_filter = stats.before_filter,
        after_filter = stats.after_filter,
        filtered_out = stats.filtered_out,
        filter_ratio_pct = stats.filter_ratio_pct as f64,
        threshold = stats.threshold as f64,
        "Analysis context cutoff applied"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_threshold_is_exclusive_at_eighty() {
        let at_eighty = FilterStats {
            before_filter: 5,
            after_filter: 1,
            filtered_out: 4,
            filter_ratio_pct: 80.0,
            threshold: 0.3,
        };
        assert!(!is_high_ratio(&at_eighty));

        let above = FilterStats {
            filter_ratio_pct: 80.1,
            ..at_eighty
        };
        assert!(is_high_ratio(&above));

        let all_filtered = FilterStats {
            after_filter: 0,
            filtered_out: 5,
            filter_ratio_pct: 100.0,
            ..at_eighty
        };
        assert!(is_high_ratio(&all_filtered));
    }
}
