//! Confidence banding over the fused retrieval scores.

use common::storage::types::query_log_entry::Confidence;

use crate::scoring::mean_fused_score;
use crate::FusedResult;

/// Thresholds that map a mean fused score to a confidence band.
///
/// The defaults (0.8 / 0.6) were calibrated against raw cosine similarity
/// and sit far above what reciprocal rank fusion can produce: with k = 60 a
/// chunk at the top of both lists scores about 0.033. Until the bands are
/// retuned for the fused scale, deployments that want `High`/`Medium` to be
/// reachable must configure thresholds in that range.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceBands {
    pub high: f32,
    pub medium: f32,
}

impl Default for ConfidenceBands {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.6,
        }
    }
}

impl ConfidenceBands {
    /// Band for a result set, from the mean fused score: strictly above
    /// `high` is `High`, strictly above `medium` is `Medium`, anything else
    /// (including an empty set) is `Low`.
    pub fn classify(&self, results: &[FusedResult]) -> Confidence {
        if results.is_empty() {
            return Confidence::Low;
        }
        let mean = mean_fused_score(results);
        if mean > self.high {
            Confidence::High
        } else if mean > self.medium {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fused(chunk_id: &str, fused_score: f32) -> FusedResult {
        FusedResult {
            chunk_id: chunk_id.to_owned(),
            doc_id: "doc".to_owned(),
            text: String::new(),
            page_num: None,
            fused_score,
        }
    }

    #[test]
    fn empty_results_are_low() {
        assert_eq!(ConfidenceBands::default().classify(&[]), Confidence::Low);
    }

    #[test]
    fn bands_split_on_mean_score() {
        let bands = ConfidenceBands::default();
        assert_eq!(
            bands.classify(&[fused("a", 0.95), fused("b", 0.85)]),
            Confidence::High
        );
        assert_eq!(
            bands.classify(&[fused("a", 0.8), fused("b", 0.6)]),
            Confidence::Medium
        );
        assert_eq!(
            bands.classify(&[fused("a", 0.6), fused("b", 0.2)]),
            Confidence::Low
        );
    }

    #[test]
    fn thresholds_are_exclusive_bounds() {
        let bands = ConfidenceBands::default();
        assert_eq!(bands.classify(&[fused("a", 0.8)]), Confidence::Medium);
        assert_eq!(bands.classify(&[fused("a", 0.6)]), Confidence::Low);
    }

    #[test]
    fn bands_are_configurable_for_fused_scale() {
        let bands = ConfidenceBands {
            high: 0.03,
            medium: 0.02,
        };
        assert_eq!(bands.classify(&[fused("a", 0.0328)]), Confidence::High);
        assert_eq!(bands.classify(&[fused("a", 0.025)]), Confidence::Medium);
        assert_eq!(bands.classify(&[fused("a", 0.016)]), Confidence::Low);
    }
}
