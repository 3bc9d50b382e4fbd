//! Reciprocal rank fusion of the dense and lexical result lists.
//!
//! Fusion works on ranks, not raw scores, so cosine similarities and BM25
//! weights never need to be put on a common scale. Each list contributes
//! `1 / (k + rank + 1)` per chunk and contributions add up, so a chunk found
//! by both signals outranks one found by a single signal at similar ranks.

use std::collections::HashMap;

use crate::{FusedResult, RankedResult};

/// Rank-fusion smoothing constant. The standard value of 60 keeps a single
/// top rank from dominating the blend.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    pub k: f32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

/// Fuse two ranked lists into one, deduplicated by `chunk_id`.
///
/// The output is ordered by fused score descending; ties break on
/// `chunk_id` ascending so the ordering is fully deterministic.
pub fn reciprocal_rank_fusion(
    dense: Vec<RankedResult>,
    lexical: Vec<RankedResult>,
    config: &RrfConfig,
) -> Vec<FusedResult> {
    let mut fused: HashMap<String, FusedResult> = HashMap::new();

    for list in [dense, lexical] {
        for (rank, result) in list.into_iter().enumerate() {
            let contribution = 1.0 / (config.k + rank as f32 + 1.0);
            fused
                .entry(result.chunk_id.clone())
                .or_insert_with(|| FusedResult {
                    chunk_id: result.chunk_id,
                    doc_id: result.doc_id,
                    text: result.text,
                    page_num: result.page_num,
                    fused_score: 0.0,
                })
                .fused_score += contribution;
        }
    }

    let mut ranked: Vec<FusedResult> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    ranked
}

/// Mean fused score across the final results. Zero for an empty set.
pub fn mean_fused_score(results: &[FusedResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.fused_score).sum::<f32>() / results.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(chunk_id: &str, raw_score: f32) -> RankedResult {
        RankedResult {
            chunk_id: chunk_id.to_owned(),
            doc_id: format!("doc-{chunk_id}"),
            text: format!("text for {chunk_id}"),
            page_num: None,
            raw_score,
        }
    }

    #[test]
    fn fuses_overlapping_lists_with_standard_k() {
        let dense = vec![ranked("x", 0.91), ranked("y", 0.85), ranked("z", 0.40)];
        let lexical = vec![ranked("y", 7.1), ranked("w", 3.2), ranked("x", 1.0)];

        let fused = reciprocal_rank_fusion(dense, lexical, &RrfConfig::default());
        let order: Vec<&str> = fused.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["y", "x", "w", "z"]);

        let score_of = |id: &str| {
            fused
                .iter()
                .find(|r| r.chunk_id == id)
                .map(|r| r.fused_score)
                .unwrap()
        };
        assert!((score_of("y") - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
        assert!((score_of("x") - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-6);
        assert!((score_of("w") - 1.0 / 62.0).abs() < 1e-6);
        assert!((score_of("z") - 1.0 / 63.0).abs() < 1e-6);
    }

    #[test]
    fn presence_in_both_lists_beats_single_signal_at_equal_rank() {
        let dense = vec![ranked("both", 0.9), ranked("dense_only", 0.8)];
        let lexical = vec![ranked("both", 4.0), ranked("lexical_only", 2.0)];

        let fused = reciprocal_rank_fusion(dense, lexical, &RrfConfig::default());
        assert_eq!(fused[0].chunk_id, "both");
        assert!(fused[0].fused_score > fused[1].fused_score);
    }

    #[test]
    fn equal_scores_break_ties_on_chunk_id() {
        let dense = vec![ranked("b", 0.5)];
        let lexical = vec![ranked("a", 0.5)];

        let fused = reciprocal_rank_fusion(dense, lexical, &RrfConfig::default());
        assert_eq!(fused[0].chunk_id, "a");
        assert_eq!(fused[1].chunk_id, "b");
    }

    #[test]
    fn fusion_is_deterministic_across_runs() {
        let make = || {
            (
                vec![ranked("p", 0.7), ranked("q", 0.6), ranked("r", 0.5)],
                vec![ranked("q", 3.0), ranked("s", 2.0)],
            )
        };

        let (d1, l1) = make();
        let (d2, l2) = make();
        let a = reciprocal_rank_fusion(d1, l1, &RrfConfig::default());
        let b = reciprocal_rank_fusion(d2, l2, &RrfConfig::default());
        assert_eq!(a, b);
    }

    #[test]
    fn mean_of_empty_set_is_zero() {
        assert_eq!(mean_fused_score(&[]), 0.0);
    }
}
