//! Capability scoring with rank normalization
//!
//! Raw match scores live on very different scales (a context length of
//! 128k against a boolean flag), so each field is rank-normalized within
//! the candidate set before its importance weight is applied.

use super::capabilities::{CapabilitySet, RequirementSet};

/// Scores a candidate set of models against one requirement set
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityScorer {
    /// Rank cost fields cheapest-first instead of best-first
    invert_cost: bool,
}

impl CapabilityScorer {
    pub fn new() -> Self {
        Self { invert_cost: false }
    }

    /// Scorer whose cost fields use `1/score`
    pub fn cheapest_first() -> Self {
        Self { invert_cost: true }
    }

    /// Final score per candidate, in candidate order
    pub fn score(&self, candidates: &[&CapabilitySet], requirements: &RequirementSet) -> Vec<f64> {
        let mut totals = vec![0.0; candidates.len()];

        for (field, target) in requirements.targets() {
            let raw: Vec<f64> = candidates
                .iter()
                .map(|caps| {
                    let score = caps.matches(field, &target);
                    if self.invert_cost && field.is_cost() {
                        if score != 0.0 { 1.0 / score } else { 0.0 }
                    } else {
                        score
                    }
                })
                .collect();

            let weight = field.weight();
            for (total, normalized) in totals.iter_mut().zip(rank_normalize(&raw)) {
                *total += normalized * weight;
            }
        }

        totals
    }
}

/// Replace each value by `(rank + 1) / distinct_count`.
///
/// Equal values share a rank; there is no secondary ordering.
pub fn rank_normalize(raw: &[f64]) -> Vec<f64> {
    let mut distinct = raw.to_vec();
    distinct.sort_by(|a, b| a.total_cmp(b));
    distinct.dedup();

    let count = distinct.len() as f64;
    raw.iter()
        .map(|value| {
            let rank = distinct.partition_point(|d| d.total_cmp(value).is_lt());
            (rank as f64 + 1.0) / count
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::capabilities::{Flag, InverseOrdered, Ordered, Text};

    fn model(quality: f64, context: f64, cost: f64) -> CapabilitySet {
        CapabilitySet {
            quality_tier: Ordered(quality),
            context_length: Ordered(context),
            input_cost: InverseOrdered(cost),
            output_cost: InverseOrdered(cost),
            ..Default::default()
        }
    }

    fn argmax(scores: &[f64]) -> usize {
        scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_rank_normalize_basic() {
        assert_eq!(rank_normalize(&[10.0, 30.0, 20.0]), vec![1.0 / 3.0, 1.0, 2.0 / 3.0]);
    }

    #[test]
    fn test_rank_normalize_ties_share_score() {
        let normalized = rank_normalize(&[5.0, 1.0, 5.0]);
        assert_eq!(normalized[0], normalized[2]);
        assert_eq!(normalized, vec![1.0, 0.5, 1.0]);
    }

    #[test]
    fn test_single_distinct_value_has_no_discriminative_power() {
        assert_eq!(rank_normalize(&[7.0, 7.0, 7.0]), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_rank_normalize_invariant_under_positive_scaling() {
        let raw = [0.0, 3.5, 12.0, 3.5, 120.0];
        for factor in [0.001, 0.5, 2.0, 1e6] {
            let scaled: Vec<f64> = raw.iter().map(|v| v * factor).collect();
            assert_eq!(rank_normalize(&raw), rank_normalize(&scaled));
        }
    }

    #[test]
    fn test_context_length_does_not_dominate_by_magnitude() {
        // One model wins context length by a huge margin, the other wins
        // vendor. Vendor carries the larger weight, so it must win.
        let big_context = CapabilitySet {
            context_length: Ordered(1_000_000.0),
            vendor: Text("Other".into()),
            ..Default::default()
        };
        let right_vendor = CapabilitySet {
            context_length: Ordered(8_000.0),
            vendor: Text("OpenAI".into()),
            ..Default::default()
        };
        let requirements = RequirementSet {
            context_length: Some(8_000.0),
            vendor: Some("OpenAI".into()),
            ..Default::default()
        };

        let scores = CapabilityScorer::new().score(&[&big_context, &right_vendor], &requirements);
        assert_eq!(argmax(&scores), 1);
    }

    #[test]
    fn test_quality_and_context_selects_strongest() {
        let models = [model(3.5, 8000.0, 10.0), model(4.0, 16000.0, 10.0), model(4.5, 32000.0, 10.0)];
        let refs: Vec<&CapabilitySet> = models.iter().collect();
        let requirements = RequirementSet {
            quality_tier: Some(4.5),
            context_length: Some(16000.0),
            ..Default::default()
        };

        let scores = CapabilityScorer::new().score(&refs, &requirements);
        assert_eq!(argmax(&scores), 2);
        assert!(scores[2] > scores[1] && scores[1] > scores[0]);
    }

    #[test]
    fn test_cheapest_first_inverts_cost_ranking() {
        let cheap = model(4.0, 8000.0, 1.0);
        let pricey = model(4.0, 8000.0, 100.0);
        let requirements = RequirementSet::default();

        let best = CapabilityScorer::new().score(&[&cheap, &pricey], &requirements);
        assert!(best[0] > best[1]);

        let inverted = CapabilityScorer::cheapest_first().score(&[&cheap, &pricey], &requirements);
        assert!(inverted[0] < inverted[1]);
    }

    #[test]
    fn test_zero_weight_flags_do_not_change_scores() {
        let plain = model(4.0, 8000.0, 10.0);
        let flagged = CapabilitySet {
            privacy_compliance: Flag(true),
            ..model(4.0, 8000.0, 10.0)
        };
        let requirements = RequirementSet {
            privacy_compliance: Some(true),
            ..Default::default()
        };
        let scores = CapabilityScorer::new().score(&[&plain, &flagged], &requirements);
        assert_eq!(scores[0], scores[1]);
    }
}
