//! Descriptor comparison with tiered confidence.
//!
//! Similarity is `(1 - d) * 100` where `d` is the Euclidean distance between
//! two descriptors. Descriptors are expected to be L2-normalized, which keeps
//! `d` roughly within [0, 1.4]; the percentage is not clamped, so very
//! distant pairs go negative.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Descriptors of different length cannot be compared. Both sides come from
/// the same model, so this means the pipeline is misconfigured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("comparison unavailable: embedding dimensions differ ({left} vs {right})")]
pub struct ComparisonUnavailable {
    pub left: usize,
    pub right: usize,
}

/// Discrete trust bucket derived from the similarity percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    None,
    Low,
    Medium,
    High,
}

/// Similarity percentages at which each tier begins.
///
/// Empirically tuned; a match requires at least `medium`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: 45.0,
            medium: 35.0,
            low: 25.0,
        }
    }
}

impl TierThresholds {
    /// Highest tier whose threshold `percentage` meets.
    pub fn tier_for(&self, percentage: f64) -> ConfidenceTier {
        if percentage >= self.high {
            ConfidenceTier::High
        } else if percentage >= self.medium {
            ConfidenceTier::Medium
        } else if percentage >= self.low {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub distance: f64,
    pub similarity_percentage: f64,
    pub confidence_tier: ConfidenceTier,
    pub thresholds: TierThresholds,
    pub is_match: bool,
}

impl ComparisonResult {
    /// Similarity as a 0–1 fraction.
    pub fn similarity(&self) -> f64 {
        self.similarity_percentage / 100.0
    }
}

/// Strategy for scoring a live descriptor against a reference descriptor.
pub trait Comparator {
    fn compare(
        &self,
        a: &Embedding,
        b: &Embedding,
    ) -> Result<ComparisonResult, ComparisonUnavailable>;
}

/// Euclidean-distance comparator with fixed tier thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanComparator {
    pub thresholds: TierThresholds,
}

impl EuclideanComparator {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }
}

impl Comparator for EuclideanComparator {
    fn compare(
        &self,
        a: &Embedding,
        b: &Embedding,
    ) -> Result<ComparisonResult, ComparisonUnavailable> {
        if a.dim() != b.dim() {
            return Err(ComparisonUnavailable {
                left: a.dim(),
                right: b.dim(),
            });
        }

        let distance = a.euclidean_distance(b);
        let similarity_percentage = (1.0 - distance) * 100.0;
        let confidence_tier = self.thresholds.tier_for(similarity_percentage);
        let is_match = similarity_percentage >= self.thresholds.medium;

        tracing::info!(
            distance,
            similarity_percentage,
            tier = ?confidence_tier,
            is_match,
            "face comparison"
        );

        Ok(ComparisonResult {
            distance,
            similarity_percentage,
            confidence_tier,
            thresholds: self.thresholds,
            is_match,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two 2-d descriptors exactly `distance` apart.
    fn pair(distance: f32) -> (Embedding, Embedding) {
        (Embedding::new(vec![0.0, 0.0]), Embedding::new(vec![distance, 0.0]))
    }

    fn compare(a: &Embedding, b: &Embedding) -> ComparisonResult {
        EuclideanComparator::default().compare(a, b).unwrap()
    }

    #[test]
    fn test_identity() {
        let e = Embedding::new(vec![0.1, -0.4, 0.9]);
        let result = compare(&e, &e);
        assert_eq!(result.distance, 0.0);
        assert_eq!(result.similarity_percentage, 100.0);
        assert_eq!(result.confidence_tier, ConfidenceTier::High);
        assert!(result.is_match);
    }

    #[test]
    fn test_close_pair_is_high_match() {
        let (a, b) = pair(0.10);
        let result = compare(&a, &b);
        assert!((result.similarity_percentage - 90.0).abs() < 1e-4);
        assert_eq!(result.confidence_tier, ConfidenceTier::High);
        assert!(result.is_match);
    }

    #[test]
    fn test_distant_pair_is_low_non_match() {
        let (a, b) = pair(0.70);
        let result = compare(&a, &b);
        assert!((result.similarity_percentage - 30.0).abs() < 1e-4);
        assert_eq!(result.confidence_tier, ConfidenceTier::Low);
        assert!(!result.is_match);
    }

    #[test]
    fn test_medium_band_matches() {
        let (a, b) = pair(0.60);
        let result = compare(&a, &b);
        assert_eq!(result.confidence_tier, ConfidenceTier::Medium);
        assert!(result.is_match);
    }

    #[test]
    fn test_far_pair_goes_below_zero() {
        let (a, b) = pair(1.3);
        let result = compare(&a, &b);
        assert!(result.similarity_percentage < 0.0);
        assert_eq!(result.confidence_tier, ConfidenceTier::None);
        assert!(!result.is_match);
    }

    /// Unit descriptors with the given cosine similarity, as ArcFace emits.
    fn unit_pair(cosine: f32) -> (Embedding, Embedding) {
        let mut a = vec![0.0; 512];
        let mut b = vec![0.0; 512];
        a[0] = 1.0;
        b[0] = cosine;
        b[1] = (1.0 - cosine * cosine).sqrt();
        (Embedding::new(a), Embedding::new(b))
    }

    #[test]
    fn test_unit_descriptor_scale() {
        let tier = |cosine| {
            let (a, b) = unit_pair(cosine);
            compare(&a, &b).confidence_tier
        };
        assert_eq!(tier(0.86), ConfidenceTier::High);
        assert_eq!(tier(0.80), ConfidenceTier::Medium);
        assert_eq!(tier(0.70), ConfidenceTier::None);
        assert_eq!(tier(0.40), ConfidenceTier::None);
    }

    #[test]
    fn test_symmetric() {
        let a = Embedding::new(vec![0.3, 0.2, -0.5, 0.7]);
        let b = Embedding::new(vec![-0.1, 0.4, 0.2, 0.6]);
        let ab = compare(&a, &b);
        let ba = compare(&b, &a);
        assert_eq!(ab.similarity_percentage, ba.similarity_percentage);
        assert_eq!(ab.confidence_tier, ba.confidence_tier);
        assert_eq!(ab.is_match, ba.is_match);
    }

    #[test]
    fn test_match_and_tier_invariants_over_sweep() {
        let thresholds = TierThresholds::default();
        for step in 0..=150 {
            let (a, b) = pair(step as f32 / 100.0);
            let result = compare(&a, &b);
            assert_eq!(result.is_match, result.similarity_percentage >= thresholds.medium);
            assert_eq!(
                result.confidence_tier == ConfidenceTier::High,
                result.similarity_percentage >= thresholds.high
            );
        }
    }

    #[test]
    fn test_tier_boundaries() {
        let t = TierThresholds::default();
        assert_eq!(t.tier_for(45.0), ConfidenceTier::High);
        assert_eq!(t.tier_for(44.99), ConfidenceTier::Medium);
        assert_eq!(t.tier_for(35.0), ConfidenceTier::Medium);
        assert_eq!(t.tier_for(25.0), ConfidenceTier::Low);
        assert_eq!(t.tier_for(24.99), ConfidenceTier::None);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = EuclideanComparator::default()
            .compare(&Embedding::new(vec![1.0; 128]), &Embedding::new(vec![1.0; 512]))
            .unwrap_err();
        assert_eq!(err, ComparisonUnavailable { left: 128, right: 512 });
    }

    #[test]
    fn test_tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ConfidenceTier::Medium).unwrap(), "\"medium\"");
    }
}
