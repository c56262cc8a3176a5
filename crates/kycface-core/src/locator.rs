//! Adaptive face location: relax the detector's confidence floor step by
//! step until a face turns up or the sweep is exhausted.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::raster::RasterImage;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

/// Tolerance for deciding whether the last step lands exactly on the floor.
const SWEEP_EPSILON: f64 = 1e-6;

/// Threshold sweep parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// First (strictest) confidence threshold tried.
    pub initial: f32,
    /// The sweep stops once the threshold reaches or drops below this value.
    pub floor: f32,
    /// Amount the threshold is relaxed after each empty attempt.
    pub step: f32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            initial: 0.20,
            floor: 0.05,
            step: 0.02,
        }
    }
}

impl SweepConfig {
    /// Iterate the thresholds this sweep will try, strictest first.
    pub fn thresholds(&self) -> ThresholdSweep {
        ThresholdSweep::new(self)
    }
}

/// Decreasing thresholds `initial - i * step` for every `i` whose value
/// stays strictly above the floor.
///
/// Each value is derived from its index, so the iteration count is fixed
/// up front and does not depend on accumulated floating-point error.
#[derive(Debug, Clone)]
pub struct ThresholdSweep {
    initial: f64,
    step: f64,
    next: u32,
    len: u32,
}

impl ThresholdSweep {
    fn new(config: &SweepConfig) -> Self {
        let initial = f64::from(config.initial);
        let floor = f64::from(config.floor);
        let step = f64::from(config.step);

        let len = if step > 0.0 && initial > floor {
            ((initial - floor) / step - SWEEP_EPSILON).ceil().max(0.0) as u32
        } else {
            0
        };

        Self {
            initial,
            step,
            next: 0,
            len,
        }
    }
}

impl Iterator for ThresholdSweep {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.next >= self.len {
            return None;
        }
        let value = self.initial - f64::from(self.next) * self.step;
        self.next += 1;
        Some(value as f32)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.len - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ThresholdSweep {}

/// Find the most confident face, relaxing the confidence threshold until
/// one is found.
///
/// Returns `Ok(None)` once the sweep is exhausted. Backend errors abort the
/// sweep and propagate unchanged.
pub fn locate<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    image: &RasterImage,
    sweep: &SweepConfig,
) -> Result<Option<BoundingBox>, AnalyzerError> {
    for threshold in sweep.thresholds() {
        tracing::debug!(threshold, "attempting face detection");
        if let Some(face) = analyzer.detect(image, threshold)? {
            tracing::debug!(threshold, confidence = face.confidence, "face located");
            return Ok(Some(face));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{face, png, ScriptedAnalyzer};

    fn raster(width: u32) -> RasterImage {
        RasterImage::decode(&png(width, 100)).unwrap()
    }

    #[test]
    fn test_default_sweep_values() {
        let thresholds: Vec<f32> = SweepConfig::default().thresholds().collect();
        let expected = [0.20, 0.18, 0.16, 0.14, 0.12, 0.10, 0.08, 0.06];
        assert_eq!(thresholds.len(), expected.len());
        for (got, want) in thresholds.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_sweep_excludes_exact_floor() {
        let sweep = SweepConfig { initial: 0.2, floor: 0.1, step: 0.02 };
        assert_eq!(sweep.thresholds().len(), 5);
        assert!(sweep.thresholds().all(|t| t > 0.1 + 1e-6));
    }

    #[test]
    fn test_degenerate_sweeps_are_empty() {
        assert_eq!(SweepConfig { initial: 0.05, floor: 0.05, step: 0.02 }.thresholds().count(), 0);
        assert_eq!(SweepConfig { initial: 0.2, floor: 0.05, step: 0.0 }.thresholds().count(), 0);
        assert_eq!(SweepConfig { initial: 0.2, floor: 0.05, step: -0.1 }.thresholds().count(), 0);
    }

    #[test]
    fn test_locate_strict_hit_stops_immediately() {
        let hit = face(10.0, 10.0, 50.0, 50.0, 0.9);
        let mut analyzer = ScriptedAnalyzer::default().with_face(200, hit, vec![1.0]);
        let found = locate(&mut analyzer, &raster(200), &SweepConfig::default()).unwrap();
        assert_eq!(found.unwrap().confidence, 0.9);
        assert_eq!(analyzer.detect_calls.len(), 1);
    }

    #[test]
    fn test_locate_relaxes_until_found() {
        let hit = face(10.0, 10.0, 50.0, 50.0, 0.13);
        let mut analyzer = ScriptedAnalyzer::default().with_face(200, hit, vec![1.0]);
        let found = locate(&mut analyzer, &raster(200), &SweepConfig::default()).unwrap();
        assert!(found.is_some());
        // 0.20, 0.18, 0.16, 0.14 miss; 0.12 hits.
        assert_eq!(analyzer.thresholds_for(200).len(), 5);
    }

    #[test]
    fn test_locate_exhausts_sweep() {
        let hit = face(10.0, 10.0, 50.0, 50.0, 0.04);
        let mut analyzer = ScriptedAnalyzer::default().with_face(200, hit, vec![1.0]);
        let found = locate(&mut analyzer, &raster(200), &SweepConfig::default()).unwrap();
        assert!(found.is_none());
        assert_eq!(analyzer.detect_calls.len(), 8);
    }

    #[test]
    fn test_locate_propagates_backend_error() {
        let mut analyzer = ScriptedAnalyzer { fail_detect: true, ..Default::default() };
        let result = locate(&mut analyzer, &raster(200), &SweepConfig::default());
        assert!(matches!(result, Err(AnalyzerError::Backend(_))));
        assert_eq!(analyzer.detect_calls.len(), 1);
    }
}
