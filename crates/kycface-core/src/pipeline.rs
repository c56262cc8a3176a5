//! Face extraction and live-vs-reference verification.
//!
//! A [`Pipeline`] holds only immutable configuration, so one instance can
//! serve any number of concurrent requests; each caller brings its own
//! [`FaceAnalyzer`].

use crate::analyzer::FaceAnalyzer;
use crate::comparator::{
    Comparator, ComparisonResult, ComparisonUnavailable, EuclideanComparator, TierThresholds,
};
use crate::filter::{self, GeometryBounds, Rejection};
use crate::locator::{self, SweepConfig};
use crate::raster::RasterImage;
use crate::types::Detection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sweep step must be positive (got {0})")]
    NonPositiveStep(f32),
    #[error("sweep floor {floor} must be below the initial threshold {initial}")]
    FloorAboveInitial { initial: f32, floor: f32 },
    #[error("face ratio bounds must satisfy 0 <= min < max (got {min}..{max})")]
    InvalidRatioBounds { min: f64, max: f64 },
    #[error("tier thresholds must satisfy low <= medium <= high (got {low}/{medium}/{high})")]
    UnorderedTiers { low: f64, medium: f64, high: f64 },
}

/// Tunables for the whole pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sweep: SweepConfig,
    pub geometry: GeometryBounds,
    pub tiers: TierThresholds,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let SweepConfig { initial, floor, step } = self.sweep;
        if step.is_nan() || step <= 0.0 {
            return Err(ConfigError::NonPositiveStep(step));
        }
        if floor.is_nan() || initial.is_nan() || floor >= initial {
            return Err(ConfigError::FloorAboveInitial { initial, floor });
        }

        let GeometryBounds { min_face_ratio: min, max_face_ratio: max } = self.geometry;
        if !(min >= 0.0 && min < max) {
            return Err(ConfigError::InvalidRatioBounds { min, max });
        }

        let TierThresholds { high, medium, low } = self.tiers;
        if !(low <= medium && medium <= high) {
            return Err(ConfigError::UnorderedTiers { low, medium, high });
        }
        Ok(())
    }
}

/// Why a face could not be extracted from one image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionFailure {
    #[error("could not decode image: {0}")]
    DecodeFailure(String),
    #[error("No face detected in image after multiple attempts")]
    NoFaceDetected,
    #[error("Face is too small in the image")]
    FaceTooSmall { ratio: f64 },
    #[error("Face is too large in the image")]
    FaceTooLarge { ratio: f64 },
    #[error("face analysis failed: {0}")]
    AnalyzerFailure(String),
}

impl ExtractionFailure {
    /// Stable machine-readable identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DecodeFailure(_) => "decode_failure",
            Self::NoFaceDetected => "no_face_detected",
            Self::FaceTooSmall { .. } => "face_too_small",
            Self::FaceTooLarge { .. } => "face_too_large",
            Self::AnalyzerFailure(_) => "analyzer_failure",
        }
    }
}

impl From<Rejection> for ExtractionFailure {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::TooSmall { ratio } => Self::FaceTooSmall { ratio },
            Rejection::TooLarge { ratio } => Self::FaceTooLarge { ratio },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    Success(Detection),
    Failure(ExtractionFailure),
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Self::Success(detection) => Some(detection),
            Self::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ExtractionFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }
}

/// Where one side of a verification ended up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SideStatus<'a> {
    NotAttempted,
    Extracted(&'a Detection),
    Failed(&'a ExtractionFailure),
}

/// Result of one verification request.
///
/// The three shapes mirror the request's terminal paths, so "the live
/// capture was unusable" can never be confused with "the faces differ".
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// Live extraction failed; the reference image was not examined.
    LiveRejected { live: ExtractionFailure },
    /// Live face found, reference extraction failed.
    ReferenceRejected {
        live: Detection,
        reference: ExtractionFailure,
    },
    /// Both faces found and compared.
    Compared {
        live: Detection,
        reference: Detection,
        comparison: ComparisonResult,
    },
}

impl VerificationOutcome {
    /// True when both faces were extracted and compared, whatever the score.
    pub fn success(&self) -> bool {
        matches!(self, Self::Compared { .. })
    }

    pub fn is_match(&self) -> bool {
        self.comparison().is_some_and(|c| c.is_match)
    }

    pub fn comparison(&self) -> Option<&ComparisonResult> {
        match self {
            Self::Compared { comparison, .. } => Some(comparison),
            _ => None,
        }
    }

    pub fn live_extraction(&self) -> SideStatus<'_> {
        match self {
            Self::LiveRejected { live } => SideStatus::Failed(live),
            Self::ReferenceRejected { live, .. } | Self::Compared { live, .. } => {
                SideStatus::Extracted(live)
            }
        }
    }

    pub fn reference_extraction(&self) -> SideStatus<'_> {
        match self {
            Self::LiveRejected { .. } => SideStatus::NotAttempted,
            Self::ReferenceRejected { reference, .. } => SideStatus::Failed(reference),
            Self::Compared { reference, .. } => SideStatus::Extracted(reference),
        }
    }
}

pub struct Pipeline<C = EuclideanComparator> {
    config: PipelineConfig,
    comparator: C,
}

impl Pipeline<EuclideanComparator> {
    /// Build a pipeline comparing by Euclidean distance with `config.tiers`.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::with_comparator(config, EuclideanComparator::new(config.tiers))
    }
}

impl<C: Comparator> Pipeline<C> {
    pub fn with_comparator(config: PipelineConfig, comparator: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, comparator })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Decode `image_bytes`, locate the best face, check its geometry and
    /// embed it.
    ///
    /// Every failure, including backend errors, comes back as
    /// [`ExtractionResult::Failure`].
    pub fn extract<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
        image_bytes: &[u8],
    ) -> ExtractionResult {
        let image = match RasterImage::decode(image_bytes) {
            Ok(image) => image,
            Err(e) => {
                tracing::info!(error = %e, bytes = image_bytes.len(), "image decode failed");
                return ExtractionResult::Failure(ExtractionFailure::DecodeFailure(e.to_string()));
            }
        };

        let face = match locator::locate(analyzer, &image, &self.config.sweep) {
            Ok(Some(face)) => face,
            Ok(None) => {
                tracing::info!(
                    width = image.width(),
                    height = image.height(),
                    "no face found in sweep"
                );
                return ExtractionResult::Failure(ExtractionFailure::NoFaceDetected);
            }
            Err(e) => {
                tracing::warn!(error = %e, "face detection backend failed");
                return ExtractionResult::Failure(ExtractionFailure::AnalyzerFailure(e.to_string()));
            }
        };

        let geometry = &self.config.geometry;
        if let Err(rejection) = filter::validate(&face, image.width(), image.height(), geometry) {
            tracing::info!(
                ?rejection,
                confidence = face.confidence,
                "face rejected by geometry filter"
            );
            return ExtractionResult::Failure(rejection.into());
        }

        match analyzer.embed(&image, &face) {
            Ok(embedding) => {
                tracing::info!(
                    confidence = face.confidence,
                    dim = embedding.dim(),
                    "face extracted"
                );
                ExtractionResult::Success(Detection { face, embedding })
            }
            Err(e) => {
                tracing::warn!(error = %e, "face embedding backend failed");
                ExtractionResult::Failure(ExtractionFailure::AnalyzerFailure(e.to_string()))
            }
        }
    }

    /// Verify that the live image shows the same person as the reference.
    ///
    /// The reference is only examined once the live face is extracted, and
    /// the comparator only runs once both are. The only error is a
    /// descriptor dimension mismatch, which indicates misconfiguration.
    pub fn verify<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
        live_image: &[u8],
        reference_image: &[u8],
    ) -> Result<VerificationOutcome, ComparisonUnavailable> {
        let live = match self.extract(analyzer, live_image) {
            ExtractionResult::Success(detection) => detection,
            ExtractionResult::Failure(live) => {
                tracing::info!(reason = %live, "verify: live extraction failed");
                return Ok(VerificationOutcome::LiveRejected { live });
            }
        };

        let reference = match self.extract(analyzer, reference_image) {
            ExtractionResult::Success(detection) => detection,
            ExtractionResult::Failure(reference) => {
                tracing::info!(reason = %reference, "verify: reference extraction failed");
                return Ok(VerificationOutcome::ReferenceRejected { live, reference });
            }
        };

        let comparison = self.comparator.compare(&live.embedding, &reference.embedding)?;
        Ok(VerificationOutcome::Compared {
            live,
            reference,
            comparison,
        })
    }
}
