//! kycface-core — live-vs-reference face verification.
//!
//! Locates the best face in each image with an adaptive confidence sweep,
//! rejects implausible face geometry, and grades the descriptor distance
//! into confidence tiers. SCRFD detection and ArcFace embeddings run on
//! ONNX Runtime behind the [`FaceAnalyzer`] seam.

pub mod alignment;
pub mod analyzer;
pub mod comparator;
pub mod detector;
pub mod filter;
pub mod locator;
pub mod pipeline;
pub mod raster;
pub mod recognizer;
pub mod report;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use comparator::{
    Comparator, ComparisonResult, ComparisonUnavailable, ConfidenceTier, EuclideanComparator,
    TierThresholds,
};
pub use filter::GeometryBounds;
pub use locator::SweepConfig;
pub use pipeline::{
    ConfigError, ExtractionFailure, ExtractionResult, Pipeline, PipelineConfig, SideStatus,
    VerificationOutcome,
};
pub use raster::RasterImage;
pub use report::{GuidanceReport, VerificationReport};
pub use types::{BoundingBox, Detection, Embedding};
