//! Detector adapter seam between the pipeline and a face model backend.

use crate::detector::{DetectorError, FaceDetector};
use crate::raster::RasterImage;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("analyzer backend error: {0}")]
    Backend(String),
}

/// Face detection and embedding backend.
///
/// Implementations own their model weights; an instance must be fully
/// loaded before it is handed to the pipeline.
pub trait FaceAnalyzer {
    /// Return the single most confident face scoring at least
    /// `min_confidence`, or `None` when nothing qualifies.
    fn detect(
        &mut self,
        image: &RasterImage,
        min_confidence: f32,
    ) -> Result<Option<BoundingBox>, AnalyzerError>;

    /// Compute the identity descriptor for a face returned by [`detect`](Self::detect).
    fn embed(
        &mut self,
        image: &RasterImage,
        face: &BoundingBox,
    ) -> Result<Embedding, AnalyzerError>;
}

/// SCRFD detection plus ArcFace embedding, both on ONNX Runtime.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    pub const DETECTOR_MODEL: &'static str = "det_10g.onnx";
    pub const RECOGNIZER_MODEL: &'static str = "w600k_r50.onnx";

    /// Load both models from `model_dir`. Fails if either file is missing.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector_path = model_dir.join(Self::DETECTOR_MODEL);
        let recognizer_path = model_dir.join(Self::RECOGNIZER_MODEL);

        let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&recognizer_path.to_string_lossy())?;

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(
        &mut self,
        image: &RasterImage,
        min_confidence: f32,
    ) -> Result<Option<BoundingBox>, AnalyzerError> {
        let faces = self.detector.detect(image, min_confidence)?;
        Ok(faces.into_iter().next())
    }

    fn embed(
        &mut self,
        image: &RasterImage,
        face: &BoundingBox,
    ) -> Result<Embedding, AnalyzerError> {
        Ok(self.recognizer.embed(image, face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_models_fails_closed() {
        let dir = Path::new("/nonexistent/kycface-models");
        let err = OnnxFaceAnalyzer::load(dir).err().expect("missing models must not load");
        assert!(matches!(err, AnalyzerError::Detector(DetectorError::ModelNotFound(_))));
    }
}
