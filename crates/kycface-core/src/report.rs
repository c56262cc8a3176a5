//! JSON-facing views of pipeline results.

use crate::comparator::{ConfidenceTier, TierThresholds};
use crate::pipeline::{ExtractionResult, SideStatus, VerificationOutcome};
use serde::Serialize;

const MSG_MATCH: &str = "Face verification successful";
const MSG_NO_MATCH: &str = "Face verification failed - faces do not match";
const MSG_LIVE_FAILED: &str =
    "Could not detect face in live image. Please ensure your face is clearly visible.";
const MSG_REFERENCE_FAILED: &str = "Could not detect face in reference photo. Please try again.";

/// Per-image extraction diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideReport {
    pub attempted: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

impl From<SideStatus<'_>> for SideReport {
    fn from(status: SideStatus<'_>) -> Self {
        match status {
            SideStatus::NotAttempted => Self {
                attempted: false,
                success: false,
                confidence: None,
                error: None,
                error_code: None,
            },
            SideStatus::Extracted(detection) => Self {
                attempted: true,
                success: true,
                confidence: Some(detection.confidence()),
                error: None,
                error_code: None,
            },
            SideStatus::Failed(failure) => Self {
                attempted: true,
                success: false,
                confidence: None,
                error: Some(failure.to_string()),
                error_code: Some(failure.code()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionDetails {
    pub live: SideReport,
    pub reference: SideReport,
}

/// Wire form of a [`VerificationOutcome`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub success: bool,
    #[serde(rename = "match")]
    pub is_match: bool,
    /// Similarity as a 0–1 fraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    /// Similarity formatted as a percentage, e.g. `"90.00%"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_percentage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<ConfidenceTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<TierThresholds>,
    pub extraction_details: ExtractionDetails,
    pub message: String,
}

impl From<&VerificationOutcome> for VerificationReport {
    fn from(outcome: &VerificationOutcome) -> Self {
        let comparison = outcome.comparison();
        let message = match outcome {
            VerificationOutcome::LiveRejected { .. } => MSG_LIVE_FAILED,
            VerificationOutcome::ReferenceRejected { .. } => MSG_REFERENCE_FAILED,
            VerificationOutcome::Compared { comparison, .. } if comparison.is_match => MSG_MATCH,
            VerificationOutcome::Compared { .. } => MSG_NO_MATCH,
        };

        Self {
            success: outcome.success(),
            is_match: outcome.is_match(),
            similarity: comparison.map(|c| c.similarity()),
            similarity_percentage: comparison.map(|c| format!("{:.2}%", c.similarity_percentage)),
            confidence_level: comparison.map(|c| c.confidence_tier),
            thresholds: comparison.map(|c| c.thresholds),
            extraction_details: ExtractionDetails {
                live: outcome.live_extraction().into(),
                reference: outcome.reference_extraction().into(),
            },
            message: message.to_string(),
        }
    }
}

/// Face box in image pixels, for on-screen guidance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceBoxReport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Wire form of an advisory face lookup on a single frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuidanceReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceBoxReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ExtractionResult> for GuidanceReport {
    fn from(result: &ExtractionResult) -> Self {
        match result {
            ExtractionResult::Success(detection) => Self {
                success: true,
                face: Some(FaceBoxReport {
                    x: detection.face.x,
                    y: detection.face.y,
                    width: detection.face.width,
                    height: detection.face.height,
                }),
                confidence: Some(detection.confidence()),
                error: None,
            },
            ExtractionResult::Failure(failure) => Self {
                success: false,
                face: None,
                confidence: None,
                error: Some(failure.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{Comparator, EuclideanComparator};
    use crate::pipeline::ExtractionFailure;
    use crate::test_support::face;
    use crate::types::{Detection, Embedding};
    use serde_json::json;

    fn detection(values: Vec<f32>, confidence: f32) -> Detection {
        Detection {
            face: face(10.0, 20.0, 100.0, 120.0, confidence),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_compared_report_shape() {
        let live = detection(vec![0.0, 0.0], 0.9);
        let reference = detection(vec![0.1, 0.0], 0.7);
        let comparison = EuclideanComparator::default()
            .compare(&live.embedding, &reference.embedding)
            .unwrap();
        let outcome = VerificationOutcome::Compared { live, reference, comparison };

        let value = serde_json::to_value(VerificationReport::from(&outcome)).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["match"], json!(true));
        assert_eq!(value["similarityPercentage"], json!("90.00%"));
        assert!((value["similarity"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert_eq!(value["confidenceLevel"], json!("high"));
        assert_eq!(value["thresholds"], json!({"high": 45.0, "medium": 35.0, "low": 25.0}));
        assert_eq!(value["extractionDetails"]["live"]["success"], json!(true));
        assert!(value["extractionDetails"]["reference"]["confidence"].as_f64().is_some());
        assert_eq!(value["message"], json!(MSG_MATCH));
    }

    #[test]
    fn test_live_rejected_report_shape() {
        let outcome = VerificationOutcome::LiveRejected {
            live: ExtractionFailure::NoFaceDetected,
        };
        let value = serde_json::to_value(VerificationReport::from(&outcome)).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["match"], json!(false));
        assert!(value.get("similarity").is_none());
        assert!(value.get("confidenceLevel").is_none());
        assert_eq!(
            value["extractionDetails"]["live"],
            json!({
                "attempted": true,
                "success": false,
                "error": "No face detected in image after multiple attempts",
                "errorCode": "no_face_detected",
            })
        );
        assert_eq!(
            value["extractionDetails"]["reference"],
            json!({"attempted": false, "success": false})
        );
        assert_eq!(value["message"], json!(MSG_LIVE_FAILED));
    }

    #[test]
    fn test_reference_rejected_message() {
        let outcome = VerificationOutcome::ReferenceRejected {
            live: detection(vec![0.0], 0.8),
            reference: ExtractionFailure::FaceTooLarge { ratio: 0.95 },
        };
        let report = VerificationReport::from(&outcome);
        assert_eq!(report.message, MSG_REFERENCE_FAILED);
        assert_eq!(report.extraction_details.reference.error_code, Some("face_too_large"));
        assert!(report.extraction_details.live.success);
    }

    #[test]
    fn test_guidance_report() {
        let found = GuidanceReport::from(&ExtractionResult::Success(detection(vec![1.0], 0.66)));
        let value = serde_json::to_value(&found).unwrap();
        assert_eq!(value["face"], json!({"x": 10.0, "y": 20.0, "width": 100.0, "height": 120.0}));

        let no_face = ExtractionResult::Failure(ExtractionFailure::NoFaceDetected);
        let missing = GuidanceReport::from(&no_face);
        assert!(!missing.success);
        assert!(missing.face.is_none());
    }
}
