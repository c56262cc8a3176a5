//! Geometric plausibility filter for located faces.
//!
//! The bounds are deliberately loose: they reject degenerate detections
//! (texture noise, a face filling the whole frame), not imperfect framing.

use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

/// Accepted range for the face-to-image area ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryBounds {
    pub min_face_ratio: f64,
    pub max_face_ratio: f64,
}

impl Default for GeometryBounds {
    fn default() -> Self {
        Self {
            min_face_ratio: 0.001,
            max_face_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    TooSmall { ratio: f64 },
    TooLarge { ratio: f64 },
}

/// Fraction of the image area covered by `face`. Zero for an empty image.
pub fn face_ratio(face: &BoundingBox, image_width: u32, image_height: u32) -> f64 {
    let image_area = f64::from(image_width) * f64::from(image_height);
    if image_area > 0.0 {
        face.area() / image_area
    } else {
        0.0
    }
}

/// Check that `face` covers a plausible share of the image.
///
/// The detector's confidence plays no part in the decision.
pub fn validate(
    face: &BoundingBox,
    image_width: u32,
    image_height: u32,
    bounds: &GeometryBounds,
) -> Result<(), Rejection> {
    let ratio = face_ratio(face, image_width, image_height);
    if ratio < bounds.min_face_ratio {
        return Err(Rejection::TooSmall { ratio });
    }
    if ratio > bounds.max_face_ratio {
        return Err(Rejection::TooLarge { ratio });
    }
    Ok(())
}
