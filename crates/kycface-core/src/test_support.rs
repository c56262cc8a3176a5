//! In-memory analyzer and image fixtures for pipeline tests.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::raster::RasterImage;
use crate::types::{BoundingBox, Embedding};
use image::{ImageFormat, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;

/// Encode a flat-colour PNG of the given size.
pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([120, 110, 100]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub(crate) fn face(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width,
        height,
        confidence,
        landmarks: None,
    }
}

/// Answers detection requests from a table keyed by image width.
///
/// A scripted face is reported once the requested confidence floor drops
/// to or below its confidence, the way a real detector filters.
#[derive(Default)]
pub(crate) struct ScriptedAnalyzer {
    pub faces: HashMap<u32, (BoundingBox, Vec<f32>)>,
    pub detect_calls: Vec<(u32, f32)>,
    pub embed_calls: usize,
    pub fail_detect: bool,
}

impl ScriptedAnalyzer {
    pub fn with_face(mut self, image_width: u32, face: BoundingBox, embedding: Vec<f32>) -> Self {
        self.faces.insert(image_width, (face, embedding));
        self
    }

    pub fn thresholds_for(&self, image_width: u32) -> Vec<f32> {
        self.detect_calls
            .iter()
            .filter(|(w, _)| *w == image_width)
            .map(|(_, t)| *t)
            .collect()
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn detect(
        &mut self,
        image: &RasterImage,
        min_confidence: f32,
    ) -> Result<Option<BoundingBox>, AnalyzerError> {
        self.detect_calls.push((image.width(), min_confidence));
        if self.fail_detect {
            return Err(AnalyzerError::Backend("inference session poisoned".into()));
        }
        Ok(self
            .faces
            .get(&image.width())
            .filter(|(face, _)| face.confidence >= min_confidence)
            .map(|(face, _)| face.clone()))
    }

    fn embed(
        &mut self,
        image: &RasterImage,
        _face: &BoundingBox,
    ) -> Result<Embedding, AnalyzerError> {
        self.embed_calls += 1;
        self.faces
            .get(&image.width())
            .map(|(_, values)| Embedding::new(values.clone()))
            .ok_or_else(|| AnalyzerError::Backend("embed called without a detection".into()))
    }
}
