//! Five-point face alignment for ArcFace.
//!
//! Fits a similarity transform (scale, rotation, translation) from the
//! detected landmarks onto the InsightFace 112×112 template and warps the
//! face into that canonical chip.

use crate::raster::RasterImage;
use image::{Rgb, RgbImage};

/// Output side of an aligned chip.
pub const CHIP_SIZE: u32 = 112;

/// InsightFace landmark template for a 112×112 chip: eyes, nose tip, mouth corners.
pub const TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`.
    ///
    /// Returns `None` when the source points coincide.
    pub fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f64;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts
                .iter()
                .fold((0.0, 0.0), |(x, y), &(px, py)| (x + px as f64, y + py as f64));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let (mut dot, mut cross, mut spread) = (0.0, 0.0, 0.0);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx as f64 - smx, sy as f64 - smy);
            let (dx, dy) = (dx as f64 - dmx, dy as f64 - dmy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            spread += sx * sx + sy * sy;
        }
        if spread < 1e-9 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Inverse mapping, used to sample the source for each output pixel.
    fn invert(&self) -> Self {
        let det = self.a * self.a + self.b * self.b;
        let (a, b) = (self.a / det, -self.b / det);
        Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        }
    }
}

/// Warp the face described by `landmarks` into a [`CHIP_SIZE`] square chip.
///
/// Pixels that fall outside the source image are black.
pub fn align_face(image: &RasterImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let inverse = Similarity::fit(landmarks, &TEMPLATE_112)?.invert();
    let src = image.pixels();
    let (w, h) = (src.width() as i64, src.height() as i64);

    let texel = |x: i64, y: i64, c: usize| -> f64 {
        if x >= 0 && y >= 0 && x < w && y < h {
            src.get_pixel(x as u32, y as u32)[c] as f64
        } else {
            0.0
        }
    };

    Some(RgbImage::from_fn(CHIP_SIZE, CHIP_SIZE, |ox, oy| {
        let (sx, sy) = inverse.apply(ox as f64, oy as f64);
        let (x0, y0) = (sx.floor() as i64, sy.floor() as i64);
        let (fx, fy) = (sx - x0 as f64, sy - y0 as f64);

        Rgb(std::array::from_fn(|c| {
            let top = texel(x0, y0, c) * (1.0 - fx) + texel(x0 + 1, y0, c) * fx;
            let bottom = texel(x0, y0 + 1, c) * (1.0 - fx) + texel(x0 + 1, y0 + 1, c) * fx;
            (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
        }))
    }))
}
