//! Captured frames and their conversion to submittable JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// JPEG quality used for every submitted frame.
pub const SUBMIT_JPEG_QUALITY: u8 = 95;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Encode the frame as JPEG for submission to the verifier.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let expected = rgb_len(self.width, self.height);
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality).encode(
            &self.data[..expected],
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }
}

/// Fraction of dark pixels above which a frame is retaken.
pub const DARK_FRAME_FRACTION: f32 = 0.95;

/// Pixels darker than this luma count as dark.
const DARK_LUMA: u32 = 32;

/// True when more than `threshold` (a fraction) of the RGB pixels are dark,
/// as with a covered lens or an exposure that has not settled yet.
pub fn is_dark_frame(rgb: &[u8], threshold: f32) -> bool {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return true;
    }
    let dark = rgb
        .chunks_exact(3)
        .filter(|p| (299 * p[0] as u32 + 587 * p[1] as u32 + 114 * p[2] as u32) / 1000 < DARK_LUMA)
        .count();
    dark as f32 / pixels as f32 > threshold
}

impl Frame {
    pub fn is_dark(&self) -> bool {
        is_dark_frame(&self.data, DARK_FRAME_FRACTION)
    }
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// Each 4-byte group `[Y0, U, Y1, V]` yields two pixels sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(rgb_len(width, height));
    for group in yuyv[..expected].chunks_exact(4) {
        let u = group[1] as f32 - 128.0;
        let v = group[3] as f32 - 128.0;
        for y in [group[0], group[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].iter().flat_map(|&p| [p, p, p]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        assert_eq!(grey_to_rgb(&[7, 9], 2, 1).unwrap(), vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn test_to_jpeg_produces_decodable_image() {
        let jpeg = frame(16, 8, vec![180; 16 * 8 * 3]).to_jpeg(SUBMIT_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[10; 30], DARK_FRAME_FRACTION));
        assert!(is_dark_frame(&[], DARK_FRAME_FRACTION));
        assert!(!is_dark_frame(&[120; 30], DARK_FRAME_FRACTION));

        // Dim red still has luma below the cut; saturated green does not.
        assert!(is_dark_frame(&[90, 0, 0], DARK_FRAME_FRACTION));
        assert!(!is_dark_frame(&[0, 90, 0], DARK_FRAME_FRACTION));

        // 19 of 20 dark pixels is exactly 95%, not above it.
        let mut mostly_dark = vec![0u8; 20 * 3];
        mostly_dark[..3].copy_from_slice(&[200, 200, 200]);
        assert!(!is_dark_frame(&mostly_dark, DARK_FRAME_FRACTION));
        assert!(frame(4, 5, vec![5; 60]).is_dark());
    }

    #[test]
    fn test_to_jpeg_short_buffer() {
        assert!(frame(4, 4, vec![0; 10]).to_jpeg(SUBMIT_JPEG_QUALITY).is_err());
    }
}
