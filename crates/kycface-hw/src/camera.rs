//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, SUBMIT_JPEG_QUALITY};
use crate::scheduler::FrameSource;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    Busy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("frame conversion failed: {0}")]
    Frame(#[from] frame::FrameError),
}

impl CameraError {
    /// Message suitable for showing to the person in front of the camera.
    pub fn user_message(&self) -> String {
        let hint = match self {
            Self::PermissionDenied(_) => {
                "Please ensure you have granted camera permissions \
                 (e.g. membership of the `video` group)."
            }
            Self::Unavailable(_) => {
                "No camera device found. Please check if your camera is properly connected."
            }
            Self::Busy => {
                "Your camera is in use by another application. \
                 Please close other applications using the camera."
            }
            _ => "Please check your camera settings and try again.",
        };
        format!("Failed to access camera. {hint}")
    }
}

/// Preferred capture size requested from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Frames discarded after the stream starts, while auto-exposure settles.
pub const WARMUP_FRAMES: usize = 4;

/// Extra frames tried when a capture comes back dark.
pub const DARK_FRAME_RETRIES: usize = 5;

/// V4L2 camera device handle. Dropping it stops the stream and releases the
/// device.
pub struct Camera {
    // Declared before `device` so the stream is torn down first.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera and negotiate a format as close to `preferred` as
    /// the driver allows.
    pub fn open(device_path: &str, preferred: Resolution) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::Unavailable(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
            _ if e.raw_os_error() == Some(16) => CameraError::Busy, // EBUSY
            _ => CameraError::Unavailable(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::Unavailable(format!("{device_path} cannot capture video")));
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = preferred.width;
        fmt.height = preferred.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Capture a single RGB frame.
    ///
    /// The first call starts streaming and discards [`WARMUP_FRAMES`]. Dark
    /// frames are retaken up to [`DARK_FRAME_RETRIES`] times; if the scene
    /// stays dark the last frame is returned anyway.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let mut frame = self.next_frame()?;
        let mut retries = 0;
        while frame.is_dark() && retries < DARK_FRAME_RETRIES {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            retries += 1;
            frame = self.next_frame()?;
        }
        if frame.is_dark() {
            tracing::warn!(
                device = %self.device_path,
                retries,
                "scene still dark, using last frame"
            );
        }
        Ok(frame)
    }

    fn stream(&mut self) -> Result<&mut MmapStream<'static>, CameraError> {
        if self.stream.is_none() {
            let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
                .map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;
            for _ in 0..WARMUP_FRAMES {
                stream
                    .next()
                    .map_err(|e| CameraError::CaptureFailed(format!("warmup frame: {e}")))?;
            }
            tracing::debug!(
                device = %self.device_path,
                discarded = WARMUP_FRAMES,
                "stream started"
            );
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| CameraError::CaptureFailed("stream not started".into()))
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (pixel_format, width, height) = (self.pixel_format, self.width, self.height);
        let (buf, meta) = self
            .stream()?
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let (data, width, height) = match pixel_format {
            PixelFormat::Yuyv => (frame::yuyv_to_rgb(buf, width, height)?, width, height),
            PixelFormat::Grey => (frame::grey_to_rgb(buf, width, height)?, width, height),
            PixelFormat::Mjpeg => {
                let used = (meta.bytesused as usize).min(buf.len());
                let rgb = image::load_from_memory(&buf[..used])
                    .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}")))?
                    .to_rgb8();
                let (w, h) = rgb.dimensions();
                (rgb.into_raw(), w, h)
            }
        };

        Ok(Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

impl FrameSource for Camera {
    fn snapshot(&mut self) -> Result<Vec<u8>, CameraError> {
        Ok(self.capture_frame()?.to_jpeg(SUBMIT_JPEG_QUALITY)?)
    }

    fn release(self) {
        tracing::info!(device = %self.device_path, "camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_is_unavailable() {
        let err = Camera::open("/dev/kycface-no-such-camera", Resolution::default())
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::Unavailable(_)));
        assert!(err.user_message().contains("No camera device found"));
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let denied = CameraError::PermissionDenied("/dev/video0".into()).user_message();
        let missing = CameraError::Unavailable("/dev/video0".into()).user_message();
        let busy = CameraError::Busy.user_message();
        assert_ne!(denied, missing);
        assert_ne!(missing, busy);
        assert!(denied.contains("permissions"));
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), None);
    }
}
