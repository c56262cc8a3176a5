//! kycface-hw — camera capture and the timed capture session.
//!
//! Provides V4L2-based camera access, JPEG encoding of captured frames, and
//! the countdown scheduler that forces a single capture at its deadline.

pub mod camera;
pub mod frame;
pub mod scheduler;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, Resolution};
pub use frame::{is_dark_frame, Frame, DARK_FRAME_FRACTION, SUBMIT_JPEG_QUALITY};
pub use scheduler::{
    CaptureEvent, CaptureHandle, CaptureSession, CaptureState, FaceBox, FrameSource,
    SchedulerConfig, VerificationClient,
};
