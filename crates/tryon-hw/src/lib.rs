//! tryon-hw: hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access that yields RGB frames, and the
//! [`FrameSource`] seam the session reads frames through.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraConstraints, CameraError, CameraStream, FacingMode, PixelFormat};
pub use frame::Frame;

/// A live stream of frames. Dropping the source releases the device.
pub trait FrameSource: Send + 'static {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    fn dimensions(&self) -> (u32, u32);
}
