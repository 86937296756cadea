//! Generic `Camera` and `Detector` traits for the image side of the pipeline.

use tagloc_types::{CameraExtrinsics, Detection, LocalizationError};

/// A raw image frame returned by a camera driver.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw pixel data (greyscale, row-major).
    pub data: Vec<u8>,
    /// Capture time on the process clock ([`tagloc_types::clock::now_ns`]).
    pub timestamp_ns: u64,
}

/// A camera or image-capture device.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Acquire the device.  Called again after every soft restart.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizationError::TransientDevice`] when the device cannot
    /// be opened.
    fn open(&mut self) -> Result<(), LocalizationError>;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`LocalizationError::TransientDevice`] if the frame cannot be
    /// captured (e.g. the device is disconnected or the buffer is
    /// unavailable).
    fn capture(&mut self) -> Result<CameraFrame, LocalizationError>;

    /// Release the device.  Must be safe to call on a camera that never
    /// opened.
    fn close(&mut self);
}

/// Finds tags in a frame and solves their pose relative to the camera.
pub trait Detector: Send {
    /// # Errors
    ///
    /// Returns [`LocalizationError::TransientDevice`] when detection itself
    /// fails; an empty `Vec` simply means no tags were seen.
    fn detect(
        &mut self,
        frame: &CameraFrame,
        camera: &CameraExtrinsics,
    ) -> Result<Vec<Detection>, LocalizationError>;
}
