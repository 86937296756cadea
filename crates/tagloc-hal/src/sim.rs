//! Stub devices for running the full localizer headless.
//!
//! [`SimCamera`] hands out blank frames and [`ScriptedDetector`] answers each
//! frame with a canned list of detections, so the whole worker stack can be
//! exercised in tests and CI without a camera attached.
//!
//! # Example
//!
//! ```rust
//! use tagloc_hal::sim::{ScriptedDetector, SimCamera};
//! use tagloc_hal::{CameraPipeline, DetectionSource};
//! use tagloc_types::{CameraExtrinsics, CameraIntrinsics, RigidPose};
//!
//! let extrinsics = CameraExtrinsics {
//!     camera_id: 0,
//!     name: "front".into(),
//!     mount: RigidPose::identity(),
//!     intrinsics: CameraIntrinsics { fx: 600.0, fy: 600.0, cx: 320.0, cy: 240.0 },
//!     tag_size: 0.1651,
//! };
//! let mut source = CameraPipeline::new(
//!     SimCamera::new("front"),
//!     ScriptedDetector::repeating(Vec::new()),
//!     extrinsics,
//! );
//! source.open().unwrap();
//! assert!(source.next_frame().unwrap().unwrap().detections.is_empty());
//! ```

use tagloc_types::{CameraExtrinsics, Detection, LocalizationError, clock};

use crate::camera::{Camera, CameraFrame, Detector};

// ────────────────────────────────────────────────────────────────────────────
// Stub camera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera that returns a blank 4×4 greyscale frame.
///
/// Optionally fails every capture after the first `n` with a transient device
/// error, which is how tests drive the worker's restart path.
pub struct SimCamera {
    id: String,
    open: bool,
    captured: usize,
    fail_after: Option<usize>,
}

impl SimCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            open: false,
            captured: 0,
            fail_after: None,
        }
    }

    /// Fail every capture once `n` frames have been delivered since the last
    /// [`open`](Camera::open).
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Frames delivered since the last open.
    pub fn captured(&self) -> usize {
        self.captured
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self) -> Result<(), LocalizationError> {
        self.open = true;
        self.captured = 0;
        Ok(())
    }

    fn capture(&mut self) -> Result<CameraFrame, LocalizationError> {
        if !self.open {
            return Err(LocalizationError::device(&self.id, "capture on closed camera"));
        }
        if self.fail_after.is_some_and(|n| self.captured >= n) {
            return Err(LocalizationError::device(&self.id, "simulated read failure"));
        }
        self.captured += 1;
        Ok(CameraFrame {
            width: 4,
            height: 4,
            data: vec![0u8; 16],
            timestamp_ns: clock::now_ns(),
        })
    }

    fn close(&mut self) {
        self.open = false;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scripted detector
// ────────────────────────────────────────────────────────────────────────────

/// A detector that ignores the image and replays a script.
///
/// Frame `i` gets `script[i % script.len()]`; an empty script detects
/// nothing.
pub struct ScriptedDetector {
    script: Vec<Vec<Detection>>,
    next: usize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, next: 0 }
    }

    /// Report the same detections on every frame.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self::new(vec![detections])
    }
}

impl Detector for ScriptedDetector {
    fn detect(
        &mut self,
        _frame: &CameraFrame,
        _camera: &CameraExtrinsics,
    ) -> Result<Vec<Detection>, LocalizationError> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.script[self.next % self.script.len()].clone();
        self.next += 1;
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagloc_types::{CameraIntrinsics, PoseSolution, RigidPose};

    fn extrinsics() -> CameraExtrinsics {
        CameraExtrinsics {
            camera_id: 1,
            name: "rear".into(),
            mount: RigidPose::identity(),
            intrinsics: CameraIntrinsics {
                fx: 1.0,
                fy: 1.0,
                cx: 0.0,
                cy: 0.0,
            },
            tag_size: 0.1,
        }
    }

    fn detection(tag_id: u32) -> Detection {
        Detection {
            tag_id,
            primary: PoseSolution::new(RigidPose::identity(), 0.1),
            alternative: None,
            pixels: Default::default(),
        }
    }

    #[test]
    fn sim_camera_returns_blank_frame() {
        let mut cam = SimCamera::new("front");
        cam.open().unwrap();
        let frame = cam.capture().unwrap();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 4);
        assert!(frame.data.iter().all(|&b| b == 0));
        assert_eq!(cam.captured(), 1);
    }

    #[test]
    fn sim_camera_recovers_after_reopen() {
        let mut cam = SimCamera::new("front").failing_after(2);
        cam.open().unwrap();
        cam.capture().unwrap();
        cam.capture().unwrap();
        assert!(cam.capture().is_err());
        cam.close();
        cam.open().unwrap();
        assert!(cam.capture().is_ok());
    }

    #[test]
    fn scripted_detector_cycles() {
        let mut cam = SimCamera::new("rear");
        cam.open().unwrap();
        let frame = cam.capture().unwrap();
        let mut det = ScriptedDetector::new(vec![vec![detection(1)], vec![detection(2), detection(3)]]);
        let ext = extrinsics();
        let ids = |d: Vec<Detection>| d.into_iter().map(|d| d.tag_id).collect::<Vec<_>>();
        assert_eq!(ids(det.detect(&frame, &ext).unwrap()), vec![1]);
        assert_eq!(ids(det.detect(&frame, &ext).unwrap()), vec![2, 3]);
        assert_eq!(ids(det.detect(&frame, &ext).unwrap()), vec![1]);
    }

    #[test]
    fn empty_script_detects_nothing() {
        let mut det = ScriptedDetector::new(Vec::new());
        let frame = CameraFrame {
            width: 0,
            height: 0,
            data: Vec::new(),
            timestamp_ns: 0,
        };
        assert!(det.detect(&frame, &extrinsics()).unwrap().is_empty());
    }
}
