//! Detector output and static per-camera calibration.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::candidate::PixelCoords;
use crate::pose::RigidPose;

/// One pose solution for a detected tag, expressed in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSolution {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub reprojection_error: f64,
}

impl PoseSolution {
    pub fn new(pose: RigidPose, reprojection_error: f64) -> Self {
        Self {
            rotation: pose.rotation,
            translation: pose.translation,
            reprojection_error,
        }
    }

    pub fn pose(&self) -> RigidPose {
        RigidPose::new(self.rotation, self.translation)
    }
}

/// A single tag seen in a single frame.
///
/// Planar markers are ambiguous, so the detector may report a second solution
/// with its own reprojection error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub tag_id: u32,
    pub primary: PoseSolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative: Option<PoseSolution>,
    #[serde(default)]
    pub pixels: PixelCoords,
}

impl Detection {
    /// The primary solution followed by the alternative, if any.
    pub fn solutions(&self) -> impl Iterator<Item = &PoseSolution> {
        std::iter::once(&self.primary).chain(self.alternative.as_ref())
    }
}

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Static mounting of a camera on the robot plus what the detector needs to
/// recover metric poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraExtrinsics {
    pub camera_id: u32,
    pub name: String,
    /// Camera frame → robot frame.
    pub mount: RigidPose,
    pub intrinsics: CameraIntrinsics,
    /// Physical tag edge length in metres.
    pub tag_size: f64,
}
