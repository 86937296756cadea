//! Tag → camera → robot → global coordinate chain.
//!
//! Every detection solution is walked through the frame chain and becomes a
//! [`Candidate`] carrying the pose in each frame:
//!
//! ```text
//! R_robot  = R_ext · R_tag_cam
//! T_robot  = R_ext · T_tag_cam + T_ext
//! R_global = R_AG · R_robotᵀ
//! T_global = T_AG − adj · R_global · T_robot
//! ```
//!
//! `R_ext`/`T_ext` mount the camera on the robot, `R_AG`/`T_AG` place the tag
//! on the field, and `adj` is a fixed per-deployment axis adjustment (yaw 90°
//! by default) between the detector's axis convention and the field's.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tagloc_perception::layout::TagLayout;
//! use tagloc_perception::transform::TransformPipeline;
//! use tagloc_types::{CameraExtrinsics, CameraIntrinsics, Detection, PoseSolution, RigidPose};
//!
//! let layout = Arc::new(TagLayout::from_poses([(1, RigidPose::from_translation(4.0, 0.0, 0.5))]));
//! let extrinsics = CameraExtrinsics {
//!     camera_id: 0,
//!     name: "front".into(),
//!     mount: RigidPose::identity(),
//!     intrinsics: CameraIntrinsics { fx: 600.0, fy: 600.0, cx: 320.0, cy: 240.0 },
//!     tag_size: 0.1651,
//! };
//! let pipeline = TransformPipeline::new(extrinsics, layout);
//! let detection = Detection {
//!     tag_id: 1,
//!     primary: PoseSolution::new(RigidPose::identity(), 0.02),
//!     alternative: None,
//!     pixels: Default::default(),
//! };
//! let set = pipeline.candidates(&[detection], 0);
//! assert_eq!(set.len(), 1);
//! ```

use std::sync::Arc;

use nalgebra::Matrix3;
use tagloc_types::pose::rotation_from_rpy_degrees;
use tagloc_types::{
    Candidate, CandidateFrames, CandidateSet, CameraExtrinsics, DEFAULT_TAG_CAPACITY, Detection,
    LocalizationError, PoseSolution, RigidPose,
};
use tracing::warn;

use crate::layout::TagLayout;

/// Roll/pitch/yaw (degrees) of the default detector → field axis adjustment.
pub const DEFAULT_AXIS_ADJUSTMENT_RPY: [f64; 3] = [0.0, 0.0, 90.0];

/// The default axis adjustment as a rotation matrix.
pub fn default_axis_adjustment() -> Matrix3<f64> {
    rotation_from_rpy_degrees(DEFAULT_AXIS_ADJUSTMENT_RPY)
}

// ────────────────────────────────────────────────────────────────────────────
// Pure transform
// ────────────────────────────────────────────────────────────────────────────

/// Express a camera-frame tag pose in the robot frame.
pub fn camera_to_robot(tag_in_camera: &RigidPose, mount: &RigidPose) -> RigidPose {
    RigidPose::new(
        mount.rotation * tag_in_camera.rotation,
        mount.rotation * tag_in_camera.translation + mount.translation,
    )
}

/// Recover the robot's global pose from a robot-frame tag pose and that tag's
/// known global pose.
pub fn robot_to_global(
    tag_in_robot: &RigidPose,
    tag_in_global: &RigidPose,
    adjustment: &Matrix3<f64>,
) -> RigidPose {
    let rotation = tag_in_global.rotation * tag_in_robot.transpose_rotation();
    let translation =
        tag_in_global.translation - adjustment * rotation * tag_in_robot.translation;
    RigidPose::new(rotation, translation)
}

fn candidate_from_solution(
    tag_id: u32,
    solution: &PoseSolution,
    extrinsics: &CameraExtrinsics,
    tag_in_global: &RigidPose,
    adjustment: &Matrix3<f64>,
    timestamp_ns: u64,
    detection: &Detection,
) -> Candidate {
    let camera = solution.pose();
    let robot = camera_to_robot(&camera, &extrinsics.mount);
    let global = robot_to_global(&robot, tag_in_global, adjustment);
    Candidate::new(
        tag_id,
        extrinsics.camera_id,
        timestamp_ns,
        solution.reprojection_error,
        CandidateFrames {
            tag: RigidPose::identity(),
            camera,
            robot,
            global,
        },
        detection.pixels,
    )
}

/// Turn one detection into one candidate per pose solution.
///
/// # Errors
///
/// [`LocalizationError::UnknownTag`] when the tag is not in `layout`.
pub fn transform_detection(
    detection: &Detection,
    extrinsics: &CameraExtrinsics,
    layout: &TagLayout,
    adjustment: &Matrix3<f64>,
    timestamp_ns: u64,
) -> Result<Vec<Candidate>, LocalizationError> {
    let tag_in_global = layout
        .get(detection.tag_id)
        .ok_or(LocalizationError::UnknownTag(detection.tag_id))?;

    Ok(detection
        .solutions()
        .map(|solution| {
            candidate_from_solution(
                detection.tag_id,
                solution,
                extrinsics,
                tag_in_global,
                adjustment,
                timestamp_ns,
                detection,
            )
        })
        .collect())
}

// ────────────────────────────────────────────────────────────────────────────
// TransformPipeline
// ────────────────────────────────────────────────────────────────────────────

/// Per-camera bundle of everything [`transform_detection`] needs.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    extrinsics: CameraExtrinsics,
    layout: Arc<TagLayout>,
    adjustment: Matrix3<f64>,
    capacity: usize,
}

impl TransformPipeline {
    pub fn new(extrinsics: CameraExtrinsics, layout: Arc<TagLayout>) -> Self {
        Self {
            extrinsics,
            layout,
            adjustment: default_axis_adjustment(),
            capacity: DEFAULT_TAG_CAPACITY,
        }
    }

    /// Override the detector → field axis adjustment.
    pub fn with_adjustment(mut self, adjustment: Matrix3<f64>) -> Self {
        self.adjustment = adjustment;
        self
    }

    /// Size of the [`CandidateSet`]s produced; must match the fusion engine.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn extrinsics(&self) -> &CameraExtrinsics {
        &self.extrinsics
    }

    /// Convert a whole frame of detections.
    ///
    /// Unknown or out-of-range tags are logged and dropped; the rest of the
    /// frame still goes through.
    pub fn candidates(&self, detections: &[Detection], timestamp_ns: u64) -> CandidateSet {
        let mut set = CandidateSet::with_capacity(self.capacity);
        for detection in detections {
            let candidates = match transform_detection(
                detection,
                &self.extrinsics,
                &self.layout,
                &self.adjustment,
                timestamp_ns,
            ) {
                Ok(c) => c,
                Err(e) => {
                    warn!(camera = %self.extrinsics.name, error = %e, "discarding detection");
                    continue;
                }
            };
            for candidate in candidates {
                if let Err(e) = set.add(candidate) {
                    warn!(camera = %self.extrinsics.name, error = %e, "discarding candidate");
                }
            }
        }
        set
    }
}
