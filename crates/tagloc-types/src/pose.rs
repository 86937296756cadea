//! Rigid-body poses and the robot pose value published to consumers.
//!
//! A [`RigidPose`] is a rotation matrix plus a translation vector.  The
//! arithmetic operators are element-wise on both parts and exist only so that
//! a handful of poses can be averaged; they never re-orthonormalize the
//! rotation, so the result of `(a + b) / 2.0` is only approximately a rotation
//! when `a` and `b` are close.

use std::ops::{Add, AddAssign, Div, Mul, Sub};

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// RigidPose
// ────────────────────────────────────────────────────────────────────────────

/// A rotation (3×3, nominally orthonormal) and a translation (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidPose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl Default for RigidPose {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidPose {
    /// Create a pose from a rotation matrix and a translation.
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Identity rotation, zero translation.
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    /// All-zero rotation and translation.  Used as the accumulator seed when
    /// summing poses.
    pub fn zero() -> Self {
        Self::new(Matrix3::zeros(), Vector3::zeros())
    }

    /// Pure translation with identity rotation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self::new(Matrix3::identity(), Vector3::new(x, y, z))
    }

    /// Build a pose from a translation and roll/pitch/yaw in degrees.
    pub fn from_rpy_degrees(translation: Vector3<f64>, rpy: [f64; 3]) -> Self {
        Self::new(rotation_from_rpy_degrees(rpy), translation)
    }

    /// Roll, pitch and yaw of the rotation part, in degrees.
    pub fn rpy_degrees(&self) -> [f64; 3] {
        rpy_degrees_from_rotation(&self.rotation)
    }

    /// The transpose of the rotation part.  Equals the inverse for an
    /// orthonormal rotation.
    pub fn transpose_rotation(&self) -> Matrix3<f64> {
        self.rotation.transpose()
    }
}

impl Add for RigidPose {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.rotation + rhs.rotation,
            self.translation + rhs.translation,
        )
    }
}

impl AddAssign for RigidPose {
    fn add_assign(&mut self, rhs: Self) {
        self.rotation += rhs.rotation;
        self.translation += rhs.translation;
    }
}

impl Sub for RigidPose {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.rotation - rhs.rotation,
            self.translation - rhs.translation,
        )
    }
}

impl Mul<f64> for RigidPose {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.rotation * rhs, self.translation * rhs)
    }
}

impl Div<f64> for RigidPose {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::new(self.rotation / rhs, self.translation / rhs)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Euler helpers
// ────────────────────────────────────────────────────────────────────────────

/// Rotation matrix from roll, pitch, yaw in degrees (`R = Rz · Ry · Rx`).
pub fn rotation_from_rpy_degrees(rpy: [f64; 3]) -> Matrix3<f64> {
    let [roll, pitch, yaw] = rpy.map(f64::to_radians);
    Rotation3::from_euler_angles(roll, pitch, yaw).into_inner()
}

/// Roll, pitch, yaw in degrees from a rotation matrix.
///
/// At gimbal lock (`|cos(pitch)| <= 1e-6`) roll is pinned to zero and the
/// whole rotation about the vertical axis is reported as yaw.
pub fn rpy_degrees_from_rotation(r: &Matrix3<f64>) -> [f64; 3] {
    let pitch = (-r[(2, 0)]).clamp(-1.0, 1.0).asin();
    let (roll, yaw) = if pitch.cos().abs() > 1e-6 {
        (r[(2, 1)].atan2(r[(2, 2)]), r[(1, 0)].atan2(r[(0, 0)]))
    } else {
        (0.0, (-r[(0, 1)]).atan2(r[(1, 1)]))
    };
    [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
}

// ────────────────────────────────────────────────────────────────────────────
// RobotPose
// ────────────────────────────────────────────────────────────────────────────

/// The filtered robot pose in the global (field) frame.
///
/// Only the global frame is meaningful; this is what the pose store hands out
/// to telemetry consumers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RobotPose {
    pub global: RigidPose,
}

impl RobotPose {
    pub fn new(global: RigidPose) -> Self {
        Self { global }
    }

    /// `[x, y, z]` in metres.
    pub fn position(&self) -> [f64; 3] {
        let t = &self.global.translation;
        [t.x, t.y, t.z]
    }

    /// `[roll, pitch, yaw]` in degrees.
    pub fn orientation_degrees(&self) -> [f64; 3] {
        self.global.rpy_degrees()
    }

    /// Flatten into the wire representation used on the pose bus.
    pub fn to_message(&self) -> PoseMessage {
        let [x, y, z] = self.position();
        let [roll, pitch, yaw] = self.orientation_degrees();
        PoseMessage {
            x,
            y,
            z,
            roll,
            pitch,
            yaw,
        }
    }
}

/// Flat `{x, y, z, roll, pitch, yaw}` pose as serialized for external
/// consumers (metres and degrees).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseMessage {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn rpy_roundtrip_away_from_gimbal_lock() {
        let r = rotation_from_rpy_degrees([10.0, 20.0, 30.0]);
        let [roll, pitch, yaw] = rpy_degrees_from_rotation(&r);
        assert_close(roll, 10.0);
        assert_close(pitch, 20.0);
        assert_close(yaw, 30.0);
    }

    #[test]
    fn yaw_90_maps_x_to_y() {
        let r = rotation_from_rpy_degrees([0.0, 0.0, 90.0]);
        let v = r * Vector3::new(1.0, 0.0, 0.0);
        assert_close(v.x, 0.0);
        assert_close(v.y, 1.0);
        assert_close(v.z, 0.0);
    }

    #[test]
    fn gimbal_lock_pins_roll_to_zero() {
        let r = rotation_from_rpy_degrees([0.0, 90.0, 0.0]);
        let [roll, pitch, _] = rpy_degrees_from_rotation(&r);
        assert_close(roll, 0.0);
        assert_close(pitch, 90.0);
    }

    #[test]
    fn averaging_two_translations() {
        let a = RigidPose::from_translation(3.0, 0.0, 0.0);
        let b = RigidPose::from_translation(5.0, 2.0, 0.0);
        let mean = (a + b) / 2.0;
        assert_close(mean.translation.x, 4.0);
        assert_close(mean.translation.y, 1.0);
        assert_eq!(mean.rotation, Matrix3::identity());
    }

    #[test]
    fn zero_is_additive_identity() {
        let p = RigidPose::from_rpy_degrees(Vector3::new(1.0, 2.0, 3.0), [5.0, 0.0, 0.0]);
        let mut acc = RigidPose::zero();
        acc += p;
        assert_eq!(acc, p);
        assert_eq!(p - p, RigidPose::zero());
        assert_eq!(p * 2.0, p + p);
    }

    #[test]
    fn robot_pose_message_fields() {
        let pose = RobotPose::new(RigidPose::from_rpy_degrees(
            Vector3::new(1.0, 2.0, 3.0),
            [0.0, 0.0, 45.0],
        ));
        let msg = pose.to_message();
        assert_close(msg.x, 1.0);
        assert_close(msg.y, 2.0);
        assert_close(msg.z, 3.0);
        assert_close(msg.yaw, 45.0);
    }

    #[test]
    fn pose_message_json_shape() {
        let msg = RobotPose::default().to_message();
        let json = serde_json::to_value(msg).unwrap();
        for key in ["x", "y", "z", "roll", "pitch", "yaw"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
