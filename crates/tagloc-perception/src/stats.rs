//! Spread of a window of candidate poses, for the periodic stats log.

use tagloc_types::RigidPose;

/// Mean and population standard deviation of translation (metres) and
/// roll/pitch/yaw (degrees) over a set of poses.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseStatistics {
    pub count: usize,
    pub mean_translation: [f64; 3],
    pub std_translation: [f64; 3],
    pub mean_rpy: [f64; 3],
    pub std_rpy: [f64; 3],
}

impl PoseStatistics {
    /// `None` for an empty input.
    pub fn from_poses<'a>(poses: impl IntoIterator<Item = &'a RigidPose>) -> Option<Self> {
        let samples: Vec<[f64; 6]> = poses
            .into_iter()
            .map(|p| {
                let t = &p.translation;
                let [r, pi, y] = p.rpy_degrees();
                [t.x, t.y, t.z, r, pi, y]
            })
            .collect();
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let mut mean = [0.0; 6];
        for s in &samples {
            for (m, v) in mean.iter_mut().zip(s) {
                *m += v / n;
            }
        }
        let mut var = [0.0; 6];
        for s in &samples {
            for ((acc, v), m) in var.iter_mut().zip(s).zip(&mean) {
                *acc += (v - m) * (v - m) / n;
            }
        }
        let std = var.map(f64::sqrt);

        Some(Self {
            count: samples.len(),
            mean_translation: [mean[0], mean[1], mean[2]],
            std_translation: [std[0], std[1], std[2]],
            mean_rpy: [mean[3], mean[4], mean[5]],
            std_rpy: [std[3], std[4], std[5]],
        })
    }
}
