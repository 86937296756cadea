//! Localization strategies: turn a window of candidates into one robot pose.
//!
//! Both strategies share a contract: [`Strategy::compute`] returns `false`
//! and leaves the pose untouched when the window holds nothing usable.  The
//! caller keeps publishing the last good estimate in that case.
//!
//! - [`MeanStrategy`] resolves the per-detection ambiguity by reprojection
//!   error and averages what is left, optionally rate-limited.
//! - [`KMeansStrategy`] clusters every candidate in translation + RPY space
//!   and takes the centroid of the largest cluster, so a minority of wrong
//!   solutions is outvoted instead of averaged in.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tagloc_types::{Candidate, CandidateSet, RigidPose, RobotPose};

/// Strategy selection as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Mean {
        /// Per-cycle clamp on every pose element; absent disables limiting.
        #[serde(default)]
        max_step: Option<f64>,
    },
    #[serde(rename = "kmeans")]
    KMeans {
        #[serde(default = "default_k")]
        k: usize,
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
    },
}

fn default_k() -> usize {
    3
}

fn default_max_iterations() -> usize {
    50
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Mean { max_step: None }
    }
}

/// The strategy owned by the fusion engine.
#[derive(Debug, Clone)]
pub enum Strategy {
    Mean(MeanStrategy),
    KMeans(KMeansStrategy),
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Mean(MeanStrategy::default())
    }
}

impl From<&StrategyConfig> for Strategy {
    fn from(config: &StrategyConfig) -> Self {
        match *config {
            StrategyConfig::Mean { max_step } => Self::Mean(MeanStrategy::new(max_step)),
            StrategyConfig::KMeans { k, max_iterations } => {
                Self::KMeans(KMeansStrategy::new(k, max_iterations))
            }
        }
    }
}

impl Strategy {
    /// Estimate the robot pose from `candidates` into `pose`.
    ///
    /// Returns `false`, leaving `pose` as it was, when there is no data.
    pub fn compute(&mut self, candidates: &CandidateSet, pose: &mut RobotPose) -> bool {
        match self {
            Self::Mean(s) => s.compute(candidates, pose),
            Self::KMeans(s) => s.compute(candidates, pose),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mean(_) => "mean",
            Self::KMeans(_) => "kmeans",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Mean
// ────────────────────────────────────────────────────────────────────────────

/// Average of the best candidate per (tag, camera).
#[derive(Debug, Clone, Default)]
pub struct MeanStrategy {
    max_step: Option<f64>,
    has_estimate: bool,
}

impl MeanStrategy {
    pub fn new(max_step: Option<f64>) -> Self {
        Self {
            max_step,
            has_estimate: false,
        }
    }

    pub fn compute(&mut self, candidates: &CandidateSet, pose: &mut RobotPose) -> bool {
        let selected = select_best_per_camera(candidates);
        if selected.is_empty() {
            return false;
        }

        let mut sum = RigidPose::zero();
        for candidate in &selected {
            sum += *candidate.global();
        }
        let mean = sum / selected.len() as f64;

        pose.global = match self.max_step {
            Some(step) if self.has_estimate => clamp_step(&pose.global, &mean, step),
            _ => mean,
        };
        self.has_estimate = true;
        true
    }
}

/// For every tag and every camera, the candidate with the lowest
/// reprojection error.  Ties keep the one queued first.
pub fn select_best_per_camera(candidates: &CandidateSet) -> Vec<&Candidate> {
    let mut selected = Vec::new();
    for (_, bucket) in candidates.buckets() {
        let mut best: BTreeMap<u32, &Candidate> = BTreeMap::new();
        for candidate in bucket {
            best.entry(candidate.camera_id())
                .and_modify(|current| {
                    if candidate.reprojection_error() < current.reprojection_error() {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }
        selected.extend(best.into_values());
    }
    selected
}

fn clamp_step(previous: &RigidPose, target: &RigidPose, step: f64) -> RigidPose {
    let step = step.abs();
    let delta = *target - *previous;
    RigidPose::new(
        previous.rotation + delta.rotation.map(|d| d.clamp(-step, step)),
        previous.translation + delta.translation.map(|d| d.clamp(-step, step)),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// K-Means
// ────────────────────────────────────────────────────────────────────────────

type Point = [f64; 6];

/// Lloyd's algorithm over `[x, y, z, roll°, pitch°, yaw°]`.
///
/// Seeding is deterministic (farthest point first from the first candidate),
/// so the same window always yields the same pose.  Angles are clustered as
/// plain numbers; a pose straddling ±180° yaw splits into two clusters.
#[derive(Debug, Clone)]
pub struct KMeansStrategy {
    k: usize,
    max_iterations: usize,
}

impl Default for KMeansStrategy {
    fn default() -> Self {
        Self::new(default_k(), default_max_iterations())
    }
}

impl KMeansStrategy {
    pub fn new(k: usize, max_iterations: usize) -> Self {
        Self {
            k: k.max(1),
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn compute(&mut self, candidates: &CandidateSet, pose: &mut RobotPose) -> bool {
        let points: Vec<Point> = candidates.iter().map(|c| to_point(c.global())).collect();
        if points.is_empty() {
            return false;
        }

        let k = self.k.min(points.len());
        let mut centroids = seed(&points, k);
        let mut assignment = vec![usize::MAX; points.len()];

        for _ in 0..self.max_iterations {
            let mut changed = false;
            for (i, p) in points.iter().enumerate() {
                let closest = nearest(p, &centroids);
                if assignment[i] != closest {
                    assignment[i] = closest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            update_centroids(&points, &assignment, &mut centroids);
        }

        let mut sizes = vec![0usize; k];
        for &a in &assignment {
            sizes[a] += 1;
        }
        // max_by_key keeps the last maximum; reverse so the lowest index wins.
        let Some((winner, _)) = sizes.iter().enumerate().rev().max_by_key(|(_, n)| **n) else {
            return false;
        };

        let c = centroids[winner];
        pose.global = RigidPose::from_rpy_degrees(Vector3::new(c[0], c[1], c[2]), [c[3], c[4], c[5]]);
        true
    }
}

fn to_point(pose: &RigidPose) -> Point {
    let t = &pose.translation;
    let [roll, pitch, yaw] = pose.rpy_degrees();
    [t.x, t.y, t.z, roll, pitch, yaw]
}

fn distance_sq(a: &Point, b: &Point) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(p: &Point, centroids: &[Point]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = distance_sq(p, c);
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

fn seed(points: &[Point], k: usize) -> Vec<Point> {
    let mut centroids = vec![points[0]];
    while centroids.len() < k {
        let mut far = 0;
        let mut far_d = -1.0;
        for (i, p) in points.iter().enumerate() {
            let d = centroids
                .iter()
                .map(|c| distance_sq(p, c))
                .fold(f64::INFINITY, f64::min);
            if d > far_d {
                far = i;
                far_d = d;
            }
        }
        centroids.push(points[far]);
    }
    centroids
}

fn update_centroids(points: &[Point], assignment: &[usize], centroids: &mut [Point]) {
    let mut sums = vec![[0.0; 6]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];
    for (p, &a) in points.iter().zip(assignment) {
        for (s, v) in sums[a].iter_mut().zip(p) {
            *s += v;
        }
        counts[a] += 1;
    }
    for ((centroid, sum), n) in centroids.iter_mut().zip(sums).zip(counts) {
        // An empty cluster keeps its previous centroid.
        if n > 0 {
            *centroid = sum.map(|s| s / n as f64);
        }
    }
}
