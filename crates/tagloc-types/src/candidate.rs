//! Per-detection candidate poses and the per-tag [`CandidateSet`] multimap.
//!
//! Every AprilTag detection yields one or two geometrically ambiguous
//! solutions; each solution becomes one [`Candidate`] carrying the pose of the
//! robot in every intermediate frame.  Candidates are grouped by tag id in a
//! [`CandidateSet`], which also owns the staleness bookkeeping.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock;
use crate::pose::RigidPose;
use crate::LocalizationError;

/// Default number of tag ids tracked (ids `1..=25`).
pub const DEFAULT_TAG_CAPACITY: usize = 25;

/// Candidates older than this are evicted by [`CandidateSet::clear_stale`].
pub const STALE_THRESHOLD_MS: u64 = 150;

// ────────────────────────────────────────────────────────────────────────────
// Candidate
// ────────────────────────────────────────────────────────────────────────────

/// The same detection expressed in each coordinate frame of the chain
/// tag → camera → robot → global.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateFrames {
    /// Tag-local frame; always the identity.
    pub tag: RigidPose,
    /// Tag pose relative to the camera, as reported by the detector.
    pub camera: RigidPose,
    /// Tag pose relative to the robot body.
    pub robot: RigidPose,
    /// Robot pose in the global frame implied by this detection.
    pub global: RigidPose,
}

/// Pixel-space location of a detection, kept for overlays and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelCoords {
    pub center: [f64; 2],
    /// Corners wrap counter-clockwise around the tag.
    pub corners: [[f64; 2]; 4],
}

/// One candidate robot pose derived from a single detection solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    tag_id: u32,
    camera_id: u32,
    timestamp_ns: u64,
    reprojection_error: f64,
    frames: CandidateFrames,
    pixels: PixelCoords,
}

impl Candidate {
    pub fn new(
        tag_id: u32,
        camera_id: u32,
        timestamp_ns: u64,
        reprojection_error: f64,
        frames: CandidateFrames,
        pixels: PixelCoords,
    ) -> Self {
        Self {
            tag_id,
            camera_id,
            timestamp_ns,
            reprojection_error,
            frames,
            pixels,
        }
    }

    pub fn tag_id(&self) -> u32 {
        self.tag_id
    }

    pub fn camera_id(&self) -> u32 {
        self.camera_id
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn reprojection_error(&self) -> f64 {
        self.reprojection_error
    }

    pub fn frames(&self) -> &CandidateFrames {
        &self.frames
    }

    /// Shorthand for `frames().global`.
    pub fn global(&self) -> &RigidPose {
        &self.frames.global
    }

    pub fn pixels(&self) -> &PixelCoords {
        &self.pixels
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CandidateSet
// ────────────────────────────────────────────────────────────────────────────

/// Fixed number of per-tag buckets; tag id `n` lives in bucket `n - 1`.
///
/// `len()` is a running count maintained by [`add`](Self::add),
/// [`clear_stale`](Self::clear_stale) and [`clear_all`](Self::clear_all).
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSet {
    buckets: Vec<Vec<Candidate>>,
    count: usize,
}

impl Default for CandidateSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateSet {
    /// A set tracking [`DEFAULT_TAG_CAPACITY`] tag ids.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TAG_CAPACITY)
    }

    /// A set tracking tag ids `1..=capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); capacity],
            count: 0,
        }
    }

    /// Number of tag ids this set can hold.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Number of candidates currently tracked.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append `candidate` to its tag's bucket.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::TagOutOfRange`] when the tag id is `0` or larger
    /// than [`capacity`](Self::capacity).
    pub fn add(&mut self, candidate: Candidate) -> Result<(), LocalizationError> {
        let index = self.index_of(candidate.tag_id)?;
        self.buckets[index].push(candidate);
        self.count += 1;
        Ok(())
    }

    /// Move every candidate of `other` into this set, keeping per-bucket
    /// order.  Returns how many candidates were dropped because their tag id
    /// does not fit this set.
    pub fn merge(&mut self, other: CandidateSet) -> usize {
        let mut dropped = 0;
        for candidate in other.into_candidates() {
            if self.add(candidate).is_err() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Remove every candidate.
    pub fn clear_all(&mut self) {
        self.buckets.iter_mut().for_each(Vec::clear);
        self.count = 0;
    }

    /// Evict candidates older than [`STALE_THRESHOLD_MS`] relative to
    /// `now_ns`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::DataConsistency`] if more candidates were evicted
    /// than the set believed it held.  The evicted entries are gone either
    /// way; the error means the running count can no longer be trusted.
    pub fn clear_stale(&mut self, now_ns: u64) -> Result<usize, LocalizationError> {
        let threshold = Duration::from_millis(STALE_THRESHOLD_MS);
        let mut evicted = 0;
        for bucket in &mut self.buckets {
            let before = bucket.len();
            bucket.retain(|c| clock::age(now_ns, c.timestamp_ns) <= threshold);
            evicted += before - bucket.len();
        }
        if evicted > self.count {
            return Err(LocalizationError::DataConsistency {
                evicted,
                tracked: self.count,
            });
        }
        self.count -= evicted;
        Ok(evicted)
    }

    /// [`clear_stale`](Self::clear_stale) against the process clock.
    pub fn clear_stale_now(&mut self) -> Result<usize, LocalizationError> {
        self.clear_stale(clock::now_ns())
    }

    /// Candidates for `tag_id`; empty for unknown ids.
    pub fn bucket(&self, tag_id: u32) -> &[Candidate] {
        match self.index_of(tag_id) {
            Ok(index) => &self.buckets[index],
            Err(_) => &[],
        }
    }

    /// Non-empty buckets as `(tag_id, candidates)` in ascending tag order.
    pub fn buckets(&self) -> impl Iterator<Item = (u32, &[Candidate])> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .map(|(i, b)| (i as u32 + 1, b.as_slice()))
    }

    /// Every candidate, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.buckets.iter().flatten()
    }

    /// Tag ids with at least one candidate.
    pub fn visible_tags(&self) -> Vec<u32> {
        self.buckets().map(|(id, _)| id).collect()
    }

    /// Consume the set, yielding candidates bucket by bucket.
    pub fn into_candidates(self) -> impl Iterator<Item = Candidate> {
        self.buckets.into_iter().flatten()
    }

    fn index_of(&self, tag_id: u32) -> Result<usize, LocalizationError> {
        let capacity = self.buckets.len();
        match tag_id as usize {
            id if id >= 1 && id <= capacity => Ok(id - 1),
            _ => Err(LocalizationError::TagOutOfRange { tag_id, capacity }),
        }
    }
}
