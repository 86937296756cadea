//! Field layout: where every known tag sits in the global frame.
//!
//! Layouts are loaded once at startup from a `.fmap` JSON document:
//!
//! ```json
//! { "fiducials": [
//!     { "family": "apriltag3_36h11_classic", "id": 1, "size": 165.1,
//!       "unique": 1, "transform": [1,0,0,2.5, 0,1,0,0.0, 0,0,1,0.5, 0,0,0,1] }
//! ] }
//! ```
//!
//! `transform` is a row-major 4×4 homogeneous matrix (tag frame → global
//! frame).  Any parse failure is a [`LocalizationError::StartupConfig`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::Deserialize;
use tagloc_types::{LocalizationError, RigidPose};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct FieldMap {
    fiducials: Vec<Fiducial>,
}

#[derive(Debug, Deserialize)]
struct Fiducial {
    #[serde(default)]
    family: String,
    id: u32,
    #[serde(default)]
    size: f64,
    transform: Vec<f64>,
}

/// Immutable map from tag id to that tag's pose in the global frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagLayout {
    tags: HashMap<u32, RigidPose>,
}

impl TagLayout {
    /// An empty layout; every lookup misses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a layout from explicit `(id, pose)` pairs.
    pub fn from_poses(poses: impl IntoIterator<Item = (u32, RigidPose)>) -> Self {
        Self {
            tags: poses.into_iter().collect(),
        }
    }

    /// Parse a `.fmap` document.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::StartupConfig`] for malformed JSON or a transform
    /// that is not 16 numbers long.
    pub fn from_fmap_str(raw: &str) -> Result<Self, LocalizationError> {
        let map: FieldMap = serde_json::from_str(raw)
            .map_err(|e| LocalizationError::StartupConfig(format!("failed to parse fmap: {e}")))?;

        let mut tags = HashMap::with_capacity(map.fiducials.len());
        for fiducial in map.fiducials {
            let pose = pose_from_row_major(&fiducial.transform).ok_or_else(|| {
                LocalizationError::StartupConfig(format!(
                    "tag {} transform has {} values, expected 16",
                    fiducial.id,
                    fiducial.transform.len()
                ))
            })?;
            info!(
                tag_id = fiducial.id,
                family = %fiducial.family,
                size = fiducial.size,
                x = pose.translation.x,
                y = pose.translation.y,
                z = pose.translation.z,
                "adding tag from fmap"
            );
            if tags.insert(fiducial.id, pose).is_some() {
                warn!(tag_id = fiducial.id, "duplicate tag id in fmap; keeping the last entry");
            }
        }
        Ok(Self { tags })
    }

    /// Read and parse a `.fmap` file.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::StartupConfig`] when the file is missing or
    /// unreadable, or when [`from_fmap_str`](Self::from_fmap_str) fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LocalizationError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            LocalizationError::StartupConfig(format!(
                "failed to read fmap at {}: {e}",
                path.display()
            ))
        })?;
        Self::from_fmap_str(&raw)
    }

    /// Global pose of `tag_id`, if the tag is part of the layout.
    pub fn get(&self, tag_id: u32) -> Option<&RigidPose> {
        self.tags.get(&tag_id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Known tag ids in ascending order.
    pub fn tag_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.tags.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn pose_from_row_major(t: &[f64]) -> Option<RigidPose> {
    if t.len() != 16 {
        return None;
    }
    let rotation = Matrix3::new(t[0], t[1], t[2], t[4], t[5], t[6], t[8], t[9], t[10]);
    let translation = Vector3::new(t[3], t[7], t[11]);
    Some(RigidPose::new(rotation, translation))
}
