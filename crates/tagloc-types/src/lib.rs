//! `tagloc-types` – shared data model for the multi-camera tag localizer.
//!
//! # Modules
//!
//! - [`pose`] – [`RigidPose`], [`RobotPose`], [`PoseMessage`] and the
//!   roll/pitch/yaw helpers.
//! - [`candidate`] – [`Candidate`] and the per-tag [`CandidateSet`] with its
//!   staleness bookkeeping.
//! - [`detection`] – detector output ([`Detection`]) and static per-camera
//!   calibration ([`CameraExtrinsics`]).
//! - [`clock`] – process-wide monotonic nanosecond timestamps.

pub mod candidate;
pub mod clock;
pub mod detection;
pub mod pose;

pub use candidate::{
    Candidate, CandidateFrames, CandidateSet, DEFAULT_TAG_CAPACITY, PixelCoords,
    STALE_THRESHOLD_MS,
};
pub use detection::{CameraExtrinsics, CameraIntrinsics, Detection, PoseSolution};
pub use pose::{PoseMessage, RigidPose, RobotPose};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Event wrapper carried by the pose bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"tagloc-runtime::publisher"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the pose bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Latest filtered robot pose.
    RobotPose(PoseMessage),
    /// A tag became visible (`tracked: true`) or was lost.
    TagTracking { tag_id: u32, tracked: bool },
    /// A worker hit an error it could not recover from.
    WorkerFault { worker: String, message: String },
}

/// Error type shared by every crate in the workspace.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocalizationError {
    #[error("Device Error on {component}: {details}")]
    TransientDevice { component: String, details: String },

    #[error("Lock Timeout: {0}")]
    LockTimeout(String),

    #[error("Unknown Tag: id {0} is not in the field layout")]
    UnknownTag(u32),

    #[error("Tag Out Of Range: id {tag_id} outside 1..={capacity}")]
    TagOutOfRange { tag_id: u32, capacity: usize },

    #[error("Startup Configuration Error: {0}")]
    StartupConfig(String),

    #[error("Data Consistency Error: evicted {evicted} candidates but only {tracked} were tracked")]
    DataConsistency { evicted: usize, tracked: usize },

    #[error("Localization halted after a fatal error")]
    Halted,

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("I/O Error: {0}")]
    Io(String),
}

impl LocalizationError {
    /// Fatal errors must stop the process; everything else is handled where
    /// it is detected.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StartupConfig(_) | Self::DataConsistency { .. } | Self::Halted
        )
    }

    /// Errors that warrant a backoff before the worker re-initialises.
    pub fn is_transient_device(&self) -> bool {
        matches!(self, Self::TransientDevice { .. })
    }

    pub fn device(component: impl Into<String>, details: impl Into<String>) -> Self {
        Self::TransientDevice {
            component: component.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(LocalizationError::StartupConfig("missing fmap".into()).is_fatal());
        assert!(LocalizationError::DataConsistency { evicted: 3, tracked: 2 }.is_fatal());
        assert!(!LocalizationError::UnknownTag(9).is_fatal());
        assert!(!LocalizationError::LockTimeout("pending".into()).is_fatal());
        assert!(!LocalizationError::device("cam0", "unplugged").is_fatal());
        assert!(LocalizationError::device("cam0", "unplugged").is_transient_device());
    }

    #[test]
    fn error_display() {
        let err = LocalizationError::device("front", "read failed");
        assert!(err.to_string().contains("front"));
        let err = LocalizationError::DataConsistency { evicted: 4, tracked: 1 };
        assert!(err.to_string().contains("evicted 4"));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "tagloc-runtime::publisher",
            EventPayload::RobotPose(RobotPose::default().to_message()),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        assert!(matches!(back.payload, EventPayload::RobotPose(_)));
    }
}
