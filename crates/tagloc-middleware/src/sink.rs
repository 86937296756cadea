//! Seam to the external pose bus.
//!
//! The robot's controller reads the pose as two arrays, `position`
//! (`[x, y, z]`, metres) and `orientation` (`[roll, pitch, yaw]`, degrees),
//! keyed by team number.  The concrete transport is a collaborator; this
//! module defines what gets sent ([`PoseRecord`]) and a [`JsonLinesSink`]
//! that writes one record per line to any [`Write`] (stdout, a pipe, a
//! socket).

use std::io::Write;

use serde::{Deserialize, Serialize};
use tagloc_types::{LocalizationError, PoseMessage};

/// What the external bus receives for every published pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub team_number: u32,
    pub position: [f64; 3],
    pub orientation: [f64; 3],
}

impl PoseRecord {
    pub fn new(team_number: u32, pose: &PoseMessage) -> Self {
        Self {
            team_number,
            position: [pose.x, pose.y, pose.z],
            orientation: [pose.roll, pose.pitch, pose.yaw],
        }
    }
}

/// Anything that can carry poses off the robot.
pub trait PoseSink: Send {
    /// # Errors
    ///
    /// [`LocalizationError::Io`] when the transport rejects the record.
    fn send(&mut self, pose: &PoseMessage) -> Result<(), LocalizationError>;
}

/// Writes each pose as a single JSON [`PoseRecord`] line.
pub struct JsonLinesSink<W> {
    writer: W,
    team_number: u32,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, team_number: u32) -> Self {
        Self {
            writer,
            team_number,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> PoseSink for JsonLinesSink<W> {
    fn send(&mut self, pose: &PoseMessage) -> Result<(), LocalizationError> {
        let record = PoseRecord::new(self.team_number, pose);
        let line = serde_json::to_string(&record).map_err(|e| LocalizationError::Io(e.to_string()))?;
        writeln!(self.writer, "{line}").map_err(|e| LocalizationError::Io(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| LocalizationError::Io(e.to_string()))
    }
}
