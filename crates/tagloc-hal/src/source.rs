//! Where camera workers get their detections from.
//!
//! A [`DetectionSource`] yields one [`DetectedFrame`] per call.  Live
//! hardware goes through [`CameraPipeline`], which captures a frame and
//! hands it to a [`Detector`].  Recorded runs go through [`PlaybackSource`],
//! which replays a JSON-lines file one frame per call and reports exhaustion
//! at end of file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tagloc_types::{CameraExtrinsics, Detection, LocalizationError, clock};
use tracing::{debug, info, warn};

use crate::camera::{Camera, Detector};

/// All detections from one frame of one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFrame {
    /// Capture time on the process clock.
    pub timestamp_ns: u64,
    pub detections: Vec<Detection>,
}

/// A stream of detected frames for a single camera.
pub trait DetectionSource: Send {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Prepare the source.  Called on every (re)start of the owning worker.
    fn open(&mut self) -> Result<(), LocalizationError>;

    /// Produce the next frame.
    ///
    /// `Ok(None)` means the source is exhausted and will never produce
    /// another frame.
    fn next_frame(&mut self) -> Result<Option<DetectedFrame>, LocalizationError>;

    /// Release whatever [`open`](Self::open) acquired.
    fn close(&mut self);
}

// ────────────────────────────────────────────────────────────────────────────
// CameraPipeline
// ────────────────────────────────────────────────────────────────────────────

/// A live camera composed with a tag detector.
pub struct CameraPipeline<C, D> {
    camera: C,
    detector: D,
    extrinsics: CameraExtrinsics,
}

impl<C: Camera, D: Detector> CameraPipeline<C, D> {
    pub fn new(camera: C, detector: D, extrinsics: CameraExtrinsics) -> Self {
        Self {
            camera,
            detector,
            extrinsics,
        }
    }

    pub fn extrinsics(&self) -> &CameraExtrinsics {
        &self.extrinsics
    }
}

impl<C: Camera, D: Detector> DetectionSource for CameraPipeline<C, D> {
    fn name(&self) -> &str {
        self.camera.id()
    }

    fn open(&mut self) -> Result<(), LocalizationError> {
        self.camera.open()?;
        info!(camera = self.camera.id(), "camera opened");
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<DetectedFrame>, LocalizationError> {
        let frame = self.camera.capture()?;
        let detections = self.detector.detect(&frame, &self.extrinsics)?;
        Ok(Some(DetectedFrame {
            timestamp_ns: frame.timestamp_ns,
            detections,
        }))
    }

    fn close(&mut self) {
        self.camera.close();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PlaybackSource
// ────────────────────────────────────────────────────────────────────────────

/// One line of a playback file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedFrame {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Replays recorded detections from a JSON-lines file.
///
/// Each non-blank line is a [`RecordedFrame`].  Frames are stamped with the
/// current process time as they are read, so replayed candidates age exactly
/// like live ones.  Malformed lines are logged and replayed as empty frames.
pub struct PlaybackSource {
    name: String,
    path: PathBuf,
    reader: Option<BufReader<File>>,
    line_no: usize,
}

impl PlaybackSource {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            reader: None,
            line_no: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DetectionSource for PlaybackSource {
    fn name(&self) -> &str {
        &self.name
    }

    /// Opens (or reopens from the start) the playback file.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::StartupConfig`] when the file cannot be opened;
    /// a missing recording is a deployment mistake, not a device glitch.
    fn open(&mut self) -> Result<(), LocalizationError> {
        let file = File::open(&self.path).map_err(|e| {
            LocalizationError::StartupConfig(format!(
                "failed to open playback file {}: {e}",
                self.path.display()
            ))
        })?;
        self.reader = Some(BufReader::new(file));
        self.line_no = 0;
        info!(source = %self.name, path = %self.path.display(), "playback opened");
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<DetectedFrame>, LocalizationError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(LocalizationError::device(&self.name, "playback source not open"));
        };

        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| LocalizationError::Io(e.to_string()))?;
            if read == 0 {
                debug!(source = %self.name, lines = self.line_no, "playback exhausted");
                return Ok(None);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                break;
            }
        }

        let recorded = match serde_json::from_str::<RecordedFrame>(line.trim()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(source = %self.name, line = self.line_no, error = %e, "skipping malformed playback line");
                RecordedFrame::default()
            }
        };
        Ok(Some(DetectedFrame {
            timestamp_ns: clock::now_ns(),
            detections: recorded.detections,
        }))
    }

    fn close(&mut self) {
        self.reader = None;
    }
}
