//! Robot trajectory CSV log.
//!
//! [`TrajectoryWriter`] owns a background thread fed through a bounded
//! crossbeam queue, so recording a pose never touches the disk on the caller's
//! thread.  When the queue is full the row is dropped.  [`TrajectoryLogger`]
//! is the [`Task`] that samples the pose store into the writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};
use tagloc_types::{LocalizationError, RobotPose, clock};
use tracing::{debug, error, info, warn};

use crate::localization::LocalizationHandle;
use crate::worker::{Task, WorkerContext};

/// First line of every trajectory file.
pub const CSV_HEADER: &str = "time_ms,x,y,z,roll,pitch,yaw";

const QUEUE_DEPTH: usize = 1024;

#[derive(Debug)]
enum Command {
    Row(String),
    Flush,
}

fn format_row(time_ms: f64, pose: &RobotPose) -> String {
    let [x, y, z] = pose.position();
    let [roll, pitch, yaw] = pose.orientation_degrees();
    format!("{time_ms:.3},{x:.6},{y:.6},{z:.6},{roll:.4},{pitch:.4},{yaw:.4}")
}

/// Asynchronous CSV writer for robot poses.
#[derive(Debug)]
pub struct TrajectoryWriter {
    tx: Option<Sender<Command>>,
    handle: Option<JoinHandle<Result<u64, LocalizationError>>>,
    dropped: u64,
}

impl TrajectoryWriter {
    /// Create (truncating) `path`, write the header and start the writer
    /// thread.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::Io`] if the file cannot be created or the thread
    /// cannot be spawned.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LocalizationError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            LocalizationError::Io(format!("failed to create {}: {e}", path.display()))
        })?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{CSV_HEADER}").map_err(|e| LocalizationError::Io(e.to_string()))?;

        let (tx, rx) = channel::bounded::<Command>(QUEUE_DEPTH);
        let handle = thread::Builder::new()
            .name("trajectory-writer".into())
            .spawn(move || -> Result<u64, LocalizationError> {
                let mut rows = 0u64;
                for command in rx {
                    match command {
                        Command::Row(line) => {
                            writeln!(out, "{line}").map_err(|e| LocalizationError::Io(e.to_string()))?;
                            rows += 1;
                        }
                        Command::Flush => {
                            out.flush().map_err(|e| LocalizationError::Io(e.to_string()))?;
                        }
                    }
                }
                out.flush().map_err(|e| LocalizationError::Io(e.to_string()))?;
                Ok(rows)
            })
            .map_err(|e| LocalizationError::Io(format!("failed to spawn trajectory writer: {e}")))?;

        info!(path = %path.display(), "trajectory log opened");
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            dropped: 0,
        })
    }

    /// Queue one row.  Returns `false` if the row was dropped.
    pub fn record(&mut self, time_ms: f64, pose: &RobotPose) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(Command::Row(format_row(time_ms, pose))) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    warn!(dropped = self.dropped, "trajectory queue full; rows dropped");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Ask the writer thread to flush what it has written so far.
    pub fn flush(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(Command::Flush);
        }
    }

    /// Rows dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drain the queue, flush the file and stop the writer thread.  Returns
    /// the number of rows written.
    ///
    /// # Errors
    ///
    /// The first [`LocalizationError::Io`] the writer thread hit.
    pub fn close(&mut self) -> Result<u64, LocalizationError> {
        self.tx = None;
        let Some(handle) = self.handle.take() else {
            return Ok(0);
        };
        let rows = handle
            .join()
            .map_err(|_| LocalizationError::Io("trajectory writer panicked".into()))??;
        debug!(rows, dropped = self.dropped, "trajectory log closed");
        Ok(rows)
    }
}

impl Drop for TrajectoryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "trajectory log failed");
        }
    }
}

/// Samples the pose store into a [`TrajectoryWriter`] once per cycle.
pub struct TrajectoryLogger {
    localization: LocalizationHandle,
    writer: TrajectoryWriter,
}

impl TrajectoryLogger {
    pub fn new(localization: LocalizationHandle, writer: TrajectoryWriter) -> Self {
        Self {
            localization,
            writer,
        }
    }
}

impl Task for TrajectoryLogger {
    fn execute(&mut self, ctx: &WorkerContext) -> Result<(), LocalizationError> {
        match self.localization.get_robot_pose() {
            Ok(pose) => {
                let time_ms = clock::now_ns() as f64 / 1e6;
                self.writer.record(time_ms, &pose);
            }
            Err(LocalizationError::Halted) => ctx.request_stop(),
            Err(e) => debug!(error = %e, "pose unavailable; trajectory row skipped"),
        }
        Ok(())
    }

    fn finish(&mut self, _ctx: &WorkerContext) {
        self.writer.flush();
    }
}
