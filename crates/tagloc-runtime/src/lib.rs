//! `tagloc-runtime` – worker threads, pose fusion and process supervision.
//!
//! # Modules
//!
//! - [`worker`] – [`Worker`]: a periodic [`Task`] on its own thread with
//!   soft restarts, device backoff and fatal-error reporting.
//! - [`localization`] – [`LocalizationWorker`]: candidate ingestion, stale
//!   eviction, strategy dispatch and the [`PoseStore`].
//! - [`camera`] – [`CameraTask`]: one detection source feeding the fusion
//!   queue.
//! - [`publisher`] – [`PosePublisher`]: the latest pose onto the event bus and
//!   an optional external sink.
//! - [`trajectory`] – [`TrajectoryLogger`]: pose history as CSV.
//! - [`supervisor`] – [`Supervisor`]: starts, watches and stops workers.
//! - [`telemetry`] – `tracing` subscriber and optional OTLP export.

pub mod camera;
pub mod localization;
pub mod publisher;
pub mod supervisor;
pub mod telemetry;
pub mod trajectory;
pub mod worker;

pub use camera::CameraTask;
pub use localization::{LocalizationHandle, LocalizationWorker, PoseStore};
pub use publisher::PosePublisher;
pub use supervisor::{Shutdown, Supervisor, WorkerFault};
pub use trajectory::{TrajectoryLogger, TrajectoryWriter};
pub use worker::{Task, Worker, WorkerContext};
