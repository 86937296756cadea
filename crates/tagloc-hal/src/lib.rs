//! `tagloc-hal` – seams between the localizer and the devices that feed it.
//!
//! Nothing in here knows how to decode an image or find a tag in one; those
//! are collaborators behind the [`Camera`] and [`Detector`] traits.  What the
//! camera workers actually consume is a [`DetectionSource`]: either a live
//! [`CameraPipeline`] or a recorded [`PlaybackSource`].
//!
//! # Modules
//!
//! - [`camera`] – [`Camera`], [`CameraFrame`] and [`Detector`].
//! - [`source`] – [`DetectionSource`], [`CameraPipeline`], [`PlaybackSource`].
//! - [`sim`] – stub camera and scripted detector for headless runs.

pub mod camera;
pub mod sim;
pub mod source;

pub use camera::{Camera, CameraFrame, Detector};
pub use source::{CameraPipeline, DetectedFrame, DetectionSource, PlaybackSource, RecordedFrame};
