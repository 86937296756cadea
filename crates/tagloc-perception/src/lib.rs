//! `tagloc-perception` – from tag detections to a robot pose.
//!
//! # Modules
//!
//! - [`layout`] – [`TagLayout`][layout::TagLayout]: global pose of every tag
//!   on the field, loaded from a `.fmap` file.
//! - [`transform`] – the tag → camera → robot → global chain that turns a
//!   detection into [`Candidate`][tagloc_types::Candidate]s.
//! - [`strategy`] – [`Strategy`][strategy::Strategy]: Mean and K-Means
//!   reductions of a candidate window to one pose.
//! - [`stats`] – [`PoseStatistics`][stats::PoseStatistics] over a window.

pub mod layout;
pub mod stats;
pub mod strategy;
pub mod transform;

pub use layout::TagLayout;
pub use stats::PoseStatistics;
pub use strategy::{KMeansStrategy, MeanStrategy, Strategy, StrategyConfig};
pub use transform::{TransformPipeline, transform_detection};
