//! `tagloc-middleware` – moves localization output to whoever wants it.
//!
//! # Modules
//!
//! - [`bus`] – in-process, topic-based publish/subscribe [`EventBus`] built on
//!   Tokio broadcast channels.
//! - [`sink`] – [`PoseSink`]: the seam to an external pose bus, with a
//!   JSON-lines implementation.

pub mod bus;
pub mod sink;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use sink::{JsonLinesSink, PoseRecord, PoseSink};
