//! Fixed-rate pose publisher.

use tagloc_middleware::{EventBus, PoseSink, Topic};
use tagloc_types::{Event, EventPayload, LocalizationError};
use tracing::{debug, info, warn};

use crate::localization::LocalizationHandle;
use crate::worker::{Task, WorkerContext};

const SOURCE: &str = "tagloc-runtime::publisher";

/// Reads the pose store each cycle and forwards it to [`Topic::Pose`] and,
/// when configured, an external [`PoseSink`].
pub struct PosePublisher {
    localization: LocalizationHandle,
    bus: EventBus,
    sink: Option<Box<dyn PoseSink>>,
    published: u64,
}

impl PosePublisher {
    pub fn new(localization: LocalizationHandle, bus: EventBus) -> Self {
        Self {
            localization,
            bus,
            sink: None,
            published: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn PoseSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl Task for PosePublisher {
    fn execute(&mut self, ctx: &WorkerContext) -> Result<(), LocalizationError> {
        let pose = match self.localization.get_robot_pose() {
            Ok(pose) => pose,
            Err(LocalizationError::Halted) => {
                warn!("pose store halted; publisher stopping");
                ctx.request_stop();
                return Ok(());
            }
            Err(e) => {
                debug!(error = %e, "pose unavailable this cycle");
                return Ok(());
            }
        };

        let message = pose.to_message();
        if let Some(sink) = self.sink.as_mut() {
            sink.send(&message)?;
        }
        // No subscribers is not an error for a broadcaster.
        let _ = self
            .bus
            .publish_to(Topic::Pose, Event::new(SOURCE, EventPayload::RobotPose(message)));
        self.published += 1;
        Ok(())
    }

    fn finish(&mut self, _ctx: &WorkerContext) {
        info!(published = self.published, "pose publisher stopped");
    }
}
