//! Camera worker task: detections in, candidates out.

use tagloc_hal::DetectionSource;
use tagloc_perception::TransformPipeline;
use tagloc_types::LocalizationError;
use tracing::{debug, info, warn};

use crate::localization::LocalizationHandle;
use crate::worker::{Task, WorkerContext};

/// Pulls one frame per cycle from a [`DetectionSource`], turns its
/// detections into candidates and queues them for fusion.
///
/// A source that reports exhaustion stops the worker for good.
pub struct CameraTask {
    source: Box<dyn DetectionSource>,
    pipeline: TransformPipeline,
    localization: LocalizationHandle,
    frames: u64,
    dropped_frames: u64,
}

impl CameraTask {
    pub fn new(
        source: Box<dyn DetectionSource>,
        pipeline: TransformPipeline,
        localization: LocalizationHandle,
    ) -> Self {
        Self {
            source,
            pipeline,
            localization,
            frames: 0,
            dropped_frames: 0,
        }
    }
}

impl Task for CameraTask {
    fn init(&mut self, _ctx: &WorkerContext) -> Result<(), LocalizationError> {
        // A soft restart skips finish, so release the previous session here.
        self.source.close();
        self.source.open()?;
        info!(
            source = self.source.name(),
            camera_id = self.pipeline.extrinsics().camera_id,
            "camera source ready"
        );
        Ok(())
    }

    fn execute(&mut self, ctx: &WorkerContext) -> Result<(), LocalizationError> {
        let Some(frame) = self.source.next_frame()? else {
            info!(source = self.source.name(), frames = self.frames, "camera source exhausted");
            ctx.request_stop();
            return Ok(());
        };
        self.frames += 1;
        if frame.detections.is_empty() {
            return Ok(());
        }

        let candidates = self.pipeline.candidates(&frame.detections, frame.timestamp_ns);
        debug!(
            source = self.source.name(),
            detections = frame.detections.len(),
            candidates = candidates.len(),
            "frame processed"
        );
        if !self.localization.queue_tags(candidates) {
            self.dropped_frames += 1;
            warn!(source = self.source.name(), "fusion queue busy; frame dropped");
        }
        Ok(())
    }

    fn finish(&mut self, _ctx: &WorkerContext) {
        self.source.close();
        info!(
            source = self.source.name(),
            frames = self.frames,
            dropped = self.dropped_frames,
            "camera source closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tagloc_hal::sim::{ScriptedDetector, SimCamera};
    use tagloc_hal::{CameraPipeline, PlaybackSource, RecordedFrame};
    use tagloc_perception::TagLayout;
    use tagloc_types::{CameraExtrinsics, CameraIntrinsics, Detection, PoseSolution, RigidPose};

    use crate::localization::LocalizationWorker;
    use crate::worker::Worker;

    fn extrinsics() -> CameraExtrinsics {
        CameraExtrinsics {
            camera_id: 0,
            name: "front".into(),
            mount: RigidPose::identity(),
            intrinsics: CameraIntrinsics {
                fx: 600.0,
                fy: 600.0,
                cx: 320.0,
                cy: 240.0,
            },
            tag_size: 0.1651,
        }
    }

    fn detection(tag_id: u32) -> Detection {
        Detection {
            tag_id,
            primary: PoseSolution::new(RigidPose::from_translation(0.0, 0.0, 2.0), 0.05),
            alternative: None,
            pixels: Default::default(),
        }
    }

    fn pipeline() -> TransformPipeline {
        let layout = TagLayout::from_poses([(1, RigidPose::from_translation(5.0, 0.0, 1.0))]);
        TransformPipeline::new(extrinsics(), Arc::new(layout))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn sim_camera_feeds_the_fusion_queue() {
        let fusion = LocalizationWorker::default();
        let handle = fusion.handle();
        let source = CameraPipeline::new(
            SimCamera::new("front"),
            ScriptedDetector::repeating(vec![detection(1)]),
            extrinsics(),
        );
        let task = CameraTask::new(Box::new(source), pipeline(), handle.clone());
        let mut worker = Worker::new("camera-front", false, 100.0, Box::new(task));

        worker.start().unwrap();
        assert!(wait_until(|| handle.pending_len() > 0));
        worker.stop(true);
        worker.join();
    }

    #[test]
    fn exhausted_playback_stops_the_worker() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for _ in 0..3 {
            let line = serde_json::to_string(&RecordedFrame {
                detections: vec![detection(1), detection(9)],
            })
            .unwrap();
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();

        let fusion = LocalizationWorker::default();
        let handle = fusion.handle();
        let source = PlaybackSource::new("replay", file.path());
        let task = CameraTask::new(Box::new(source), pipeline(), handle.clone());
        let mut worker = Worker::new("camera-replay", true, 200.0, Box::new(task));

        worker.start().unwrap();
        assert!(wait_until(|| worker.stopped()));
        worker.join();
        assert!(worker.fatal_error().is_none());
        // Tag 9 is not in the layout, so only tag 1 survives.
        assert_eq!(handle.pending_len(), 3);
    }

    #[test]
    fn missing_playback_file_is_fatal() {
        let fusion = LocalizationWorker::default();
        let source = PlaybackSource::new("replay", "/nonexistent/tagloc/replay.jsonl");
        let task = CameraTask::new(Box::new(source), pipeline(), fusion.handle());
        let mut worker = Worker::new("camera-replay", true, 50.0, Box::new(task));

        worker.start().unwrap();
        assert!(wait_until(|| worker.stopped()));
        worker.join();
        assert!(matches!(
            worker.fatal_error(),
            Some(LocalizationError::StartupConfig(_))
        ));
    }
}
