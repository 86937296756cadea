//! Pose fusion engine and robot pose store.
//!
//! Camera workers push [`Candidate`]s into a shared *pending* set through a
//! [`LocalizationHandle`].  The [`LocalizationWorker`] task runs on its own
//! [`Worker`][crate::worker::Worker]; every cycle it
//!
//! 1. swaps the pending set out (non-blocking, skipped when contended),
//! 2. merges it into its private working set,
//! 3. evicts candidates older than the staleness threshold,
//! 4. runs the configured [`Strategy`], and
//! 5. swaps the new pose into the [`PoseStore`].
//!
//! A [`LocalizationError::DataConsistency`] during eviction halts the store:
//! every later read returns [`LocalizationError::Halted`] and the worker
//! terminates with the error recorded for the supervisor.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tagloc_middleware::{EventBus, Topic};
use tagloc_perception::{PoseStatistics, Strategy};
use tagloc_types::{
    Candidate, CandidateSet, DEFAULT_TAG_CAPACITY, Event, EventPayload, LocalizationError,
    RobotPose,
};
use tracing::{debug, info, warn};

use crate::worker::{Task, WorkerContext};

/// How long producers wait for the pending set before dropping their frame.
pub const QUEUE_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// How long readers wait for the pose store.
pub const POSE_READ_TIMEOUT: Duration = Duration::from_millis(5);

const POSE_WRITE_TIMEOUT: Duration = Duration::from_millis(10);

/// Default interval between candidate statistics log lines.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(500);

const SOURCE: &str = "tagloc-runtime::localization";

// ─────────────────────────────────────────────────────────────────────────────
// PoseStore
// ─────────────────────────────────────────────────────────────────────────────

/// Latest filtered robot pose, shared between the fusion thread and readers.
#[derive(Debug, Default)]
pub struct PoseStore {
    pose: RwLock<RobotPose>,
    halted: AtomicBool,
}

impl PoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// [`LocalizationError::Halted`] after [`halt`](Self::halt);
    /// [`LocalizationError::LockTimeout`] if the writer holds the lock longer
    /// than [`POSE_READ_TIMEOUT`].
    pub fn get(&self) -> Result<RobotPose, LocalizationError> {
        if self.is_halted() {
            return Err(LocalizationError::Halted);
        }
        self.pose
            .try_read_for(POSE_READ_TIMEOUT)
            .map(|p| *p)
            .ok_or_else(|| LocalizationError::LockTimeout("robot pose store".into()))
    }

    /// Replace the stored pose.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::Halted`] after [`halt`](Self::halt);
    /// [`LocalizationError::LockTimeout`] when readers keep the lock busy.
    pub fn set(&self, pose: RobotPose) -> Result<(), LocalizationError> {
        if self.is_halted() {
            return Err(LocalizationError::Halted);
        }
        let mut guard = self
            .pose
            .try_write_for(POSE_WRITE_TIMEOUT)
            .ok_or_else(|| LocalizationError::LockTimeout("robot pose store".into()))?;
        let mut next = pose;
        mem::swap(&mut *guard, &mut next);
        Ok(())
    }

    /// Refuse every further read and write.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalizationHandle
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    pending: Mutex<CandidateSet>,
    store: PoseStore,
    capacity: usize,
}

/// Cheap, cloneable front door to the fusion engine: producers queue
/// candidates, consumers read the pose.
#[derive(Clone)]
pub struct LocalizationHandle {
    inner: Arc<Inner>,
}

impl LocalizationHandle {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(CandidateSet::with_capacity(capacity)),
                store: PoseStore::new(),
                capacity,
            }),
        }
    }

    /// Queue a single candidate.  Returns `false` when the pending set could
    /// not be locked in time or the tag id is out of range; the candidate is
    /// dropped in both cases.
    pub fn queue_tag(&self, candidate: Candidate) -> bool {
        let Some(mut pending) = self.inner.pending.try_lock_for(QUEUE_LOCK_TIMEOUT) else {
            return false;
        };
        match pending.add(candidate) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "discarding queued candidate");
                false
            }
        }
    }

    /// Queue a whole frame.  Returns `false`, dropping the frame, when the
    /// pending set could not be locked in time.
    pub fn queue_tags(&self, candidates: CandidateSet) -> bool {
        let Some(mut pending) = self.inner.pending.try_lock_for(QUEUE_LOCK_TIMEOUT) else {
            return false;
        };
        let dropped = pending.merge(candidates);
        if dropped > 0 {
            warn!(dropped, "discarded candidates with out-of-range tag ids");
        }
        true
    }

    /// The most recent robot pose.
    ///
    /// # Errors
    ///
    /// See [`PoseStore::get`].
    pub fn get_robot_pose(&self) -> Result<RobotPose, LocalizationError> {
        self.inner.store.get()
    }

    /// Number of candidates waiting for the next fusion cycle.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_halted(&self) -> bool {
        self.inner.store.is_halted()
    }

    #[cfg(test)]
    pub(crate) fn halt(&self) {
        self.inner.store.halt();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalizationWorker
// ─────────────────────────────────────────────────────────────────────────────

/// The fusion engine [`Task`].
pub struct LocalizationWorker {
    handle: LocalizationHandle,
    working: CandidateSet,
    strategy: Strategy,
    cache: RobotPose,
    visible: Vec<u32>,
    bus: Option<EventBus>,
    stats_interval: Duration,
    last_stats: Instant,
}

impl Default for LocalizationWorker {
    fn default() -> Self {
        Self::new(Strategy::default())
    }
}

impl LocalizationWorker {
    pub fn new(strategy: Strategy) -> Self {
        Self::with_capacity(strategy, DEFAULT_TAG_CAPACITY)
    }

    /// Track tag ids `1..=capacity`.
    pub fn with_capacity(strategy: Strategy, capacity: usize) -> Self {
        Self {
            handle: LocalizationHandle::new(capacity),
            working: CandidateSet::with_capacity(capacity),
            strategy,
            cache: RobotPose::default(),
            visible: Vec::new(),
            bus: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
            last_stats: Instant::now(),
        }
    }

    /// Publish tag tracking changes to `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// A handle for producers and consumers; clone it freely.
    pub fn handle(&self) -> LocalizationHandle {
        self.handle.clone()
    }

    /// Ingest pending candidates and refresh the pose once.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::DataConsistency`] from stale eviction, after
    /// halting the pose store.
    pub fn cycle(&mut self) -> Result<(), LocalizationError> {
        let Some(mut pending) = self.handle.inner.pending.try_lock() else {
            debug!("pending set busy; skipping fusion cycle");
            return Ok(());
        };
        let incoming = mem::replace(
            &mut *pending,
            CandidateSet::with_capacity(self.handle.inner.capacity),
        );
        drop(pending);

        self.working.merge(incoming);
        if let Err(e) = self.working.clear_stale_now() {
            self.handle.inner.store.halt();
            return Err(e);
        }
        self.report_tracking_changes();

        if self.strategy.compute(&self.working, &mut self.cache) {
            if let Err(e) = self.handle.inner.store.set(self.cache) {
                warn!(error = %e, "could not publish robot pose this cycle");
            }
        }

        if self.last_stats.elapsed() >= self.stats_interval {
            self.last_stats = Instant::now();
            self.log_statistics();
        }
        Ok(())
    }

    fn report_tracking_changes(&mut self) {
        let now = self.working.visible_tags();
        let started = now.iter().filter(|id| !self.visible.contains(id));
        let lost = self.visible.iter().filter(|id| !now.contains(id));
        let changes: Vec<(u32, bool)> = started
            .map(|&id| (id, true))
            .chain(lost.map(|&id| (id, false)))
            .collect();

        for (tag_id, tracked) in changes {
            if tracked {
                info!(tag_id, "started tracking tag {tag_id}");
            } else {
                info!(tag_id, "lost tracking on tag {tag_id}");
            }
            if let Some(bus) = &self.bus {
                let event = Event::new(SOURCE, EventPayload::TagTracking { tag_id, tracked });
                // Nobody listening is fine.
                let _ = bus.publish_to(Topic::TagTracking, event);
            }
        }
        self.visible = now;
    }

    fn log_statistics(&self) {
        let Some(stats) = PoseStatistics::from_poses(self.working.iter().map(Candidate::global))
        else {
            return;
        };
        let [x, y, z] = stats.mean_translation;
        let [sx, sy, sz] = stats.std_translation;
        let [roll, pitch, yaw] = stats.mean_rpy;
        let [sroll, spitch, syaw] = stats.std_rpy;
        info!(
            candidates = stats.count,
            tags = self.visible.len(),
            strategy = self.strategy.name(),
            x, y, z, sx, sy, sz, roll, pitch, yaw, sroll, spitch, syaw,
            "candidate statistics"
        );
    }
}

impl Task for LocalizationWorker {
    fn init(&mut self, _ctx: &WorkerContext) -> Result<(), LocalizationError> {
        self.working.clear_all();
        self.visible.clear();
        self.last_stats = Instant::now();
        info!(strategy = self.strategy.name(), "localization started");
        Ok(())
    }

    fn execute(&mut self, _ctx: &WorkerContext) -> Result<(), LocalizationError> {
        self.cycle()
    }

    fn finish(&mut self, _ctx: &WorkerContext) {
        info!(tracked = self.working.len(), "localization stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagloc_perception::{KMeansStrategy, MeanStrategy};
    use tagloc_types::{CandidateFrames, PixelCoords, RigidPose, clock};

    fn candidate(tag_id: u32, camera_id: u32, error: f64, x: f64, timestamp_ns: u64) -> Candidate {
        Candidate::new(
            tag_id,
            camera_id,
            timestamp_ns,
            error,
            CandidateFrames {
                tag: RigidPose::identity(),
                camera: RigidPose::identity(),
                robot: RigidPose::identity(),
                global: RigidPose::from_translation(x, 0.0, 0.0),
            },
            PixelCoords::default(),
        )
    }

    #[test]
    fn store_starts_at_identity() {
        let store = PoseStore::new();
        assert_eq!(store.get().unwrap(), RobotPose::default());
    }

    #[test]
    fn halted_store_refuses_reads_and_writes() {
        let store = PoseStore::new();
        store.halt();
        assert_eq!(store.get().unwrap_err(), LocalizationError::Halted);
        assert_eq!(store.set(RobotPose::default()).unwrap_err(), LocalizationError::Halted);
    }

    #[test]
    fn store_read_times_out_under_writer() {
        let store = PoseStore::new();
        let _writer = store.pose.write();
        assert!(matches!(store.get(), Err(LocalizationError::LockTimeout(_))));
    }

    #[test]
    fn queued_candidates_reach_the_pose() {
        let mut worker = LocalizationWorker::default();
        let handle = worker.handle();
        let now = clock::now_ns();
        assert!(handle.queue_tag(candidate(1, 0, 0.1, 3.0, now)));
        assert!(handle.queue_tag(candidate(2, 1, 0.1, 5.0, now)));
        assert_eq!(handle.pending_len(), 2);

        worker.cycle().unwrap();
        assert_eq!(handle.pending_len(), 0);
        let pose = handle.get_robot_pose().unwrap();
        assert!((pose.global.translation.x - 4.0).abs() < 1e-12);
    }

    #[test]
    fn one_tag_from_two_cameras_is_averaged() {
        let mut worker = LocalizationWorker::default();
        let handle = worker.handle();
        let now = clock::now_ns();
        assert!(handle.queue_tag(candidate(1, 0, 0.1, 3.0, now)));
        assert!(handle.queue_tag(candidate(1, 1, 0.1, 5.0, now)));

        worker.cycle().unwrap();
        let pose = handle.get_robot_pose().unwrap();
        assert!((pose.global.translation.x - 4.0).abs() < 1e-12);
    }

    #[test]
    fn ambiguity_resolved_by_reprojection_error() {
        let mut worker = LocalizationWorker::new(Strategy::Mean(MeanStrategy::default()));
        let handle = worker.handle();
        let now = clock::now_ns();
        let mut frame = CandidateSet::new();
        frame.add(candidate(4, 0, 0.8, 10.0, now)).unwrap();
        frame.add(candidate(4, 0, 0.3, 2.0, now)).unwrap();
        assert!(handle.queue_tags(frame));

        worker.cycle().unwrap();
        let pose = handle.get_robot_pose().unwrap();
        assert!((pose.global.translation.x - 2.0).abs() < 1e-12);
    }

    #[test]
    fn no_data_keeps_previous_pose() {
        let mut worker = LocalizationWorker::new(Strategy::KMeans(KMeansStrategy::default()));
        let handle = worker.handle();
        assert!(handle.queue_tag(candidate(1, 0, 0.1, 6.0, clock::now_ns())));
        worker.cycle().unwrap();
        let first = handle.get_robot_pose().unwrap();
        assert!((first.global.translation.x - 6.0).abs() < 1e-9);

        // Let the only candidate expire so the next cycle has nothing to fuse.
        std::thread::sleep(Duration::from_millis(tagloc_types::STALE_THRESHOLD_MS + 50));
        worker.cycle().unwrap();
        assert!(worker.working.is_empty());
        assert_eq!(handle.get_robot_pose().unwrap(), first);
    }

    #[test]
    fn stale_candidates_are_evicted() {
        let mut worker = LocalizationWorker::default();
        let handle = worker.handle();
        assert!(handle.queue_tag(candidate(1, 0, 0.1, 9.0, clock::now_ns())));
        std::thread::sleep(Duration::from_millis(tagloc_types::STALE_THRESHOLD_MS + 50));
        worker.cycle().unwrap();
        assert!(worker.working.is_empty());
        assert_eq!(handle.get_robot_pose().unwrap(), RobotPose::default());
    }

    #[test]
    fn queue_times_out_while_pending_is_held() {
        let worker = LocalizationWorker::default();
        let handle = worker.handle();
        let _held = handle.inner.pending.lock();
        let started = Instant::now();
        assert!(!handle.queue_tag(candidate(1, 0, 0.1, 0.0, 0)));
        assert!(!handle.queue_tags(CandidateSet::new()));
        assert!(started.elapsed() >= QUEUE_LOCK_TIMEOUT);
    }

    #[test]
    fn contended_cycle_is_skipped() {
        let mut worker = LocalizationWorker::default();
        let handle = worker.handle();
        let held = handle.inner.pending.lock();
        assert!(worker.cycle().is_ok());
        drop(held);
    }

    #[test]
    fn out_of_range_tag_is_rejected_at_queue() {
        let worker = LocalizationWorker::with_capacity(Strategy::default(), 5);
        let handle = worker.handle();
        assert!(!handle.queue_tag(candidate(6, 0, 0.1, 0.0, 0)));
        assert_eq!(handle.pending_len(), 0);
    }

    #[test]
    fn tracking_changes_are_published() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::TagTracking);
        let mut worker = LocalizationWorker::default().with_bus(bus);
        let handle = worker.handle();

        assert!(handle.queue_tag(candidate(3, 0, 0.1, 1.0, clock::now_ns())));
        worker.cycle().unwrap();
        match rx.try_recv().unwrap().payload {
            EventPayload::TagTracking { tag_id, tracked } => {
                assert_eq!(tag_id, 3);
                assert!(tracked);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        worker.working.clear_all();
        worker.cycle().unwrap();
        match rx.try_recv().unwrap().payload {
            EventPayload::TagTracking { tag_id, tracked } => {
                assert_eq!(tag_id, 3);
                assert!(!tracked);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
