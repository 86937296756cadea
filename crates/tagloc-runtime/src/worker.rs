//! [`Worker`] – a fault-tolerant periodic task on its own OS thread.
//!
//! A worker owns a boxed [`Task`] and drives it through
//! `init → execute* → finish` at a configurable frequency.  Timing comes from
//! a periodic ticker ([`crossbeam::channel::tick`]): ticks are never queued
//! beyond one, so an `execute` that overruns its period simply delays the next
//! call instead of triggering a burst of catch-up calls.
//!
//! # Lifecycle
//!
//! | Trigger | Effect |
//! |---|---|
//! | [`Worker::stop`]`(true)` | `finish`, thread exits, the call waits for it |
//! | [`Worker::stop`]`(false)`, stay-alive | soft restart: `init` again, no `finish` |
//! | [`Worker::stop`]`(false)`, not stay-alive | `finish`, thread exits |
//! | fatal error (see [`LocalizationError::is_fatal`]) | `finish`, error recorded, thread exits |
//! | device error, stay-alive | wait the restart backoff, then soft restart |
//! | other error, stay-alive | soft restart |
//! | other error, not stay-alive | `finish`, thread exits |
//!
//! A hung `execute` hangs [`Worker::stop`]: stop requests are only observed
//! between calls.
//!
//! # Example
//!
//! ```rust
//! use tagloc_runtime::worker::{Task, Worker, WorkerContext};
//! use tagloc_types::LocalizationError;
//!
//! struct Heartbeat;
//!
//! impl Task for Heartbeat {
//!     fn execute(&mut self, _ctx: &WorkerContext) -> Result<(), LocalizationError> {
//!         Ok(())
//!     }
//! }
//!
//! let mut worker = Worker::new("heartbeat", false, 50.0, Box::new(Heartbeat));
//! worker.start().unwrap();
//! assert!(worker.stop(true));
//! worker.join();
//! assert!(worker.stopped());
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use tagloc_types::LocalizationError;
use tracing::{debug, error, info, warn};

/// How long setting accessors wait for the settings lock before giving up.
pub const SETTINGS_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// Default pause before re-initialising after a device error.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Number of execute-to-execute intervals averaged by
/// [`Worker::measured_frequency`].
const FREQUENCY_WINDOW: usize = 10;

/// Execution-time statistics are logged once per this many executions.
const STATS_EVERY: u64 = 500;

const FALLBACK_FREQUENCY_HZ: f64 = 1.0;

// ─────────────────────────────────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────────────────────────────────

/// The work a [`Worker`] runs.
pub trait Task: Send + 'static {
    /// Acquire resources.  Runs on first start and on every soft restart.
    fn init(&mut self, _ctx: &WorkerContext) -> Result<(), LocalizationError> {
        Ok(())
    }

    /// One periodic unit of work.
    fn execute(&mut self, ctx: &WorkerContext) -> Result<(), LocalizationError>;

    /// Release resources.  Runs once when the worker terminates.
    fn finish(&mut self, _ctx: &WorkerContext) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

struct Settings {
    frequency_hz: f64,
    stay_alive: bool,
}

struct Shared {
    name: String,
    settings: Mutex<Settings>,
    measured_hz: AtomicU64,
    running: AtomicBool,
    stop_requested: AtomicBool,
    restart_requested: AtomicBool,
    fatal: Mutex<Option<LocalizationError>>,
    wake: Sender<()>,
}

impl Shared {
    fn wake(&self) {
        // A pending wake-up is as good as two.
        let _ = self.wake.try_send(());
    }

    fn frequency(&self) -> Option<f64> {
        self.settings
            .try_lock_for(SETTINGS_LOCK_TIMEOUT)
            .map(|s| s.frequency_hz)
    }

    fn execution_frequency(&self) -> f64 {
        self.frequency().unwrap_or_else(|| {
            warn!(worker = %self.name, "settings lock timed out reading frequency");
            0.0
        })
    }

    fn set_execution_frequency(&self, hz: f64) {
        if !(hz.is_finite() && hz > 0.0) {
            warn!(worker = %self.name, hz, "ignoring invalid execution frequency");
            return;
        }
        match self.settings.try_lock_for(SETTINGS_LOCK_TIMEOUT) {
            Some(mut s) => s.frequency_hz = hz,
            None => {
                warn!(worker = %self.name, hz, "settings lock timed out; frequency unchanged");
                return;
            }
        }
        self.wake();
    }

    fn stay_alive(&self) -> bool {
        match self.settings.try_lock_for(SETTINGS_LOCK_TIMEOUT) {
            Some(s) => s.stay_alive,
            None => {
                warn!(worker = %self.name, "settings lock timed out reading stay-alive");
                false
            }
        }
    }

    fn measured_frequency(&self) -> f64 {
        f64::from_bits(self.measured_hz.load(Ordering::Relaxed))
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn request_restart(&self) {
        self.restart_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WorkerContext
// ─────────────────────────────────────────────────────────────────────────────

/// Handle given to a running [`Task`] for controlling its own worker.
#[derive(Clone)]
pub struct WorkerContext {
    shared: Arc<Shared>,
}

impl WorkerContext {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Ask for a soft restart once the current call returns.
    pub fn request_restart(&self) {
        self.shared.request_restart();
    }

    /// Ask the worker to finish and exit once the current call returns.
    /// Never blocks, so it is safe to call from inside `execute`.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    pub fn execution_frequency(&self) -> f64 {
        self.shared.execution_frequency()
    }

    pub fn set_execution_frequency(&self, hz: f64) {
        self.shared.set_execution_frequency(hz);
    }

    pub fn measured_frequency(&self) -> f64 {
        self.shared.measured_frequency()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

/// A named periodic task with its own thread and restart policy.
pub struct Worker {
    shared: Arc<Shared>,
    wake_rx: Receiver<()>,
    task: Option<Box<dyn Task>>,
    handle: Option<JoinHandle<Box<dyn Task>>>,
    restart_backoff: Duration,
}

impl Worker {
    /// Create a stopped worker.  Non-positive frequencies fall back to 1 Hz.
    pub fn new(
        name: impl Into<String>,
        stay_alive: bool,
        frequency_hz: f64,
        task: Box<dyn Task>,
    ) -> Self {
        let name = name.into();
        let frequency_hz = if frequency_hz.is_finite() && frequency_hz > 0.0 {
            frequency_hz
        } else {
            warn!(worker = %name, frequency_hz, "invalid frequency; falling back to 1 Hz");
            FALLBACK_FREQUENCY_HZ
        };
        let (wake, wake_rx) = channel::bounded(1);
        Self {
            shared: Arc::new(Shared {
                name,
                settings: Mutex::new(Settings {
                    frequency_hz,
                    stay_alive,
                }),
                measured_hz: AtomicU64::new(0f64.to_bits()),
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                restart_requested: AtomicBool::new(false),
                fatal: Mutex::new(None),
                wake,
            }),
            wake_rx,
            task: Some(task),
            handle: None,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
        }
    }

    /// Pause applied before re-initialising after a device error.
    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the worker thread.  Starting a running worker is a no-op.
    ///
    /// # Errors
    ///
    /// [`LocalizationError::Io`] when the thread cannot be spawned or the
    /// task was lost to a panic in a previous run.
    pub fn start(&mut self) -> Result<(), LocalizationError> {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!(worker = %self.shared.name, "start requested while already running");
            return Ok(());
        }
        self.join();

        let task = self.task.take().ok_or_else(|| {
            LocalizationError::Io(format!("worker {} has no task to run", self.shared.name))
        })?;

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.restart_requested.store(false, Ordering::SeqCst);
        *self.shared.fatal.lock() = None;
        while self.wake_rx.try_recv().is_ok() {}
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let wake_rx = self.wake_rx.clone();
        let backoff = self.restart_backoff;
        let handle = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || run(shared, task, wake_rx, backoff))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                LocalizationError::Io(format!("failed to spawn worker {}: {e}", self.shared.name))
            })?;
        self.handle = Some(handle);
        info!(worker = %self.shared.name, "worker started");
        Ok(())
    }

    /// Request the worker to stop.
    ///
    /// With `interrupted == false` and stay-alive set this becomes a soft
    /// restart and returns `false` immediately.  Otherwise the worker
    /// finishes, this call blocks until its thread has exited, and returns
    /// `true`.
    pub fn stop(&mut self, interrupted: bool) -> bool {
        if !interrupted && self.shared.stay_alive() {
            info!(worker = %self.shared.name, "soft restart requested");
            self.shared.request_restart();
            return false;
        }
        self.shared.request_stop();
        self.join();
        true
    }

    /// Wait for the worker thread to exit.  Safe to call at any time.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(task) => self.task = Some(task),
                Err(_) => error!(worker = %self.shared.name, "worker thread panicked"),
            }
        }
    }

    /// `true` when the worker thread is not running.
    pub fn stopped(&self) -> bool {
        !self.shared.running.load(Ordering::SeqCst)
    }

    /// The error that terminated the worker, if it was fatal.
    pub fn fatal_error(&self) -> Option<LocalizationError> {
        self.shared.fatal.lock().clone()
    }

    /// Target frequency in Hz, or `0.0` if the settings lock timed out.
    pub fn execution_frequency(&self) -> f64 {
        self.shared.execution_frequency()
    }

    /// Change the target frequency; takes effect at the next tick.
    pub fn set_execution_frequency(&self, hz: f64) {
        self.shared.set_execution_frequency(hz);
    }

    /// Mean rate over the last few executions, `0.0` before two have run.
    pub fn measured_frequency(&self) -> f64 {
        self.shared.measured_frequency()
    }

    /// `false` if the settings lock timed out.
    pub fn stay_alive(&self) -> bool {
        self.shared.stay_alive()
    }

    pub fn set_stay_alive(&self, stay_alive: bool) {
        match self.shared.settings.try_lock_for(SETTINGS_LOCK_TIMEOUT) {
            Some(mut s) => s.stay_alive = stay_alive,
            None => warn!(worker = %self.shared.name, "settings lock timed out; stay-alive unchanged"),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop(true);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Thread body
// ─────────────────────────────────────────────────────────────────────────────

enum Outcome {
    Stop,
    Restart,
    Failed(LocalizationError),
}

#[derive(Default)]
struct Timing {
    last_start: Option<Instant>,
    intervals: VecDeque<Duration>,
    executions: u64,
    exec_total: Duration,
    exec_max: Duration,
}

impl Timing {
    fn begin(&mut self, shared: &Shared) -> Instant {
        let now = Instant::now();
        if let Some(previous) = self.last_start.replace(now) {
            if self.intervals.len() == FREQUENCY_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(now - previous);
            let mean = self.intervals.iter().sum::<Duration>() / self.intervals.len() as u32;
            if !mean.is_zero() {
                let hz = 1.0 / mean.as_secs_f64();
                shared.measured_hz.store(hz.to_bits(), Ordering::Relaxed);
            }
        }
        now
    }

    fn end(&mut self, shared: &Shared, started: Instant) {
        let took = started.elapsed();
        self.executions += 1;
        self.exec_total += took;
        self.exec_max = self.exec_max.max(took);
        if self.executions % STATS_EVERY == 0 {
            debug!(
                worker = %shared.name,
                executions = self.executions,
                mean_us = (self.exec_total / STATS_EVERY as u32).as_micros() as u64,
                max_us = self.exec_max.as_micros() as u64,
                measured_hz = shared.measured_frequency(),
                "execution time"
            );
            self.exec_total = Duration::ZERO;
            self.exec_max = Duration::ZERO;
        }
    }
}

fn period(hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / hz)
}

fn run(
    shared: Arc<Shared>,
    mut task: Box<dyn Task>,
    wake: Receiver<()>,
    backoff: Duration,
) -> Box<dyn Task> {
    let ctx = WorkerContext {
        shared: Arc::clone(&shared),
    };
    let mut timing = Timing::default();
    let mut initialised = false;

    loop {
        shared.restart_requested.store(false, Ordering::SeqCst);
        if shared.stop_requested.load(Ordering::SeqCst) {
            if initialised {
                task.finish(&ctx);
            }
            break;
        }

        debug!(worker = %shared.name, "initialising");
        initialised = true;
        let outcome = match task.init(&ctx) {
            Ok(()) => execute_loop(&shared, &ctx, task.as_mut(), &wake, &mut timing),
            Err(e) => Outcome::Failed(e),
        };

        match outcome {
            Outcome::Stop => {
                task.finish(&ctx);
                break;
            }
            Outcome::Restart => {
                info!(worker = %shared.name, "soft restart");
            }
            Outcome::Failed(e) if e.is_fatal() => {
                error!(worker = %shared.name, error = %e, "fatal error; worker terminating");
                task.finish(&ctx);
                *shared.fatal.lock() = Some(e);
                break;
            }
            Outcome::Failed(e) => {
                if !shared.stay_alive() || shared.stop_requested.load(Ordering::SeqCst) {
                    error!(worker = %shared.name, error = %e, "worker terminating");
                    task.finish(&ctx);
                    break;
                }
                if e.is_transient_device() {
                    warn!(
                        worker = %shared.name,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "device error; restarting after backoff"
                    );
                    if !sleep_unless_stopped(&shared, &wake, backoff) {
                        task.finish(&ctx);
                        break;
                    }
                } else {
                    error!(worker = %shared.name, error = %e, "restarting after error");
                }
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    info!(worker = %shared.name, "worker stopped");
    task
}

fn execute_loop(
    shared: &Shared,
    ctx: &WorkerContext,
    task: &mut dyn Task,
    wake: &Receiver<()>,
    timing: &mut Timing,
) -> Outcome {
    let mut hz = shared.frequency().unwrap_or(FALLBACK_FREQUENCY_HZ);
    let mut ticker = channel::tick(period(hz));
    timing.last_start = None;

    loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            return Outcome::Stop;
        }
        if shared.restart_requested.load(Ordering::SeqCst) {
            return Outcome::Restart;
        }
        if let Some(target) = shared.frequency() {
            if target != hz {
                debug!(worker = %shared.name, from = hz, to = target, "execution frequency changed");
                hz = target;
                ticker = channel::tick(period(hz));
            }
        }

        let ticked = select! {
            recv(ticker) -> _ => true,
            recv(wake) -> _ => false,
        };
        if !ticked {
            continue;
        }

        let started = timing.begin(shared);
        let result = task.execute(ctx);
        timing.end(shared, started);
        if let Err(e) = result {
            return Outcome::Failed(e);
        }
    }
}

/// Sleep for `duration`, returning `false` early if a stop is requested.
fn sleep_unless_stopped(shared: &Shared, wake: &Receiver<()>, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        let _ = wake.recv_timeout(remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        init: AtomicUsize,
        execute: AtomicUsize,
        finish: AtomicUsize,
    }

    type Behaviour = Box<dyn FnMut(usize, &WorkerContext) -> Result<(), LocalizationError> + Send>;

    struct Probe {
        counters: Arc<Counters>,
        behaviour: Behaviour,
    }

    impl Probe {
        fn new(counters: &Arc<Counters>) -> Box<Self> {
            Self::with(counters, |_, _| Ok(()))
        }

        fn with(
            counters: &Arc<Counters>,
            behaviour: impl FnMut(usize, &WorkerContext) -> Result<(), LocalizationError> + Send + 'static,
        ) -> Box<Self> {
            Box::new(Self {
                counters: Arc::clone(counters),
                behaviour: Box::new(behaviour),
            })
        }
    }

    impl Task for Probe {
        fn init(&mut self, _ctx: &WorkerContext) -> Result<(), LocalizationError> {
            self.counters.init.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn execute(&mut self, ctx: &WorkerContext) -> Result<(), LocalizationError> {
            let n = self.counters.execute.fetch_add(1, Ordering::SeqCst);
            (self.behaviour)(n, ctx)
        }

        fn finish(&mut self, _ctx: &WorkerContext) {
            self.counters.finish.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn new_worker_is_stopped() {
        let counters = Arc::new(Counters::default());
        let worker = Worker::new("idle", true, 10.0, Probe::new(&counters));
        assert!(worker.stopped());
        assert_eq!(worker.name(), "idle");
        assert_eq!(worker.measured_frequency(), 0.0);
        assert!(worker.fatal_error().is_none());
    }

    #[test]
    fn immediate_stop() {
        let counters = Arc::new(Counters::default());
        let mut worker = Worker::new("immediate", false, 100.0, Probe::new(&counters));
        worker.start().unwrap();
        assert!(worker.stop(true));
        assert!(worker.stopped());
        worker.join();
        assert_eq!(
            counters.init.load(Ordering::SeqCst),
            counters.finish.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn start_stop_without_stay_alive() {
        let counters = Arc::new(Counters::default());
        let mut worker = Worker::new("start-stop", false, 100.0, Probe::new(&counters));
        worker.start().unwrap();
        assert!(!worker.stopped());
        thread::sleep(Duration::from_millis(100));
        assert!(worker.stop(false), "stop(false) without stay-alive is terminal");
        worker.join();
        assert!(worker.stopped());
        assert_eq!(counters.init.load(Ordering::SeqCst), 1);
        assert_eq!(counters.finish.load(Ordering::SeqCst), 1);
        assert!(counters.execute.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn soft_restart_reinitialises_without_finish() {
        let counters = Arc::new(Counters::default());
        let mut worker = Worker::new("restart", true, 50.0, Probe::new(&counters));
        worker.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        assert!(!worker.stop(false));
        assert!(wait_until(
            || counters.init.load(Ordering::SeqCst) == 2,
            Duration::from_secs(1)
        ));
        assert!(!worker.stopped());

        assert!(worker.stop(true));
        worker.join();
        assert_eq!(counters.init.load(Ordering::SeqCst), 2);
        assert_eq!(counters.finish.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frequency_throttles_executions() {
        let counters = Arc::new(Counters::default());
        let mut worker = Worker::new("throttle", false, 10.0, Probe::new(&counters));
        worker.start().unwrap();
        thread::sleep(Duration::from_secs(5));
        let measured = worker.measured_frequency();
        worker.stop(true);
        worker.join();

        let executions = counters.execute.load(Ordering::SeqCst);
        assert!((45..=51).contains(&executions), "executions = {executions}");
        assert!((measured - 10.0).abs() < 1.0, "measured = {measured}");
    }

    #[test]
    fn high_frequency_worker_stops_promptly() {
        let counters = Arc::new(Counters::default());
        let mut worker = Worker::new("high-freq", false, 100_000.0, Probe::new(&counters));
        worker.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        let requested = Instant::now();
        worker.stop(true);
        worker.join();
        assert!(requested.elapsed() < Duration::from_millis(500));
        assert!(counters.execute.load(Ordering::SeqCst) > 10);
    }

    #[test]
    fn slow_execute_never_bursts() {
        let counters = Arc::new(Counters::default());
        let task = Probe::with(&counters, |_, _| {
            thread::sleep(Duration::from_millis(50));
            Ok(())
        });
        let mut worker = Worker::new("slow", false, 100.0, task);
        worker.start().unwrap();
        thread::sleep(Duration::from_millis(600));
        let measured = worker.measured_frequency();
        worker.stop(true);
        worker.join();

        assert!(measured > 0.0 && measured <= 20.5, "measured = {measured}");
        assert!(counters.execute.load(Ordering::SeqCst) <= 13);
    }

    #[test]
    fn fatal_error_bypasses_stay_alive() {
        let counters = Arc::new(Counters::default());
        let task = Probe::with(&counters, |n, _| {
            if n == 2 {
                Err(LocalizationError::DataConsistency {
                    evicted: 3,
                    tracked: 1,
                })
            } else {
                Ok(())
            }
        });
        let mut worker = Worker::new("fatal", true, 100.0, task);
        worker.start().unwrap();
        assert!(wait_until(|| worker.stopped(), Duration::from_secs(2)));
        worker.join();

        assert!(matches!(
            worker.fatal_error(),
            Some(LocalizationError::DataConsistency { .. })
        ));
        assert_eq!(counters.init.load(Ordering::SeqCst), 1);
        assert_eq!(counters.finish.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn device_error_restarts_after_backoff() {
        let counters = Arc::new(Counters::default());
        let task = Probe::with(&counters, |n, _| {
            if n == 0 {
                Err(LocalizationError::device("cam0", "unplugged"))
            } else {
                Ok(())
            }
        });
        let mut worker =
            Worker::new("backoff", true, 100.0, task).with_restart_backoff(Duration::from_millis(50));
        worker.start().unwrap();
        assert!(wait_until(
            || counters.execute.load(Ordering::SeqCst) >= 3,
            Duration::from_secs(2)
        ));
        worker.stop(true);
        worker.join();
        assert_eq!(counters.init.load(Ordering::SeqCst), 2);
        assert_eq!(counters.finish.load(Ordering::SeqCst), 1);
        assert!(worker.fatal_error().is_none());
    }

    #[test]
    fn stop_interrupts_backoff() {
        let counters = Arc::new(Counters::default());
        let task = Probe::with(&counters, |_, _| Err(LocalizationError::device("cam0", "gone")));
        let mut worker = Worker::new("backoff-stop", true, 100.0, task);
        worker.start().unwrap();
        assert!(wait_until(
            || counters.execute.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(1)
        ));
        let requested = Instant::now();
        worker.stop(true);
        worker.join();
        assert!(requested.elapsed() < Duration::from_secs(1));
        assert_eq!(counters.finish.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_without_stay_alive_terminates() {
        let counters = Arc::new(Counters::default());
        let task = Probe::with(&counters, |_, _| Err(LocalizationError::LockTimeout("x".into())));
        let mut worker = Worker::new("one-shot", false, 100.0, task);
        worker.start().unwrap();
        assert!(wait_until(|| worker.stopped(), Duration::from_secs(1)));
        worker.join();
        assert_eq!(counters.execute.load(Ordering::SeqCst), 1);
        assert_eq!(counters.finish.load(Ordering::SeqCst), 1);
        assert!(worker.fatal_error().is_none());
    }

    #[test]
    fn task_can_stop_itself() {
        let counters = Arc::new(Counters::default());
        let task = Probe::with(&counters, |n, ctx| {
            if n == 2 {
                ctx.request_stop();
            }
            Ok(())
        });
        let mut worker = Worker::new("self-stop", true, 200.0, task);
        worker.start().unwrap();
        assert!(wait_until(|| worker.stopped(), Duration::from_secs(1)));
        worker.join();
        assert_eq!(counters.execute.load(Ordering::SeqCst), 3);
        assert_eq!(counters.finish.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_can_be_restarted_after_join() {
        let counters = Arc::new(Counters::default());
        let mut worker = Worker::new("again", false, 100.0, Probe::new(&counters));
        worker.start().unwrap();
        worker.stop(true);
        worker.join();
        worker.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        worker.stop(true);
        worker.join();
        assert_eq!(counters.init.load(Ordering::SeqCst), 2);
        assert_eq!(counters.finish.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn settings_roundtrip_and_validation() {
        let counters = Arc::new(Counters::default());
        let worker = Worker::new("settings", false, 0.0, Probe::new(&counters));
        assert_eq!(worker.execution_frequency(), FALLBACK_FREQUENCY_HZ);
        worker.set_execution_frequency(25.0);
        assert_eq!(worker.execution_frequency(), 25.0);
        worker.set_execution_frequency(-3.0);
        assert_eq!(worker.execution_frequency(), 25.0);
        worker.set_stay_alive(true);
        assert!(worker.stay_alive());
    }

    #[test]
    fn settings_lock_timeout_returns_defaults() {
        let counters = Arc::new(Counters::default());
        let worker = Worker::new("contended", true, 30.0, Probe::new(&counters));
        let _held = worker.shared.settings.lock();
        assert_eq!(worker.execution_frequency(), 0.0);
        assert!(!worker.stay_alive());
    }
}
