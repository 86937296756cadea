//! [`Supervisor`] – owns every worker of the process and watches for fatal
//! errors.
//!
//! Call [`Supervisor::check_all`] (or let [`Supervisor::run_until`] do it)
//! to collect workers that terminated on a fatal error.  The first one found
//! brings the whole process down: every worker is stopped and joined and the
//! error is handed back to `main`.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tagloc_middleware::{EventBus, Topic};
use tagloc_types::{Event, EventPayload, LocalizationError};
use tracing::{error, info, warn};

use crate::worker::Worker;

/// How often [`Supervisor::run_until`] polls worker state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const SOURCE: &str = "tagloc-runtime::supervisor";

/// Why [`Supervisor::run_until`] returned successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The shutdown channel fired or was disconnected.
    Requested,
    /// Every worker stopped on its own.
    Drained,
}

/// A worker that terminated on a fatal error.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerFault {
    pub worker: String,
    pub error: LocalizationError,
}

#[derive(Default)]
pub struct Supervisor {
    workers: Vec<Worker>,
    bus: Option<EventBus>,
    poll_interval: Option<Duration>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish faults to [`Topic::SystemAlerts`] on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Take ownership of `worker`.  Workers start in insertion order and stop
    /// in reverse.
    pub fn add(&mut self, worker: Worker) {
        self.workers.push(worker);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker(&self, name: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.name() == name)
    }

    /// Number of workers whose thread is still running.
    pub fn running(&self) -> usize {
        self.workers.iter().filter(|w| !w.stopped()).count()
    }

    /// Start every worker.
    ///
    /// # Errors
    ///
    /// The first start failure; workers already started are stopped again.
    pub fn start_all(&mut self) -> Result<(), LocalizationError> {
        for i in 0..self.workers.len() {
            if let Err(e) = self.workers[i].start() {
                error!(worker = %self.workers[i].name(), error = %e, "failed to start worker");
                self.stop_all();
                return Err(e);
            }
        }
        info!(workers = self.workers.len(), "all workers started");
        Ok(())
    }

    /// Stop and join every worker, last added first.
    pub fn stop_all(&mut self) {
        for worker in self.workers.iter_mut().rev() {
            worker.stop(true);
        }
        info!("all workers stopped");
    }

    /// Workers that have terminated on a fatal error.
    pub fn check_all(&self) -> Vec<WorkerFault> {
        self.workers
            .iter()
            .filter_map(|w| {
                w.fatal_error().map(|error| WorkerFault {
                    worker: w.name().to_string(),
                    error,
                })
            })
            .collect()
    }

    /// Supervise until `shutdown` fires, every worker has stopped, or a
    /// worker fails fatally.  All workers are stopped and joined before
    /// returning.
    ///
    /// # Errors
    ///
    /// The first fatal [`LocalizationError`] reported by a worker.
    pub fn run_until(&mut self, shutdown: &Receiver<()>) -> Result<Shutdown, LocalizationError> {
        let poll = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        let outcome = loop {
            if let Some(fault) = self.check_all().into_iter().next() {
                error!(worker = %fault.worker, error = %fault.error, "fatal worker error; shutting down");
                self.alert(&fault);
                break Err(fault.error);
            }
            if self.running() == 0 {
                info!("every worker has stopped");
                break Ok(Shutdown::Drained);
            }
            match shutdown.recv_timeout(poll) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("shutdown requested");
                    break Ok(Shutdown::Requested);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        };
        self.stop_all();
        outcome
    }

    fn alert(&self, fault: &WorkerFault) {
        let Some(bus) = &self.bus else {
            return;
        };
        let event = Event::new(
            SOURCE,
            EventPayload::WorkerFault {
                worker: fault.worker.clone(),
                message: fault.error.to_string(),
            },
        );
        if bus.publish_to(Topic::SystemAlerts, event).is_err() {
            warn!(worker = %fault.worker, "no listeners for worker fault alert");
        }
    }
}
