//! Fixed pool of dispatch worker threads.
//!
//! Each worker loops forever:
//! 1. Announce readiness on the admission gate
//! 2. Block on the handoff channel
//! 3. Run the handler against the request
//! 4. Complete the request, then go back to 1
//!
//! Readiness is announced before blocking so the gate never counts a worker
//! that is still busy. Handler panics are caught; completion always runs.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::InitError;
use super::gate::AdmissionGate;
use super::handoff::HandoffReceiver;
use super::request::ExtendedRequest;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Work to run on a worker against a deferred request.
///
/// The handler owns whatever collaborators it needs. Its response, if any,
/// goes through the request handle; the pool never looks at it.
pub type Handler<H> = Arc<dyn Fn(&mut H, &WorkerContext) + Send + Sync>;

/// A deferred request paired with the handler that should run it.
pub struct HandoffItem<H> {
    request: H,
    handler: Handler<H>,
}

impl<H> HandoffItem<H> {
    pub fn new(request: H, handler: Handler<H>) -> Self {
        Self { request, handler }
    }

    pub fn into_request(self) -> H {
        self.request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerSlot(usize);

impl WorkerSlot {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Idle: announced on the gate, waiting for a handoff.
    Announcing,
    /// Running a handler.
    Executing,
}

/// Execution context handed to handlers.
///
/// Only the pool constructs one, so holding it proves the code runs on a
/// dispatch worker.
#[derive(Debug)]
pub struct WorkerContext {
    slot: WorkerSlot,
}

impl WorkerContext {
    pub fn slot(&self) -> WorkerSlot {
        self.slot
    }
}

/// Outcome of waiting for the workers to exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited within the grace period.
    pub exited: usize,
    /// Workers still running a handler when the grace period ran out.
    pub abandoned: usize,
}

struct Worker {
    slot: WorkerSlot,
    executing: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Start `size` workers.
    ///
    /// A worker that fails to start is logged and skipped; the pool only fails
    /// when none start.
    pub fn spawn<H: ExtendedRequest>(
        size: usize,
        stack_size: usize,
        gate: Arc<AdmissionGate>,
        receiver: HandoffReceiver<HandoffItem<H>>,
    ) -> Result<Self, InitError> {
        let mut workers = Vec::with_capacity(size);
        let mut last_error = None;

        for index in 0..size {
            let slot = WorkerSlot(index);
            let executing = Arc::new(AtomicBool::new(false));

            let spawned = std::thread::Builder::new()
                .name(format!("devctl-worker-{index}"))
                .stack_size(stack_size)
                .spawn({
                    let gate = Arc::clone(&gate);
                    let receiver = receiver.clone();
                    let executing = Arc::clone(&executing);
                    move || run_worker(slot, &gate, &receiver, &executing)
                });

            match spawned {
                Ok(thread) => workers.push(Worker {
                    slot,
                    executing,
                    thread,
                }),
                Err(e) => {
                    tracing::error!(worker = %slot, error = %e, "Failed to start dispatch worker");
                    last_error = Some(e);
                }
            }
        }

        if workers.is_empty() {
            let error = last_error
                .unwrap_or_else(|| std::io::Error::other("worker pool size is zero"));
            return Err(InitError::NoWorkers(error));
        }

        Ok(Self { workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn states(&self) -> Vec<(WorkerSlot, WorkerState)> {
        self.workers
            .iter()
            .map(|w| {
                let state = if w.executing.load(Ordering::Acquire) {
                    WorkerState::Executing
                } else {
                    WorkerState::Announcing
                };
                (w.slot, state)
            })
            .collect()
    }

    /// Wait up to `grace` for every worker to exit, then join the ones that did.
    ///
    /// Workers only exit once the handoff channel is closed, so close it first.
    /// Threads still running afterwards are detached.
    /// A `grace` too large to represent as a deadline waits for every worker.
    pub fn join(self, grace: Duration) -> ShutdownReport {
        let deadline = Instant::now().checked_add(grace);
        while deadline.is_none_or(|d| Instant::now() < d)
            && !self.workers.iter().all(|w| w.thread.is_finished())
        {
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }

        let mut report = ShutdownReport::default();
        for worker in self.workers {
            if worker.thread.is_finished() {
                if worker.thread.join().is_err() {
                    tracing::error!(worker = %worker.slot, "Dispatch worker panicked");
                }
                report.exited += 1;
            } else {
                tracing::warn!(worker = %worker.slot, "Dispatch worker still busy at shutdown - abandoning");
                report.abandoned += 1;
            }
        }
        report
    }
}

fn run_worker<H: ExtendedRequest>(
    slot: WorkerSlot,
    gate: &AdmissionGate,
    receiver: &HandoffReceiver<HandoffItem<H>>,
    executing: &AtomicBool,
) {
    tracing::info!(worker = %slot, "Starting dispatch worker");
    let context = WorkerContext { slot };

    loop {
        executing.store(false, Ordering::Release);
        if let Err(e) = gate.release() {
            tracing::error!(worker = %slot, error = %e, "Bug: readiness announced out of turn");
        }

        let Some(HandoffItem {
            mut request,
            handler,
        }) = receiver.receive()
        else {
            break;
        };
        executing.store(true, Ordering::Release);

        tracing::info!(worker = %slot, request = %request.label(), "Invoking handler");
        if catch_unwind(AssertUnwindSafe(|| handler(&mut request, &context))).is_err() {
            tracing::error!(worker = %slot, "Handler panicked");
        }

        if let Err(e) = request.complete() {
            tracing::error!(worker = %slot, error = %e, "Failed to complete deferred request");
        }
    }

    tracing::info!(worker = %slot, "Dispatch worker exiting");
}
