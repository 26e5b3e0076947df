//! Request dispatcher: the submission entry point used by the accept path.
//!
//! `submit` extends the request's lifetime, takes an admission token without
//! blocking, and hands the request to a worker within a bounded timeout. It
//! returns as soon as the handoff succeeds; the handler runs and the request is
//! completed on the worker.
//!
//! A request rejected at any step is completed before `submit` returns, so no
//! handle outlives a rejection.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;

use super::InitError;
use super::gate::AdmissionGate;
use super::handoff::{HandoffSender, channel};
use super::pool::{Handler, HandoffItem, ShutdownReport, WorkerPool};
use super::request::{ExtendRequest, ExtendedRequest};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker threads (and admission tokens).
    pub workers: usize,
    /// Longest `submit` waits for the handoff slot.
    pub send_timeout: Duration,
    pub worker_stack_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            send_timeout: Duration::from_millis(100),
            worker_stack_size: 256 * 1024,
        }
    }
}

/// The request now belongs to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusyReason {
    #[error("no idle worker")]
    NoIdleWorker,
    #[error("handoff slot occupied")]
    HandoffTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UnavailableReason {
    #[error("dispatch subsystem failed to initialize")]
    NotInitialized,
    #[error("request could not be deferred")]
    ExtendFailed,
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch busy: {0}")]
    Busy(BusyReason),
    #[error("dispatch unavailable: {0}")]
    Unavailable(UnavailableReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub total: usize,
    pub idle: usize,
}

struct DispatchCore<H> {
    gate: Arc<AdmissionGate>,
    sender: RwLock<Option<HandoffSender<HandoffItem<H>>>>,
    pool: Mutex<Option<WorkerPool>>,
    workers: usize,
}

impl<H> DispatchCore<H> {
    fn sender(&self) -> Option<HandoffSender<HandoffItem<H>>> {
        match self.sender.read() {
            Ok(guard) => guard.as_ref().cloned(),
            Err(poisoned) => poisoned.into_inner().as_ref().cloned(),
        }
    }
}

pub struct Dispatcher<H: ExtendedRequest> {
    core: Option<DispatchCore<H>>,
    send_timeout: Duration,
}

impl<H: ExtendedRequest> Dispatcher<H> {
    /// Start the worker pool.
    ///
    /// On failure the error is logged and an unavailable dispatcher is
    /// returned: every `submit` on it fails fast.
    pub fn start(config: DispatchConfig) -> Self {
        match Self::try_start(config.clone()) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start dispatch workers - async routes unavailable");
                Self {
                    core: None,
                    send_timeout: config.send_timeout,
                }
            }
        }
    }

    pub fn try_start(config: DispatchConfig) -> Result<Self, InitError> {
        let gate = Arc::new(AdmissionGate::new(config.workers)?);
        let (sender, receiver) = channel();
        let pool = WorkerPool::spawn::<H>(
            config.workers,
            config.worker_stack_size,
            Arc::clone(&gate),
            receiver,
        )?;

        tracing::info!(
            workers = pool.size(),
            send_timeout_ms = config.send_timeout.as_millis() as u64,
            "Dispatch workers started"
        );

        Ok(Self {
            core: Some(DispatchCore {
                gate,
                sender: RwLock::new(Some(sender)),
                workers: pool.size(),
                pool: Mutex::new(Some(pool)),
            }),
            send_timeout: config.send_timeout,
        })
    }

    /// A dispatcher with no workers. Every submission fails with `Unavailable`.
    pub fn unavailable() -> Self {
        Self {
            core: None,
            send_timeout: DispatchConfig::default().send_timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.core
            .as_ref()
            .and_then(|core| core.sender())
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Wait until every worker has announced readiness, or `timeout` passes.
    ///
    /// Returns whether the pool is fully idle. Always false when unavailable.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let Some(core) = &self.core else {
            return false;
        };
        let ready = async {
            while core.gate.available() < core.workers {
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, ready).await.is_ok()
    }

    pub fn stats(&self) -> DispatchStats {
        match &self.core {
            Some(core) => DispatchStats {
                total: core.workers,
                idle: core.gate.available(),
            },
            None => DispatchStats { total: 0, idle: 0 },
        }
    }

    /// Hand `request` to an idle worker which will run `handler` on it.
    ///
    /// Never waits longer than the configured send timeout.
    pub async fn submit<R>(&self, request: R, handler: Handler<H>) -> Result<Accepted, DispatchError>
    where
        R: ExtendRequest<Extended = H>,
    {
        let extended = request.begin_extension().map_err(|e| {
            tracing::warn!(error = %e, "Failed to defer request");
            DispatchError::Unavailable(UnavailableReason::ExtendFailed)
        })?;

        let Some(core) = &self.core else {
            release_unrun(extended);
            return Err(DispatchError::Unavailable(UnavailableReason::NotInitialized));
        };
        let Some(sender) = core.sender() else {
            release_unrun(extended);
            return Err(DispatchError::Unavailable(UnavailableReason::ShuttingDown));
        };

        if !core.gate.try_acquire(Duration::ZERO) {
            tracing::debug!(request = %extended.label(), "No idle dispatch worker");
            release_unrun(extended);
            return Err(DispatchError::Busy(BusyReason::NoIdleWorker));
        }

        match sender
            .send(HandoffItem::new(extended, handler), self.send_timeout)
            .await
        {
            Ok(()) => Ok(Accepted),
            Err(e) => {
                // The worker behind the token is still idle, so the token goes back.
                if let Err(gate_error) = core.gate.release() {
                    tracing::warn!(error = %gate_error, "Could not return admission token");
                }
                let reason = if e.is_timeout() {
                    tracing::warn!(
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "Handoff slot still occupied after timeout"
                    );
                    DispatchError::Busy(BusyReason::HandoffTimeout)
                } else {
                    DispatchError::Unavailable(UnavailableReason::ShuttingDown)
                };
                release_unrun(e.into_inner().into_request());
                Err(reason)
            }
        }
    }

    /// Stop accepting work and wait up to `grace` for the workers to exit.
    ///
    /// The request already sitting in the handoff slot, if any, is still run.
    /// Handlers still executing after `grace` are left to finish on their
    /// detached threads.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let Some(core) = &self.core else {
            return ShutdownReport::default();
        };

        match core.sender.write() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }

        let pool = match core.pool.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(pool) = pool else {
            return ShutdownReport::default();
        };

        let report = tokio::task::spawn_blocking(move || pool.join(grace))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Dispatch shutdown task failed");
                ShutdownReport::default()
            });

        tracing::info!(
            exited = report.exited,
            abandoned = report.abandoned,
            "Dispatch workers stopped"
        );
        report
    }
}

/// Complete a request whose handler never ran.
fn release_unrun<H: ExtendedRequest>(request: H) {
    if let Err(e) = request.complete() {
        tracing::warn!(error = %e, "Failed to release rejected request");
    }
}
