//! Off-thread request dispatch.
//!
//! A fixed pool of worker threads takes delegated requests from the accept path:
//! - `AdmissionGate` counts idle workers (non-blocking acquire on submit)
//! - `HandoffChannel` moves one request at a time to whichever worker is waiting
//! - `WorkerPool` runs handlers and completes each request exactly once
//! - `Dispatcher` ties them together behind `submit`

mod dispatcher;
mod gate;
mod handoff;
mod pool;
mod request;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{
    Accepted, BusyReason, DispatchConfig, DispatchError, DispatchStats, Dispatcher,
    UnavailableReason,
};
pub use gate::{AdmissionGate, GateError};
pub use handoff::{HandoffReceiver, HandoffSender, SendError, channel};
pub use pool::{
    HandoffItem, Handler, ShutdownReport, WorkerContext, WorkerPool, WorkerSlot, WorkerState,
};
pub use request::{CompletionError, ExtendError, ExtendRequest, ExtendedRequest};

/// Failure to bring the dispatch subsystem up.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("admission gate capacity must be at least 1")]
    ZeroCapacity,
    #[error("no dispatch worker could be started: {0}")]
    NoWorkers(std::io::Error),
}
