//! Single-slot handoff between the submitting task and the worker threads.
//!
//! At most one item waits in the channel. Sending is async with a bounded
//! timeout; receiving blocks a worker thread until an item arrives or the last
//! sender is gone.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

const CAPACITY: usize = 1;

/// Create a connected sender/receiver pair.
pub fn channel<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(CAPACITY);
    (
        HandoffSender { tx },
        HandoffReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Why an item was not handed off. The item is returned to the caller.
pub enum SendError<T> {
    /// The slot stayed occupied for the whole timeout.
    Timeout(T),
    /// Every receiver is gone.
    Closed(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Timeout(item) | SendError::Closed(item) => item,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SendError::Timeout(_))
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Timeout(_) => f.write_str("Timeout(..)"),
            SendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Timeout(_) => f.write_str("handoff slot occupied past timeout"),
            SendError::Closed(_) => f.write_str("handoff channel closed"),
        }
    }
}

pub struct HandoffSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> HandoffSender<T> {
    pub async fn send(&self, item: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.tx.send_timeout(item, timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(item) => SendError::Timeout(item),
            mpsc::error::SendTimeoutError::Closed(item) => SendError::Closed(item),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side, shared by every worker.
///
/// Must only be used from plain OS threads: `receive` blocks and panics inside
/// an async runtime context.
pub struct HandoffReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for HandoffReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> HandoffReceiver<T> {
    /// Block until an item arrives. `None` once closed and drained.
    pub fn receive(&self) -> Option<T> {
        let mut rx = match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Handoff receiver mutex poisoned - recovering");
                poisoned.into_inner()
            }
        };
        rx.blocking_recv()
    }
}
