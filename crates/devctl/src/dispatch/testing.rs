//! Instrumented request types for exercising the dispatch subsystem.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use super::pool::{Handler, WorkerContext, WorkerSlot};
use super::request::{CompletionError, ExtendError, ExtendRequest, ExtendedRequest};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct TallyInner {
    begun: AtomicUsize,
    ran: AtomicUsize,
    completed: AtomicUsize,
    leaked: AtomicUsize,
    last_slot: Mutex<Option<usize>>,
}

/// Shared counters observed by every request built from it.
#[derive(Clone, Default)]
pub(crate) struct Tally {
    inner: Arc<TallyInner>,
}

impl Tally {
    pub fn begun(&self) -> usize {
        self.inner.begun.load(Ordering::SeqCst)
    }

    pub fn ran(&self) -> usize {
        self.inner.ran.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn leaked(&self) -> usize {
        self.inner.leaked.load(Ordering::SeqCst)
    }

    pub fn last_slot(&self) -> Option<usize> {
        *self.inner.last_slot.lock().unwrap()
    }
}

pub(crate) struct TestRequest {
    tally: Tally,
    fail_begin: bool,
    fail_completion: bool,
    hold: Option<mpsc::Receiver<()>>,
}

impl TestRequest {
    pub fn new(tally: &Tally) -> Self {
        Self {
            tally: tally.clone(),
            fail_begin: false,
            fail_completion: false,
            hold: None,
        }
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn failing_completion(mut self) -> Self {
        self.fail_completion = true;
        self
    }

    /// The handler blocks until the returned sender fires (or is dropped).
    pub fn held(mut self) -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel();
        self.hold = Some(rx);
        (tx, self)
    }

    pub fn begin(self) -> TestDeferred {
        self.begin_extension().unwrap()
    }
}

impl ExtendRequest for TestRequest {
    type Extended = TestDeferred;

    fn begin_extension(self) -> Result<TestDeferred, ExtendError> {
        if self.fail_begin {
            return Err(ExtendError::Other("begin refused".to_string()));
        }
        self.tally.inner.begun.fetch_add(1, Ordering::SeqCst);
        Ok(TestDeferred {
            tally: self.tally,
            fail_completion: self.fail_completion,
            hold: self.hold,
            completed: false,
        })
    }
}

pub(crate) struct TestDeferred {
    tally: Tally,
    fail_completion: bool,
    hold: Option<mpsc::Receiver<()>>,
    completed: bool,
}

impl TestDeferred {
    pub fn record_run(&mut self, slot: WorkerSlot) {
        self.tally.inner.ran.fetch_add(1, Ordering::SeqCst);
        *self.tally.inner.last_slot.lock().unwrap() = Some(slot.index());
        if let Some(hold) = self.hold.take() {
            let _ = hold.recv();
        }
    }
}

impl ExtendedRequest for TestDeferred {
    fn label(&self) -> Cow<'_, str> {
        Cow::Borrowed("test")
    }

    fn complete(mut self) -> Result<(), CompletionError> {
        self.completed = true;
        self.tally.inner.completed.fetch_add(1, Ordering::SeqCst);
        if self.fail_completion {
            return Err(CompletionError::ClientGone);
        }
        Ok(())
    }
}

impl Drop for TestDeferred {
    fn drop(&mut self) {
        if !self.completed {
            self.tally.inner.leaked.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub(crate) fn recording_handler() -> Handler<TestDeferred> {
    Arc::new(|req: &mut TestDeferred, ctx: &WorkerContext| req.record_run(ctx.slot()))
}

/// Poll `condition` until it holds or the wait limit passes.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
