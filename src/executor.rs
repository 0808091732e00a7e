//! Bounded pool for response callbacks.
//!
//! Channel drivers never run application callbacks themselves: they hand
//! each terminal callback to a [`ResponseExecutor`], which runs it on at most
//! `max_workers` blocking threads. A slow or blocking callback therefore
//! only holds up other callbacks, never socket I/O or timers.
//!
//! Jobs are queued in submission order. A worker keeps draining the queue
//! until it is empty, then gives its slot back.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of callback workers.
pub const DEFAULT_RESPONSE_WORKERS: usize = 8;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs response callbacks off the channel drivers. Cheap to clone.
#[derive(Clone)]
pub struct ResponseExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Mutex<VecDeque<Job>>,
    workers: Arc<Semaphore>,
    max_workers: usize,
}

impl ResponseExecutor {
    /// Create an executor running at most `max_workers` callbacks at once.
    ///
    /// Workers are started on demand, so this does not need a runtime.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                workers: Arc::new(Semaphore::new(max_workers)),
                max_workers,
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Callbacks waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Queue `job` and start a worker if one is free.
    pub(crate) fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.lock().push_back(Box::new(job));

        // All busy: whichever worker finishes next picks the job up.
        let Ok(permit) = self.inner.workers.clone().try_acquire_owned() else {
            return;
        };
        let inner = self.inner.clone();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || inner.work(permit));
            }
            Err(_) => inner.work(permit),
        }
    }
}

impl Default for ResponseExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_WORKERS)
    }
}

impl std::fmt::Debug for ResponseExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseExecutor")
            .field("max_workers", &self.inner.max_workers)
            .field("queued", &self.queued())
            .finish()
    }
}

impl Inner {
    fn pop(&self) -> Option<Job> {
        self.queue.lock().pop_front()
    }

    fn work(self: Arc<Self>, permit: OwnedSemaphorePermit) {
        let mut permit = permit;
        loop {
            while let Some(job) = self.pop() {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Response callback panicked");
                }
            }
            drop(permit);

            // A job queued while this worker still held its slot found no
            // free worker; take it here.
            if self.queue.lock().is_empty() {
                return;
            }
            match self.workers.clone().try_acquire_owned() {
                Ok(next) => permit = next,
                Err(_) => return,
            }
        }
    }
}
