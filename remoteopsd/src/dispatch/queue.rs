use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::warn;

use super::operation::{OperationId, RemoteOperation};
use super::target::Target;

/// One queued unit of work.
#[derive(Clone)]
pub struct Job {
    pub id: OperationId,
    pub target: Target,
    pub operation: Arc<dyn RemoteOperation>,
}

impl Job {
    pub fn new(target: Target, operation: Arc<dyn RemoteOperation>) -> Self {
        Self {
            id: OperationId::new(),
            target,
            operation,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("operation", &self.operation.name())
            .finish()
    }
}

/// FIFO of pending jobs. The head stays queued while it runs and is popped
/// by the worker only after its result has been handed out.
#[derive(Default)]
pub struct JobQueue {
    inner: Mutex<VecDeque<Job>>,
    pushed: Notify,
    drained: Notify,
}

impl JobQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, job: Job) -> OperationId {
        let id = job.id;
        self.lock().push_back(job);
        self.pushed.notify_one();
        id
    }

    pub fn peek(&self) -> Option<Job> {
        self.lock().front().cloned()
    }

    /// Removes the head if it is `id`.
    pub fn pop(&self, id: OperationId) {
        let mut inner = self.lock();
        match inner.front() {
            Some(head) if head.id == id => {
                inner.pop_front();
            }
            _ => warn!(operation = %id, "finished job is not at the queue head"),
        }
        if inner.is_empty() {
            self.drained.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.drained.notify_waiters();
    }

    /// Resolves once a job has been pushed since the last wakeup.
    pub async fn pushed(&self) {
        self.pushed.notified().await;
    }

    pub async fn wait_empty(&self) {
        wait_until(&self.drained, || self.is_empty()).await;
    }
}

/// Waits on `notify` until `done` holds, without missing a wakeup that
/// races with the check.
pub(crate) async fn wait_until(notify: &Notify, done: impl Fn() -> bool) {
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if done() {
            return;
        }
        notified.await;
    }
}
