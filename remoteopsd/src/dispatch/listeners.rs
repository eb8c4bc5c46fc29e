use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use super::operation::{OperationId, RemoteOperationResult};

/// Receives finished operation results.
pub trait OperationListener: Send + Sync {
    fn on_operation_finished(&self, result: &RemoteOperationResult);
}

/// Where a listener wants its callbacks to run.
pub trait DeliveryContext: Send + Sync {
    fn run_on(&self, callback: Box<dyn FnOnce() + Send>);
}

/// Runs callbacks on the delivering thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl DeliveryContext for InlineContext {
    fn run_on(&self, callback: Box<dyn FnOnce() + Send>) {
        callback();
    }
}

type Callback = Box<dyn FnOnce() + Send>;

/// Runs callbacks on a single task of a tokio runtime, in posting order.
/// Clones share that task.
#[derive(Debug, Clone)]
pub struct TokioContext {
    callbacks: UnboundedSender<Callback>,
}

impl TokioContext {
    pub fn new(handle: Handle) -> Self {
        let (callbacks, mut pending) = mpsc::unbounded_channel::<Callback>();
        handle.spawn(async move {
            while let Some(callback) = pending.recv().await {
                callback();
            }
        });
        Self { callbacks }
    }

    /// Binds to the runtime of the calling task.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl DeliveryContext for TokioContext {
    fn run_on(&self, callback: Box<dyn FnOnce() + Send>) {
        if self.callbacks.send(callback).is_err() {
            warn!("delivery runtime is gone, dropping callback");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    /// The buffered result was removed and handed to the listener.
    Delivered,
    /// Nothing buffered yet, but work is still queued.
    Pending,
    /// Nothing buffered and nothing queued.
    NotFound,
}

/// Results that finished while nobody was listening, oldest first.
#[derive(Debug, Default)]
pub struct ResultBuffer {
    entries: VecDeque<(OperationId, Arc<RemoteOperationResult>)>,
    capacity: Option<NonZeroUsize>,
}

impl ResultBuffer {
    pub fn with_capacity(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, id: OperationId, result: Arc<RemoteOperationResult>) {
        if let Some(capacity) = self.capacity {
            while self.entries.len() >= capacity.get() {
                if let Some((evicted, _)) = self.entries.pop_front() {
                    warn!(operation = %evicted, "result buffer full, dropping unclaimed result");
                }
            }
        }
        self.entries.push_back((id, result));
    }

    pub fn take(&mut self, id: OperationId) -> Option<Arc<RemoteOperationResult>> {
        let position = self.entries.iter().position(|(entry, _)| *entry == id)?;
        self.entries.remove(position).map(|(_, result)| result)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Clone)]
struct Registration {
    listener: Arc<dyn OperationListener>,
    context: Arc<dyn DeliveryContext>,
}

struct RegistryState {
    registrations: Vec<Registration>,
    buffer: ResultBuffer,
}

/// Listener set plus the buffer for results nobody was listening for.
///
/// Both live under one lock so a result is either fanned out or buffered,
/// never both and never neither.
pub struct ListenerRegistry {
    state: Mutex<RegistryState>,
}

impl ListenerRegistry {
    pub fn new(buffer_capacity: Option<NonZeroUsize>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                registrations: Vec::new(),
                buffer: ResultBuffer::with_capacity(buffer_capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        listener: Arc<dyn OperationListener>,
        context: Arc<dyn DeliveryContext>,
    ) {
        let mut state = self.lock();
        if state
            .registrations
            .iter()
            .any(|r| same_listener(&r.listener, &listener))
        {
            return;
        }
        state.registrations.push(Registration { listener, context });
    }

    pub fn unregister(&self, listener: &Arc<dyn OperationListener>) {
        self.lock()
            .registrations
            .retain(|r| !same_listener(&r.listener, listener));
    }

    /// Drops every registration. Buffered results are kept.
    pub fn clear(&self) {
        self.lock().registrations.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.lock().registrations.len()
    }

    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn drop_buffered(&self) {
        self.lock().buffer.clear();
    }

    pub fn deliver(&self, result: RemoteOperationResult) {
        let result = Arc::new(result);
        let registrations = {
            let mut state = self.lock();
            if state.registrations.is_empty() {
                debug!(operation = %result.operation, "no listeners, buffering result");
                state.buffer.insert(result.operation, result);
                return;
            }
            state.registrations.clone()
        };
        for registration in registrations {
            post(&registration.context, registration.listener, Arc::clone(&result));
        }
    }

    /// Removes a buffered result and posts it to `listener`. Returns false when
    /// nothing is buffered under `id`.
    pub fn claim(
        &self,
        id: OperationId,
        listener: Arc<dyn OperationListener>,
        context: &Arc<dyn DeliveryContext>,
    ) -> bool {
        let Some(result) = self.lock().buffer.take(id) else {
            return false;
        };
        post(context, listener, result);
        true
    }
}

fn post(
    context: &Arc<dyn DeliveryContext>,
    listener: Arc<dyn OperationListener>,
    result: Arc<RemoteOperationResult>,
) {
    context.run_on(Box::new(move || {
        let delivered = catch_unwind(AssertUnwindSafe(|| {
            listener.on_operation_finished(&result)
        }));
        if delivered.is_err() {
            warn!(operation = %result.operation, "listener panicked while handling result");
        }
    }));
}

fn same_listener(a: &Arc<dyn OperationListener>, b: &Arc<dyn OperationListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
