use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::dispatch::worker::{DispatchWorker, spawn_worker};
use crate::dispatch::{
    Account, ClaimStatus, DeliveryContext, Job, JobQueue, ListenerRegistry, OperationId,
    OperationListener, RemoteOperation, SessionCache, SessionFactory, Target,
};
use crate::request::{OperationRequest, SubmitError, Submission, build_submission};
use crate::sync::paths::PathError;
use crate::sync::{FolderSyncJob, FolderSyncScheduler, SyncWorker};

const DISPATCH_THREAD: &str = "remoteops-dispatch";
const SYNC_THREAD: &str = "remoteops-sync";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("invalid sync path: {0}")]
    Path(#[from] PathError),
    #[error("failed to start {name} worker: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("operations service is shut down")]
    Stopped,
}

struct Shared {
    queue: Arc<JobQueue>,
    sync: Arc<FolderSyncScheduler>,
    registry: Arc<ListenerRegistry>,
    binders: AtomicUsize,
    shutdown: CancellationToken,
}

impl Shared {
    fn is_busy(&self) -> bool {
        !self.queue.is_empty() || self.sync.is_busy()
    }

    fn ensure_running(&self) -> Result<(), ServiceError> {
        if self.shutdown.is_cancelled() {
            return Err(ServiceError::Stopped);
        }
        Ok(())
    }
}

/// Owns both workers and the state they share. One instance per process,
/// handed to callers through [`OperationsService::bind`].
pub struct OperationsService {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl OperationsService {
    pub fn start(
        factory: Arc<dyn SessionFactory>,
        config: &ServiceConfig,
    ) -> Result<Self, ServiceError> {
        let shared = Arc::new(Shared {
            queue: Arc::new(JobQueue::default()),
            sync: Arc::new(FolderSyncScheduler::default()),
            registry: Arc::new(ListenerRegistry::new(config.result_buffer_capacity)),
            binders: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        });
        let service = Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::new()),
        };

        let dispatch = DispatchWorker::new(
            Arc::clone(&shared.queue),
            Arc::clone(&shared.registry),
            SessionCache::new(Arc::clone(&factory)),
            config.account_scope.clone(),
            shared.shutdown.clone(),
        );
        service.spawn(DISPATCH_THREAD, move || dispatch.run())?;

        let sync = SyncWorker::new(
            Arc::clone(&shared.sync),
            Arc::clone(&shared.registry),
            SessionCache::new(factory),
            config.account_scope.clone(),
            shared.shutdown.clone(),
        );
        service.spawn(SYNC_THREAD, move || sync.run())?;

        info!(scope = %config.account_scope, "operations service started");
        Ok(service)
    }

    fn spawn<F, Fut>(&self, name: &'static str, make: F) -> Result<(), ServiceError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()>,
    {
        let handle =
            spawn_worker(name, make).map_err(|source| ServiceError::Spawn { name, source })?;
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    /// Attaches a caller. Listeners are dropped when the last binder goes away.
    pub fn bind(&self) -> Binder {
        Binder::attach(Arc::clone(&self.shared))
    }

    pub fn is_busy(&self) -> bool {
        self.shared.is_busy()
    }

    /// Resolves once both queues are empty and nothing is running.
    pub async fn wait_idle(&self) {
        while self.shared.is_busy() {
            self.shared.queue.wait_empty().await;
            self.shared.sync.wait_idle().await;
        }
    }

    /// Stops both workers after their current job, persists their sessions and
    /// discards everything still queued or buffered. Idempotent.
    pub fn shutdown(&self) {
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if handles.is_empty() {
            return;
        }
        info!(
            pending = self.shared.queue.len(),
            buffered = self.shared.registry.buffered(),
            "shutting down operations service"
        );
        self.shared.shutdown.cancel();
        self.shared.sync.clear();
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        self.shared.queue.clear();
        self.shared.registry.drop_buffered();
        info!("operations service stopped");
    }
}

impl Drop for OperationsService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A caller's handle on the service.
pub struct Binder {
    shared: Arc<Shared>,
}

impl Binder {
    fn attach(shared: Arc<Shared>) -> Self {
        let count = shared.binders.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(binders = count, "caller bound");
        Self { shared }
    }

    /// Translates and submits a request. Malformed requests are rejected here
    /// and never reach a queue.
    pub fn queue_request(&self, request: &OperationRequest) -> Result<OperationId, ServiceError> {
        self.shared.ensure_running()?;
        match build_submission(request)? {
            Submission::Queue { target, operation } => self.queue_operation(target, operation),
            Submission::FolderSync { owner, path, job } => self.queue_folder_sync(&owner, &path, job),
        }
    }

    pub fn queue_operation(
        &self,
        target: Target,
        operation: Arc<dyn RemoteOperation>,
    ) -> Result<OperationId, ServiceError> {
        self.shared.ensure_running()?;
        let job = Job::new(target, operation);
        debug!(operation = job.operation.name(), target = %job.target, id = %job.id, "queued operation");
        Ok(self.shared.queue.push(job))
    }

    pub fn queue_folder_sync(
        &self,
        owner: &Account,
        path: &str,
        job: Arc<dyn FolderSyncJob>,
    ) -> Result<OperationId, ServiceError> {
        self.shared.ensure_running()?;
        let id = self.shared.sync.add(owner, path, job)?;
        debug!(account = owner.name(), path, %id, "queued folder sync");
        Ok(id)
    }

    pub fn add_listener(
        &self,
        listener: Arc<dyn OperationListener>,
        context: Arc<dyn DeliveryContext>,
    ) {
        self.shared.registry.register(listener, context);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn OperationListener>) {
        self.shared.registry.unregister(listener);
    }

    /// Picks up a result that finished while nobody was listening.
    pub fn claim_result(
        &self,
        id: OperationId,
        listener: Arc<dyn OperationListener>,
        context: &Arc<dyn DeliveryContext>,
    ) -> ClaimStatus {
        if self.shared.registry.claim(id, listener, context) {
            ClaimStatus::Delivered
        } else if self.shared.is_busy() {
            ClaimStatus::Pending
        } else {
            ClaimStatus::NotFound
        }
    }

    pub fn is_busy(&self) -> bool {
        self.shared.is_busy()
    }

    pub fn pending_operations(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_synchronizing(&self, owner: &Account, path: &str) -> bool {
        self.shared.sync.is_synchronizing(owner, path)
    }

    pub fn cancel_sync(&self, owner: &Account, path: &str) -> Result<(), ServiceError> {
        Ok(self.shared.sync.cancel(owner, path)?)
    }
}

impl Clone for Binder {
    fn clone(&self) -> Self {
        Self::attach(Arc::clone(&self.shared))
    }
}

impl Drop for Binder {
    fn drop(&mut self) {
        if self.shared.binders.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.registry.clear();
            debug!("last caller unbound, listeners cleared");
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
