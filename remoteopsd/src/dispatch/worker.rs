use std::future::Future;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{contain, execute};
use super::listeners::ListenerRegistry;
use super::operation::Failure;
use super::queue::{Job, JobQueue};
use super::session::SessionCache;

/// Starts `make()` on a dedicated thread with its own single-threaded runtime.
pub(crate) fn spawn_worker<F, Fut>(name: &str, make: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();
        match runtime {
            Ok(runtime) => runtime.block_on(make()),
            Err(err) => error!(worker = %thread_name, "failed to start worker runtime: {err}"),
        }
    })
}

/// Single consumer of the main job queue.
pub(crate) struct DispatchWorker {
    queue: Arc<JobQueue>,
    registry: Arc<ListenerRegistry>,
    cache: SessionCache,
    scope: String,
    shutdown: CancellationToken,
}

impl DispatchWorker {
    pub(crate) fn new(
        queue: Arc<JobQueue>,
        registry: Arc<ListenerRegistry>,
        cache: SessionCache,
        scope: String,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            registry,
            cache,
            scope,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("dispatch worker started");
        while !self.shutdown.is_cancelled() {
            if let Some(job) = self.queue.peek() {
                self.process(job).await;
                continue;
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.queue.pushed() => {}
            }
        }
        if let Err(err) = self.cache.persist(&self.scope) {
            warn!(scope = %self.scope, "failed to persist client sessions: {err}");
        }
        info!("dispatch worker stopped");
    }

    async fn process(&mut self, job: Job) {
        let Job {
            id,
            target,
            operation,
        } = job;
        debug!(operation = operation.name(), target = %target, %id, "running job");
        let factory = self.cache.factory();
        let cache = &mut self.cache;
        let result = contain(id, operation.name(), &target, async {
            let session = cache
                .client_for(&target)
                .await
                .map_err(|err| Failure::from(&err))?;
            execute(operation.as_ref(), session, factory.as_ref()).await
        })
        .await;
        self.registry.deliver(result);
        self.queue.pop(id);
    }
}
