use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use remoteops_core::DavClient;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::paths::{self, PathError};
use crate::dispatch::executor::contain;
use crate::dispatch::listeners::ListenerRegistry;
use crate::dispatch::operation::{
    Failure, OperationError, OperationId, OperationOutput, RemoteOperationResult,
};
use crate::dispatch::queue::wait_until;
use crate::dispatch::session::SessionCache;
use crate::dispatch::target::{Account, Target};

/// A long-running folder synchronisation. Implementations check `cancel`
/// at their own checkpoints and return [`OperationError::Cancelled`].
#[async_trait]
pub trait FolderSyncJob: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str {
        "synchronize_folder"
    }

    async fn synchronize(
        &self,
        client: &DavClient,
        cancel: &CancellationToken,
    ) -> Result<OperationOutput, OperationError>;
}

struct SyncEntry {
    id: OperationId,
    owner: Account,
    path: String,
    job: Arc<dyn FolderSyncJob>,
    cancel: CancellationToken,
}

struct Running {
    id: OperationId,
    owner: String,
    path: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SyncState {
    queued: VecDeque<SyncEntry>,
    running: Option<Running>,
}

/// Second queue, keyed by (account, folder), consumed by its own worker.
#[derive(Default)]
pub struct FolderSyncScheduler {
    state: Mutex<SyncState>,
    pushed: Notify,
    drained: Notify,
}

impl FolderSyncScheduler {
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `job` for `(owner, path)`. A job still waiting under the same
    /// key is replaced where it stands; a running one is left alone and the
    /// new job queues behind it.
    pub fn add(
        &self,
        owner: &Account,
        path: &str,
        job: Arc<dyn FolderSyncJob>,
    ) -> Result<OperationId, PathError> {
        let path = paths::normalize(path)?;
        let id = OperationId::new();
        let mut state = self.lock();
        let existing = state
            .queued
            .iter()
            .position(|entry| entry.owner.name() == owner.name() && entry.path == path);
        match existing {
            Some(index) => {
                let entry = &mut state.queued[index];
                debug!(
                    account = owner.name(),
                    %path,
                    replaced = %entry.id,
                    "replacing queued folder sync"
                );
                entry.id = id;
                entry.job = job;
            }
            None => state.queued.push_back(SyncEntry {
                id,
                owner: owner.clone(),
                path,
                job,
                cancel: CancellationToken::new(),
            }),
        }
        drop(state);
        self.pushed.notify_one();
        Ok(id)
    }

    /// Drops queued jobs for `path` and its descendants and asks a matching
    /// running job to stop.
    pub fn cancel(&self, owner: &Account, path: &str) -> Result<(), PathError> {
        let path = paths::normalize(path)?;
        let mut state = self.lock();
        let before = state.queued.len();
        state.queued.retain(|entry| {
            entry.owner.name() != owner.name() || !paths::is_within(&entry.path, &path)
        });
        let dropped = before - state.queued.len();
        if let Some(running) = &state.running
            && running.owner == owner.name()
            && paths::is_within(&running.path, &path)
        {
            info!(account = owner.name(), path = %running.path, "cancelling running folder sync");
            running.cancel.cancel();
        }
        let idle = state.queued.is_empty() && state.running.is_none();
        drop(state);
        if dropped > 0 {
            debug!(account = owner.name(), %path, dropped, "dropped queued folder syncs");
        }
        if idle {
            self.drained.notify_waiters();
        }
        Ok(())
    }

    /// True when `path`, one of its ancestors or one of its descendants is
    /// queued or running for `owner`.
    pub fn is_synchronizing(&self, owner: &Account, path: &str) -> bool {
        let Ok(path) = paths::normalize(path) else {
            return false;
        };
        let state = self.lock();
        let running = state
            .running
            .as_ref()
            .is_some_and(|r| r.owner == owner.name() && paths::is_related(&r.path, &path));
        running
            || state
                .queued
                .iter()
                .any(|e| e.owner.name() == owner.name() && paths::is_related(&e.path, &path))
    }

    pub fn is_busy(&self) -> bool {
        let state = self.lock();
        state.running.is_some() || !state.queued.is_empty()
    }

    /// Drops everything queued and cancels the running job.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.queued.clear();
        if let Some(running) = &state.running {
            running.cancel.cancel();
        }
        let idle = state.running.is_none();
        drop(state);
        if idle {
            self.drained.notify_waiters();
        }
    }

    pub async fn wait_idle(&self) {
        wait_until(&self.drained, || !self.is_busy()).await;
    }

    fn start_next(&self) -> Option<SyncEntry> {
        let mut state = self.lock();
        let entry = state.queued.pop_front()?;
        state.running = Some(Running {
            id: entry.id,
            owner: entry.owner.name().to_string(),
            path: entry.path.clone(),
            cancel: entry.cancel.clone(),
        });
        Some(entry)
    }

    fn finish(&self, id: OperationId) {
        let mut state = self.lock();
        if state.running.as_ref().is_some_and(|r| r.id == id) {
            state.running = None;
        }
        let idle = state.queued.is_empty() && state.running.is_none();
        drop(state);
        if idle {
            self.drained.notify_waiters();
        }
    }
}

/// Single consumer of the folder-sync queue.
pub(crate) struct SyncWorker {
    scheduler: Arc<FolderSyncScheduler>,
    registry: Arc<ListenerRegistry>,
    cache: SessionCache,
    scope: String,
    shutdown: CancellationToken,
}

impl SyncWorker {
    pub(crate) fn new(
        scheduler: Arc<FolderSyncScheduler>,
        registry: Arc<ListenerRegistry>,
        cache: SessionCache,
        scope: String,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            registry,
            cache,
            scope,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("folder sync worker started");
        while !self.shutdown.is_cancelled() {
            if let Some(entry) = self.scheduler.start_next() {
                let id = entry.id;
                let result = self.synchronize(entry).await;
                self.registry.deliver(result);
                self.scheduler.finish(id);
                continue;
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.scheduler.pushed.notified() => {}
            }
        }
        if let Err(err) = self.cache.persist(&self.scope) {
            warn!(scope = %self.scope, "failed to persist client sessions: {err}");
        }
        info!("folder sync worker stopped");
    }

    async fn synchronize(&mut self, entry: SyncEntry) -> RemoteOperationResult {
        let SyncEntry {
            id,
            owner,
            path,
            job,
            cancel,
        } = entry;
        let target = Target::Account(owner);
        debug!(target = %target, %path, %id, "synchronizing folder");
        let cache = &mut self.cache;
        let result = contain(id, job.name(), &target, async {
            if cancel.is_cancelled() {
                return Err(Failure::from(&OperationError::Cancelled));
            }
            let session = cache
                .client_for(&target)
                .await
                .map_err(|err| Failure::from(&err))?;
            job.synchronize(session.legacy(), &cancel)
                .await
                .map_err(|err| Failure::from(&err))
        })
        .await;
        if cancel.is_cancelled() {
            info!(target = %target, %path, "folder sync stopped after cancellation");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::dispatch::listeners::InlineContext;
    use crate::dispatch::operation::ResultCode;
    use crate::dispatch::test_support::{CountingFactory, Recorder};

    #[derive(Debug, Default)]
    struct UntilCancelled {
        started: AtomicBool,
    }

    #[async_trait]
    impl FolderSyncJob for UntilCancelled {
        async fn synchronize(
            &self,
            _client: &DavClient,
            cancel: &CancellationToken,
        ) -> Result<OperationOutput, OperationError> {
            self.started.store(true, Ordering::SeqCst);
            loop {
                if cancel.is_cancelled() {
                    return Err(OperationError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    fn owner(name: &str) -> Account {
        Account::parse_with_server(name, Some("http://127.0.0.1:9")).unwrap()
    }

    fn job() -> Arc<dyn FolderSyncJob> {
        Arc::new(UntilCancelled::default())
    }

    #[test]
    fn ancestor_job_counts_as_synchronizing() {
        let scheduler = FolderSyncScheduler::default();
        let alice = owner("alice@cloud");
        scheduler.add(&alice, "/A", job()).unwrap();

        assert!(scheduler.is_synchronizing(&alice, "/A/B/"));
        assert!(!scheduler.is_synchronizing(&owner("bob@cloud"), "/A/B/"));
    }

    #[test]
    fn descendant_job_counts_as_synchronizing() {
        let scheduler = FolderSyncScheduler::default();
        let alice = owner("alice@cloud");
        scheduler.add(&alice, "/A/B/C", job()).unwrap();

        assert!(scheduler.is_synchronizing(&alice, "/A/B/"));
        assert!(!scheduler.is_synchronizing(&alice, "/A/BC"));
    }

    #[test]
    fn unrelated_paths_are_not_synchronizing() {
        let scheduler = FolderSyncScheduler::default();
        let alice = owner("alice@cloud");
        scheduler.add(&alice, "/music", job()).unwrap();

        assert!(!scheduler.is_synchronizing(&alice, "/A/B/"));
    }

    #[test]
    fn adding_the_same_key_replaces_in_place() {
        let scheduler = FolderSyncScheduler::default();
        let alice = owner("alice@cloud");
        let first = scheduler.add(&alice, "/photos", job()).unwrap();
        scheduler.add(&alice, "/docs", job()).unwrap();
        let second = scheduler.add(&alice, "/photos/", job()).unwrap();

        assert_ne!(first, second);
        let state = scheduler.lock();
        let paths: Vec<_> = state.queued.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/photos", "/docs"]);
        assert_eq!(state.queued[0].id, second);
    }

    #[test]
    fn cancel_drops_queued_descendants() {
        let scheduler = FolderSyncScheduler::default();
        let alice = owner("alice@cloud");
        scheduler.add(&alice, "/photos/2024", job()).unwrap();
        scheduler.add(&alice, "/photos-old", job()).unwrap();

        scheduler.cancel(&alice, "/photos").unwrap();

        assert!(!scheduler.is_synchronizing(&alice, "/photos"));
        assert!(scheduler.is_synchronizing(&alice, "/photos-old"));
    }

    #[test]
    fn rejects_invalid_paths() {
        let scheduler = FolderSyncScheduler::default();
        let alice = owner("alice@cloud");
        assert_eq!(
            scheduler.add(&alice, "", job()).err(),
            Some(PathError::Empty)
        );
        assert!(!scheduler.is_synchronizing(&alice, "../etc"));
    }

    #[tokio::test]
    async fn cancelling_a_running_sync_stops_it_cooperatively() {
        let scheduler = Arc::new(FolderSyncScheduler::default());
        let registry = Arc::new(ListenerRegistry::new(None));
        let recorder = Arc::new(Recorder::default());
        registry.register(recorder.clone(), Arc::new(InlineContext));
        let shutdown = CancellationToken::new();
        let worker = SyncWorker::new(
            scheduler.clone(),
            registry,
            SessionCache::new(Arc::new(CountingFactory::default())),
            "test".into(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(worker.run());

        let alice = owner("alice@cloud");
        let running = Arc::new(UntilCancelled::default());
        scheduler.add(&alice, "/photos", running.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !running.started.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(scheduler.is_synchronizing(&alice, "/photos"));

        scheduler.cancel(&alice, "/photos").unwrap();
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .unwrap();

        assert!(!scheduler.is_synchronizing(&alice, "/photos"));
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].failure().unwrap().code, ResultCode::Cancelled);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn re_adding_a_running_key_queues_behind_it() {
        let scheduler = Arc::new(FolderSyncScheduler::default());
        let registry = Arc::new(ListenerRegistry::new(None));
        let recorder = Arc::new(Recorder::default());
        registry.register(recorder.clone(), Arc::new(InlineContext));
        let shutdown = CancellationToken::new();
        let worker = SyncWorker::new(
            scheduler.clone(),
            registry,
            SessionCache::new(Arc::new(CountingFactory::default())),
            "test".into(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(worker.run());

        let alice = owner("alice@cloud");
        let running = Arc::new(UntilCancelled::default());
        scheduler.add(&alice, "/photos", running.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !running.started.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let follow_up = Arc::new(UntilCancelled::default());
        scheduler.add(&alice, "/photos/", follow_up.clone()).unwrap();
        {
            let state = scheduler.lock();
            assert_eq!(state.queued.len(), 1);
            assert_eq!(state.queued[0].path, "/photos");
            let active = state.running.as_ref().unwrap();
            assert_eq!(active.path, "/photos");
            assert!(!active.cancel.is_cancelled());
        }

        scheduler.cancel(&alice, "/photos").unwrap();
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .unwrap();

        assert!(scheduler.lock().queued.is_empty());
        assert!(!follow_up.started.load(Ordering::SeqCst));
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].failure().unwrap().code, ResultCode::Cancelled);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
