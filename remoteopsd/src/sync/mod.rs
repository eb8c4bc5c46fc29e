//! Folder synchronisation runs on its own queue and worker so long walks
//! never hold up interactive operations.

pub mod paths;
mod scheduler;

pub(crate) use scheduler::SyncWorker;
pub use scheduler::{FolderSyncJob, FolderSyncScheduler};
