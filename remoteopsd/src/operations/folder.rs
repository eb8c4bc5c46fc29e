use std::collections::VecDeque;

use async_trait::async_trait;
use remoteops_core::DavClient;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatch::{OperationError, OperationOutput, output};
use crate::sync::FolderSyncJob;
use crate::sync::paths::{self, PathError};

/// Walks a remote folder tree breadth-first, one `PROPFIND` per folder.
#[derive(Debug, Clone)]
pub struct SynchronizeFolder {
    remote_path: String,
}

impl SynchronizeFolder {
    pub fn new(remote_path: &str) -> Result<Self, PathError> {
        Ok(Self {
            remote_path: paths::normalize(remote_path)?,
        })
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }
}

#[async_trait]
impl FolderSyncJob for SynchronizeFolder {
    async fn synchronize(
        &self,
        client: &DavClient,
        cancel: &CancellationToken,
    ) -> Result<OperationOutput, OperationError> {
        let mut pending = VecDeque::from([self.remote_path.clone()]);
        let mut folders = 0usize;
        let mut files = 0usize;
        while let Some(folder) = pending.pop_front() {
            if cancel.is_cancelled() {
                debug!(path = %self.remote_path, folders, files, "folder sync cancelled");
                return Err(OperationError::Cancelled);
            }
            folders += 1;
            for entry in client.list_folder(&folder).await? {
                if entry.is_folder {
                    pending.push_back(entry.path);
                } else {
                    files += 1;
                }
            }
        }
        output(&json!({
            "path": self.remote_path,
            "folders": folders,
            "files": files,
        }))
    }
}
