use async_trait::async_trait;
use remoteops_core::{NewShare, ShareType, ShareUpdate};
use serde_json::json;

use crate::dispatch::{
    ClientHandle, ClientSupport, OperationError, OperationOutput, RemoteOperation, ResultCode,
    output,
};
use crate::sync::paths::{self, PathError};

/// Permission bit that lets link holders upload but not list or read.
pub const CREATE_PERMISSION: u32 = 4;

/// Optional settings shared by every way of creating a share.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareOptions {
    pub password: Option<String>,
    pub permissions: Option<u32>,
    pub expire_date: Option<String>,
    pub note: Option<String>,
    pub label: Option<String>,
    pub attributes: Option<String>,
    pub hide_download: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CreateShare {
    name: &'static str,
    share: NewShare,
}

impl CreateShare {
    pub fn public_link(remote_path: &str, options: ShareOptions) -> Result<Self, PathError> {
        Self::build("create_share_via_link", remote_path, ShareType::PublicLink, None, options)
    }

    /// Link share that only accepts uploads.
    pub fn secure_file_drop(remote_path: &str, options: ShareOptions) -> Result<Self, PathError> {
        let options = ShareOptions {
            permissions: Some(CREATE_PERMISSION),
            ..options
        };
        Self::build("create_secure_file_drop", remote_path, ShareType::PublicLink, None, options)
    }

    pub fn with_sharee(
        remote_path: &str,
        share_with: &str,
        share_type: ShareType,
        options: ShareOptions,
    ) -> Result<Self, PathError> {
        Self::build(
            "create_share_with_sharee",
            remote_path,
            share_type,
            Some(share_with.to_string()),
            options,
        )
    }

    fn build(
        name: &'static str,
        remote_path: &str,
        share_type: ShareType,
        share_with: Option<String>,
        options: ShareOptions,
    ) -> Result<Self, PathError> {
        Ok(Self {
            name,
            share: NewShare {
                path: paths::normalize(remote_path)?,
                share_type,
                share_with,
                permissions: options.permissions,
                password: options.password,
                expire_date: options.expire_date,
                note: options.note,
                label: options.label,
                attributes: options.attributes,
                hide_download: options.hide_download,
            },
        })
    }
}

#[async_trait]
impl RemoteOperation for CreateShare {
    fn name(&self) -> &'static str {
        self.name
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Current
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let share = client.current()?.create_share(&self.share).await?;
        output(&share)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    PublicShare,
    UserShare,
    ShareInfo,
    Note,
}

#[derive(Debug, Clone)]
pub struct UpdateShare {
    kind: UpdateKind,
    share_id: u64,
    update: ShareUpdate,
}

impl UpdateShare {
    pub fn new(kind: UpdateKind, share_id: u64, update: ShareUpdate) -> Self {
        Self {
            kind,
            share_id,
            update,
        }
    }

    pub fn note(share_id: u64, note: impl Into<String>) -> Self {
        Self::new(
            UpdateKind::Note,
            share_id,
            ShareUpdate {
                note: Some(note.into()),
                ..ShareUpdate::default()
            },
        )
    }
}

#[async_trait]
impl RemoteOperation for UpdateShare {
    fn name(&self) -> &'static str {
        match self.kind {
            UpdateKind::PublicShare => "update_public_share",
            UpdateKind::UserShare => "update_user_share",
            UpdateKind::ShareInfo => "update_share_info",
            UpdateKind::Note => "update_share_note",
        }
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Current
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let client = client.current()?;
        if self.update == ShareUpdate::default() {
            // Nothing to change; report the share as it stands.
            return output(&client.get_share(self.share_id).await?);
        }
        let share = client.update_share(self.share_id, &self.update).await?;
        output(&share)
    }
}

#[derive(Debug, Clone)]
pub struct Unshare {
    share_id: u64,
}

impl Unshare {
    pub fn new(share_id: u64) -> Self {
        Self { share_id }
    }
}

#[async_trait]
impl RemoteOperation for Unshare {
    fn name(&self) -> &'static str {
        "unshare"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Current
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        client.current()?.delete_share(self.share_id).await?;
        output(&json!({ "share_id": self.share_id }))
    }
}

/// Sets the number of downloads a link share allows; `None` removes the limit.
#[derive(Debug, Clone)]
pub struct UpdateDownloadLimit {
    share_id: u64,
    limit: Option<u32>,
}

impl UpdateDownloadLimit {
    pub fn new(share_id: u64, limit: Option<u32>) -> Self {
        Self { share_id, limit }
    }
}

#[async_trait]
impl RemoteOperation for UpdateDownloadLimit {
    fn name(&self) -> &'static str {
        "update_files_download_limit"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Current
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let client = client.current()?;
        let share = client.get_share(self.share_id).await?;
        let Some(token) = share.token.as_deref() else {
            return Err(OperationError::rejected(
                ResultCode::InvalidInput,
                format!("share {} has no link token", self.share_id),
            ));
        };
        match self.limit {
            Some(limit) => client.set_download_limit(token, limit).await?,
            None => client.remove_download_limit(token).await?,
        }
        output(&json!({ "share_id": self.share_id, "limit": self.limit }))
    }
}
