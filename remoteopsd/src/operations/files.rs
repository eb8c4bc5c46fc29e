use async_trait::async_trait;
use remoteops_core::{ClientError, DavClient};
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use crate::dispatch::{
    ClientHandle, ClientSupport, OperationError, OperationOutput, RemoteOperation, ResultCode,
    output,
};
use crate::sync::paths::{self, PathError};

#[derive(Debug, Clone)]
pub struct RenameFile {
    remote_path: String,
    new_name: String,
}

impl RenameFile {
    pub fn new(remote_path: &str, new_name: &str) -> Result<Self, PathError> {
        Ok(Self {
            remote_path: paths::normalize(remote_path)?,
            new_name: new_name.trim().to_string(),
        })
    }
}

#[async_trait]
impl RemoteOperation for RenameFile {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Legacy
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let client = client.legacy()?;
        if self.remote_path == "/" {
            return Err(OperationError::rejected(
                ResultCode::InvalidInput,
                "the root folder cannot be renamed",
            ));
        }
        if matches!(self.new_name.as_str(), "" | "." | "..") || self.new_name.contains('/') {
            return Err(OperationError::rejected(
                ResultCode::InvalidInput,
                format!("invalid file name: {:?}", self.new_name),
            ));
        }
        let target = paths::join(paths::parent(&self.remote_path), &self.new_name);
        if target == self.remote_path {
            return output(&json!({ "path": target }));
        }
        if client.exists(&target).await? {
            return Err(OperationError::rejected(
                ResultCode::Conflict,
                format!("{target} already exists"),
            ));
        }
        client
            .move_resource(&self.remote_path, &target, false)
            .await?;
        output(&json!({ "path": target }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Move,
    Copy,
}

/// Moves or copies a file or folder into another folder, keeping its name.
#[derive(Debug, Clone)]
pub struct TransferFile {
    kind: Transfer,
    remote_path: String,
    new_parent: String,
}

impl TransferFile {
    pub fn new(kind: Transfer, remote_path: &str, new_parent: &str) -> Result<Self, PathError> {
        Ok(Self {
            kind,
            remote_path: paths::normalize(remote_path)?,
            new_parent: paths::normalize(new_parent)?,
        })
    }
}

#[async_trait]
impl RemoteOperation for TransferFile {
    fn name(&self) -> &'static str {
        match self.kind {
            Transfer::Move => "move_file",
            Transfer::Copy => "copy_file",
        }
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Legacy
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let client = client.legacy()?;
        if self.remote_path == "/" || paths::is_within(&self.new_parent, &self.remote_path) {
            return Err(OperationError::rejected(
                ResultCode::InvalidInput,
                format!(
                    "cannot place {} inside {}",
                    self.remote_path, self.new_parent
                ),
            ));
        }
        let target = paths::join(&self.new_parent, paths::file_name(&self.remote_path));
        match self.kind {
            Transfer::Move => {
                client
                    .move_resource(&self.remote_path, &target, false)
                    .await?
            }
            Transfer::Copy => {
                client
                    .copy_resource(&self.remote_path, &target, false)
                    .await?
            }
        }
        output(&json!({ "path": target }))
    }
}

#[derive(Debug, Clone)]
pub struct RemoveFile {
    remote_path: String,
    only_local: bool,
    in_background: bool,
}

impl RemoveFile {
    /// With `only_local` set nothing is deleted on the server.
    pub fn new(remote_path: &str, only_local: bool) -> Result<Self, PathError> {
        Ok(Self {
            remote_path: paths::normalize(remote_path)?,
            only_local,
            in_background: false,
        })
    }

    /// Marks a removal the user did not start interactively.
    pub fn in_background(mut self, in_background: bool) -> Self {
        self.in_background = in_background;
        self
    }
}

#[async_trait]
impl RemoteOperation for RemoveFile {
    fn name(&self) -> &'static str {
        "remove"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Legacy
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let client = client.legacy()?;
        if !self.only_local {
            client.delete_resource(&self.remote_path).await?;
        }
        output(&json!({
            "path": self.remote_path,
            "removed_remote": !self.only_local,
            "in_background": self.in_background,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct CreateFolder {
    remote_path: String,
    create_parents: bool,
}

impl CreateFolder {
    pub fn new(remote_path: &str, create_parents: bool) -> Result<Self, PathError> {
        Ok(Self {
            remote_path: paths::normalize(remote_path)?,
            create_parents,
        })
    }
}

#[async_trait]
impl RemoteOperation for CreateFolder {
    fn name(&self) -> &'static str {
        "create_folder"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Legacy
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let client = client.legacy()?;
        match client.create_folder(&self.remote_path).await {
            Err(ClientError::Api { status, .. })
                if status == StatusCode::CONFLICT && self.create_parents =>
            {
                create_missing_parents(client, &self.remote_path).await?;
                client.create_folder(&self.remote_path).await?;
            }
            other => other?,
        }
        output(&json!({ "path": self.remote_path }))
    }
}

/// MKCOL answers 409 when the parent is missing; create every ancestor from
/// the top, tolerating the ones that already exist.
async fn create_missing_parents(client: &DavClient, path: &str) -> Result<(), ClientError> {
    let mut ancestors = Vec::new();
    let mut current = paths::parent(path);
    while current != "/" {
        ancestors.push(current);
        current = paths::parent(current);
    }
    for folder in ancestors.into_iter().rev() {
        match client.create_folder(folder).await {
            Ok(()) => debug!(path = folder, "created missing parent folder"),
            Err(ClientError::Api { status, .. }) if status == StatusCode::METHOD_NOT_ALLOWED => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Refreshes a file's server metadata.
#[derive(Debug, Clone)]
pub struct SyncFile {
    remote_path: String,
    sync_contents: bool,
}

impl SyncFile {
    pub fn new(remote_path: &str, sync_contents: bool) -> Result<Self, PathError> {
        Ok(Self {
            remote_path: paths::normalize(remote_path)?,
            sync_contents,
        })
    }
}

#[async_trait]
impl RemoteOperation for SyncFile {
    fn name(&self) -> &'static str {
        "sync_file"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Legacy
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let head = client.legacy()?.head(&self.remote_path).await?;
        output(&json!({
            "path": self.remote_path,
            "etag": head.etag,
            "size": head.size,
            "last_modified": head.last_modified,
            "content_type": head.content_type,
            "sync_contents": self.sync_contents,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct RestoreVersion {
    file_id: String,
    version: String,
}

impl RestoreVersion {
    pub fn new(file_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
impl RemoteOperation for RestoreVersion {
    fn name(&self) -> &'static str {
        "restore_version"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Legacy
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        client
            .legacy()?
            .restore_version(&self.file_id, &self.version)
            .await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remoteops_core::Credentials;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ROOT: &str = "/remote.php/dav/files/alice";

    fn dav(server: &MockServer) -> DavClient {
        DavClient::new(&server.uri(), Some(Credentials::new("alice", "pw"))).unwrap()
    }

    #[tokio::test]
    async fn rename_moves_within_parent() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path(format!("{ROOT}/Docs/B.txt")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("MOVE"))
            .and(path(format!("{ROOT}/Docs/A.txt")))
            .and(header("Overwrite", "F"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        let client = dav(&server);
        let op = RenameFile::new("/Docs/A.txt", "B.txt").unwrap();

        let data = op.run(ClientHandle::Legacy(&client)).await.unwrap().unwrap();

        assert_eq!(data["path"], "/Docs/B.txt");
    }

    #[tokio::test]
    async fn rename_refuses_to_overwrite() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(207))
            .mount(&server)
            .await;
        let client = dav(&server);
        let op = RenameFile::new("/Docs/A.txt", "B.txt").unwrap();

        let err = op.run(ClientHandle::Legacy(&client)).await.unwrap_err();

        assert!(matches!(
            err,
            OperationError::Rejected {
                code: ResultCode::Conflict,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rename_rejects_names_with_separators() {
        let client = DavClient::new("http://127.0.0.1:9", Some(Credentials::new("alice", "pw")))
            .unwrap();
        let op = RenameFile::new("/Docs/A.txt", "x/y").unwrap();

        let err = op.run(ClientHandle::Legacy(&client)).await.unwrap_err();

        assert!(matches!(
            err,
            OperationError::Rejected {
                code: ResultCode::InvalidInput,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rename_rejects_dot_names_and_the_root() {
        let client = DavClient::new("http://127.0.0.1:9", Some(Credentials::new("alice", "pw")))
            .unwrap();
        for (path, name) in [("/Docs/A.txt", "."), ("/Docs/A.txt", ".."), ("/", "Renamed")] {
            let op = RenameFile::new(path, name).unwrap();

            let err = op.run(ClientHandle::Legacy(&client)).await.unwrap_err();

            assert!(
                matches!(
                    err,
                    OperationError::Rejected {
                        code: ResultCode::InvalidInput,
                        ..
                    }
                ),
                "{path} -> {name}"
            );
        }
    }

    #[tokio::test]
    async fn move_into_own_subtree_is_rejected() {
        let client = DavClient::new("http://127.0.0.1:9", Some(Credentials::new("alice", "pw")))
            .unwrap();
        let op = TransferFile::new(Transfer::Move, "/Docs", "/Docs/Archive").unwrap();

        assert!(op.run(ClientHandle::Legacy(&client)).await.is_err());
    }

    #[tokio::test]
    async fn copy_keeps_file_name() {
        let server = MockServer::start().await;
        Mock::given(method("COPY"))
            .and(path(format!("{ROOT}/Docs/A.txt")))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        let client = dav(&server);
        let op = TransferFile::new(Transfer::Copy, "/Docs/A.txt", "/Backup").unwrap();

        let data = op.run(ClientHandle::Legacy(&client)).await.unwrap().unwrap();

        assert_eq!(op.name(), "copy_file");
        assert_eq!(data["path"], "/Backup/A.txt");
    }

    #[tokio::test]
    async fn local_only_remove_skips_the_server() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;
        let client = dav(&server);
        let op = RemoveFile::new("/Docs/A.txt", true).unwrap();

        let data = op.run(ClientHandle::Legacy(&client)).await.unwrap().unwrap();

        assert_eq!(data["removed_remote"], false);
    }

    #[tokio::test]
    async fn create_folder_creates_missing_parents() {
        let server = MockServer::start().await;
        Mock::given(method("MKCOL"))
            .and(path(format!("{ROOT}/a/b/c")))
            .respond_with(ResponseTemplate::new(409))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("MKCOL"))
            .and(path(format!("{ROOT}/a")))
            .respond_with(ResponseTemplate::new(405))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("MKCOL"))
            .and(path(format!("{ROOT}/a/b")))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("MKCOL"))
            .and(path(format!("{ROOT}/a/b/c")))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        let client = dav(&server);
        let op = CreateFolder::new("/a/b/c", true).unwrap();

        op.run(ClientHandle::Legacy(&client)).await.unwrap();
    }

    #[tokio::test]
    async fn sync_file_reports_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(format!("{ROOT}/Docs/A.txt")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"abc123\"")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&server)
            .await;
        let client = dav(&server);
        let op = SyncFile::new("/Docs/A.txt", false).unwrap();

        let data = op.run(ClientHandle::Legacy(&client)).await.unwrap().unwrap();

        assert_eq!(data["etag"], "abc123");
        assert_eq!(data["content_type"], "text/plain");
    }

    #[tokio::test]
    async fn file_operations_need_the_legacy_client() {
        let ocs = remoteops_core::OcsClient::new("http://127.0.0.1:9", None).unwrap();
        let op = RestoreVersion::new("42", "1700000000");

        let err = op.run(ClientHandle::Current(&ocs)).await.unwrap_err();

        assert!(matches!(err, OperationError::WrongClient(_)));
    }
}
