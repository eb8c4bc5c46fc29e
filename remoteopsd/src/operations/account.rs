use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{
    ClientHandle, ClientSupport, Generation, OperationError, OperationOutput, RemoteOperation,
    ResultCode, output,
};

/// Verifies that the stored login still works. Prefers the OCS user
/// endpoint and falls back to a WebDAV probe of the user's root.
#[derive(Debug, Clone, Default)]
pub struct CheckCredentials;

#[async_trait]
impl RemoteOperation for CheckCredentials {
    fn name(&self) -> &'static str {
        "check_current_credentials"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Both {
            preferred: Generation::Current,
        }
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        match client {
            ClientHandle::Current(ocs) => {
                let user = ocs.user_info().await?;
                output(&json!({ "user": user.id, "valid": true }))
            }
            ClientHandle::Legacy(dav) => {
                if !dav.exists("/").await? {
                    return Err(OperationError::rejected(
                        ResultCode::Unauthorized,
                        "user root is not reachable",
                    ));
                }
                output(&json!({ "user": dav.user(), "valid": true }))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetUserName;

#[async_trait]
impl RemoteOperation for GetUserName {
    fn name(&self) -> &'static str {
        "get_user_name"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Current
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let info = client.current()?.user_info().await?;
        output(&info)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetServerInfo;

#[async_trait]
impl RemoteOperation for GetServerInfo {
    fn name(&self) -> &'static str {
        "get_server_info"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Current
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        let status = client.current()?.server_status().await?;
        if !status.installed {
            return Err(OperationError::rejected(
                ResultCode::ServerError,
                "server is not installed",
            ));
        }
        output(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remoteops_core::{Credentials, DavClient, OcsClient};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn credentials_check_on_current_client_reads_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ocs/v2.php/cloud/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ocs": {
                    "meta": { "status": "ok", "statuscode": 200 },
                    "data": { "id": "alice" }
                }
            })))
            .mount(&server)
            .await;
        let client = OcsClient::new(&server.uri(), Some(Credentials::new("alice", "pw"))).unwrap();

        let data = CheckCredentials
            .run(ClientHandle::Current(&client))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(data["user"], "alice");
    }

    #[tokio::test]
    async fn credentials_check_on_legacy_client_reports_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = DavClient::new(&server.uri(), Some(Credentials::new("alice", "bad"))).unwrap();

        let err = CheckCredentials
            .run(ClientHandle::Legacy(&client))
            .await
            .unwrap_err();

        assert_eq!(
            crate::dispatch::Failure::from(&err).code,
            ResultCode::Unauthorized
        );
    }

    #[tokio::test]
    async fn server_info_reads_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "installed": true,
                "maintenance": false,
                "version": "29.0.1.1"
            })))
            .mount(&server)
            .await;
        let client = OcsClient::new(&server.uri(), None).unwrap();

        let data = GetServerInfo
            .run(ClientHandle::Current(&client))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(data["version"], "29.0.1.1");
    }
}
