use std::sync::Arc;

use async_trait::async_trait;
use remoteops_core::{ClientError, DavClient, OcsClient};
use thiserror::Error;
use tracing::debug;

use super::operation::{Failure, FailureKind, Generation, ResultCode};
use super::target::Target;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no credentials stored for account {0}")]
    MissingCredentials(String),
    #[error("credential storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("client construction failed: {0}")]
    Client(#[from] ClientError),
    #[error("{0:?} client is unavailable for {1}")]
    Unavailable(Generation, String),
}

/// Live clients bound to exactly one target.
pub struct ClientSession {
    target: Target,
    legacy: DavClient,
    current: Option<OcsClient>,
}

/// Builds, upgrades and persists client sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn build_session(&self, target: &Target) -> Result<ClientSession, SessionError>;

    /// Builds the generation-2 client for an existing session.
    async fn upgrade(&self, session: &ClientSession) -> Result<OcsClient, SessionError>;

    /// Flushes every session's server state (cookies) built under `scope`.
    fn persist_all(&self, scope: &str) -> Result<(), SessionError>;
}

impl ClientSession {
    pub fn new(target: Target, legacy: DavClient) -> Self {
        Self {
            target,
            legacy,
            current: None,
        }
    }

    pub fn with_current(mut self, current: OcsClient) -> Self {
        self.current = Some(current);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn legacy(&self) -> &DavClient {
        &self.legacy
    }

    pub fn current(&self) -> Option<&OcsClient> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, current: OcsClient) {
        self.current = Some(current);
    }
}

/// Holds at most one session, reused while consecutive jobs share a target.
pub struct SessionCache {
    factory: Arc<dyn SessionFactory>,
    session: Option<ClientSession>,
}

impl SessionCache {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            session: None,
        }
    }

    pub fn factory(&self) -> Arc<dyn SessionFactory> {
        Arc::clone(&self.factory)
    }

    pub fn session(&self) -> Option<&ClientSession> {
        self.session.as_ref()
    }

    pub async fn client_for(&mut self, target: &Target) -> Result<&mut ClientSession, SessionError> {
        let reusable = matches!(&self.session, Some(session) if session.target() == target);
        if !reusable {
            // A failed build must not leave the previous target's session behind.
            self.session = None;
            let session = self.factory.build_session(target).await?;
            debug!(target = %target, "built client session");
            return Ok(self.session.insert(session));
        }
        self.session
            .as_mut()
            .ok_or_else(|| SessionError::Unavailable(Generation::Legacy, target.to_string()))
    }

    pub fn persist(&self, scope: &str) -> Result<(), SessionError> {
        self.factory.persist_all(scope)
    }
}

impl From<&SessionError> for Failure {
    fn from(err: &SessionError) -> Self {
        let code = match err {
            SessionError::MissingCredentials(_) => ResultCode::AccountNotFound,
            SessionError::Client(ClientError::Request(_)) => ResultCode::Network,
            SessionError::Client(_) => ResultCode::InvalidInput,
            SessionError::Storage(_) | SessionError::Unavailable(..) => ResultCode::Unknown,
        };
        let mut failure = Failure::new(FailureKind::SessionConstruction, code, err.to_string());
        failure.retryable = matches!(err, SessionError::Client(client) if client.is_retryable());
        failure
    }
}
