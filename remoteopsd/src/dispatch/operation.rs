use std::fmt;

use async_trait::async_trait;
use remoteops_core::{ApiErrorClass, ClientError, DavClient, OcsClient};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Identity of one submitted operation, from submission to result delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Network client generations: WebDAV (legacy) and OCS (current).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    Legacy,
    Current,
}

/// Which client generations an operation can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSupport {
    Legacy,
    Current,
    Both { preferred: Generation },
}

impl ClientSupport {
    pub fn primary(self) -> Generation {
        match self {
            ClientSupport::Legacy => Generation::Legacy,
            ClientSupport::Current => Generation::Current,
            ClientSupport::Both { preferred } => preferred,
        }
    }

    pub fn fallback(self) -> Option<Generation> {
        match self {
            ClientSupport::Both {
                preferred: Generation::Legacy,
            } => Some(Generation::Current),
            ClientSupport::Both {
                preferred: Generation::Current,
            } => Some(Generation::Legacy),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
pub enum ClientHandle<'a> {
    Legacy(&'a DavClient),
    Current(&'a OcsClient),
}

impl ClientHandle<'_> {
    pub fn generation(&self) -> Generation {
        match self {
            ClientHandle::Legacy(_) => Generation::Legacy,
            ClientHandle::Current(_) => Generation::Current,
        }
    }
}

impl<'a> ClientHandle<'a> {
    pub fn legacy(self) -> Result<&'a DavClient, OperationError> {
        match self {
            ClientHandle::Legacy(client) => Ok(client),
            ClientHandle::Current(_) => Err(OperationError::WrongClient(Generation::Current)),
        }
    }

    pub fn current(self) -> Result<&'a OcsClient, OperationError> {
        match self {
            ClientHandle::Current(client) => Ok(client),
            ClientHandle::Legacy(_) => Err(OperationError::WrongClient(Generation::Legacy)),
        }
    }
}

pub type OperationOutput = Option<serde_json::Value>;

/// Serialises an operation's payload into its result data.
pub fn output<T: Serialize>(value: &T) -> Result<OperationOutput, OperationError> {
    Ok(Some(serde_json::to_value(value)?))
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("remote call failed: {0}")]
    Client(#[from] ClientError),
    #[error("{message}")]
    Rejected { code: ResultCode, message: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation cannot run on the {0:?} client")]
    WrongClient(Generation),
    #[error("failed to encode operation output: {0}")]
    Output(#[from] serde_json::Error),
}

impl OperationError {
    pub fn rejected(code: ResultCode, message: impl Into<String>) -> Self {
        OperationError::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// A unit of remote work. Concrete operations live outside the engine.
#[async_trait]
pub trait RemoteOperation: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn client_support(&self) -> ClientSupport;

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    ServerError,
    Network,
    InvalidInput,
    AccountNotFound,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The client session for the target could not be built.
    SessionConstruction,
    /// The server (or the operation itself) reported a business failure.
    Operation,
    /// Anything else, including panics inside the operation.
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub code: ResultCode,
    pub http_status: Option<u16>,
    /// Resubmitting the same operation may succeed (rate limits, outages).
    pub retryable: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { data: OperationOutput },
    Failure(Failure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteOperationResult {
    pub operation: OperationId,
    pub operation_name: &'static str,
    pub outcome: Outcome,
}

impl RemoteOperationResult {
    pub fn new(operation: OperationId, operation_name: &'static str, outcome: Outcome) -> Self {
        Self {
            operation,
            operation_name,
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            Outcome::Failure(failure) => Some(failure),
            Outcome::Success { .. } => None,
        }
    }
}

impl Failure {
    pub fn new(kind: FailureKind, code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            http_status: None,
            retryable: false,
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unexpected, ResultCode::Unknown, message)
    }
}

impl From<&OperationError> for Failure {
    fn from(err: &OperationError) -> Self {
        match err {
            OperationError::Client(client) => Failure {
                kind: FailureKind::Operation,
                code: code_for_client_error(client),
                http_status: client.status().map(|s| s.as_u16()),
                retryable: client.is_retryable(),
                message: client.to_string(),
            },
            OperationError::Rejected { code, message } => {
                Failure::new(FailureKind::Operation, *code, message.clone())
            }
            OperationError::Cancelled => {
                Failure::new(FailureKind::Operation, ResultCode::Cancelled, err.to_string())
            }
            OperationError::WrongClient(_) | OperationError::Output(_) => {
                Failure::unexpected(err.to_string())
            }
        }
    }
}

fn code_for_client_error(err: &ClientError) -> ResultCode {
    if matches!(
        err,
        ClientError::InvalidPath(_) | ClientError::Anonymous | ClientError::BaseUrl(_)
    ) {
        return ResultCode::InvalidInput;
    }
    let Some(class) = err.classification() else {
        return ResultCode::Unknown;
    };
    let status = err.status().map(|status| status.as_u16());
    match (class, status) {
        (ApiErrorClass::Transient, None) => ResultCode::Network,
        (ApiErrorClass::RateLimit, _) => ResultCode::RateLimited,
        (ApiErrorClass::Auth, Some(403)) => ResultCode::Forbidden,
        (ApiErrorClass::Auth, _) => ResultCode::Unauthorized,
        (_, Some(400 | 422)) => ResultCode::InvalidInput,
        (_, Some(404)) => ResultCode::NotFound,
        (_, Some(405 | 409 | 412 | 423)) => ResultCode::Conflict,
        (_, Some(s)) if s >= 500 => ResultCode::ServerError,
        _ => ResultCode::Unknown,
    }
}
