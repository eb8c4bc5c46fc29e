use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server url cannot be used as a base: {0}")]
    BaseUrl(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("ocs returned {status_code}: {message}")]
    Ocs { status_code: u16, message: String },
    #[error("ocs response missing data")]
    MissingData,
    #[error("webdav request requires an authenticated user")]
    Anonymous,
    #[error("unsupported http method: {0}")]
    Method(&'static str),
    #[error("invalid remote path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl ClientError {
    /// HTTP status reported by the server, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Ocs { status_code, .. } => StatusCode::from_u16(*status_code).ok(),
            ClientError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ClientError::Request(err) if err.status().is_none() => Some(ApiErrorClass::Transient),
            _ => self.status().map(classify_api_status),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

pub(crate) fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Api { status, body })
    }
}
