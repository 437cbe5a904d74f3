use std::sync::Arc;

use http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("Invalid client configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Token cannot be used as a header value. Must be ASCII.")]
    InvalidHeaderValue,
    #[error("Token endpoint responded with status {status}: {body}")]
    OAuth2RequestFailed { status: StatusCode, body: String },
    #[error("Failed to parse token response: {0}")]
    OAuth2ParseError(String),
    #[error("Failed to obtain access token: {0}")]
    AuthenticationFailed(Box<Error>),
    #[error("No access token has been stored yet")]
    TokenNotAvailable,
    #[error("Token storage failed: {0}")]
    StorageFailed(String),
    #[error("Request failed: {0}")]
    ReqwestFailed(#[from] Arc<reqwest::Error>),
    #[error("Gateway responded with status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("Failed to decode response body: {0}")]
    ResponseDecodeFailed(#[from] Arc<serde_json::Error>),
    #[error("Gateway responded with status {0} but without a body")]
    EmptyResponse(StatusCode),
    #[error("Failed to build request: {0}")]
    InvalidRequest(String),
    #[error("Request was cancelled")]
    Cancelled,
    #[error("Background token refresh requires a running Tokio runtime")]
    RuntimeUnavailable,
}

impl Error {
    /// Status code attached to the error, if the gateway answered at all.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::OAuth2RequestFailed { status, .. } | Error::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            Error::AuthenticationFailed(source) => source.status(),
            Error::ReqwestFailed(e) => e.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::ReqwestFailed(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ResponseDecodeFailed(Arc::new(value))
    }
}
