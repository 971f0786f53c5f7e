//! OpenStack backend error types

use stackflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenStackError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenStack API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Keystone authentication failed: {0}")]
    Authentication(String),

    #[error("No {service} endpoint in the service catalog (region {region}, interface {interface})")]
    EndpointNotFound {
        service: String,
        region: String,
        interface: String,
    },

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OpenStackError {
    /// Convert into the backend-neutral error, attributing not-found
    /// responses to `kind`/`id`
    pub fn into_cloud(self, kind: &str, id: Option<&str>) -> CloudError {
        match self {
            OpenStackError::Status { status, message } => match status {
                404 => CloudError::not_found(kind, id.unwrap_or("-")),
                409 => CloudError::Conflict(message),
                413 | 429 => CloudError::RateLimited(message),
                502..=504 => CloudError::Unavailable(message),
                401 => CloudError::AuthenticationFailed(message),
                _ => CloudError::Api { status, message },
            },
            OpenStackError::Http(e) if e.is_timeout() || e.is_connect() => {
                CloudError::Unavailable(e.to_string())
            }
            other => CloudError::from(other),
        }
    }
}

impl From<OpenStackError> for CloudError {
    fn from(err: OpenStackError) -> Self {
        match err {
            OpenStackError::Status { .. } => err.into_cloud("resource", None),
            OpenStackError::Http(e) if e.is_timeout() || e.is_connect() => {
                CloudError::Unavailable(e.to_string())
            }
            OpenStackError::Http(e) => CloudError::Api {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            },
            OpenStackError::Authentication(message) => CloudError::AuthenticationFailed(message),
            e @ OpenStackError::EndpointNotFound { .. } => CloudError::EndpointNotFound(e.to_string()),
            OpenStackError::Url(message) | OpenStackError::InvalidConfig(message) => {
                CloudError::InvalidConfig(message)
            }
            OpenStackError::JsonError(e) => CloudError::Json(e),
            OpenStackError::IoError(e) => CloudError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenStackError>;
