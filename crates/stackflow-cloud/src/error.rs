//! Cloud client error types

use thiserror::Error;

/// Errors raised by a [`CloudClient`](crate::CloudClient) implementation
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Endpoint not found in service catalog: {0}")]
    EndpointNotFound(String),

    #[error("Action {action} is not supported for {kind}")]
    UnsupportedAction { kind: String, action: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        CloudError::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Whether the remote reported that the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// Whether the failure is expected to clear up on its own
    ///
    /// Rate limits and temporary unavailability are transient; everything else
    /// needs a change in configuration or remote state before a retry helps.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::RateLimited(_) | CloudError::Unavailable(_) => true,
            CloudError::Api { status, .. } => matches!(status, 408 | 502 | 503 | 504),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
