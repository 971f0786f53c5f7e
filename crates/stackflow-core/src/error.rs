use stackflow_cloud::CloudError;
use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a failed operation invocation, as reported to the host
#[derive(Error, Debug)]
pub enum OperationError {
    /// The workflow must stop
    #[error("{message}")]
    NonRecoverable {
        message: String,
        #[source]
        cause: Option<BoxError>,
    },

    /// Transient failure; the host may reschedule after a backoff
    #[error("{message}")]
    Recoverable {
        message: String,
        retry_after: Option<Duration>,
        #[source]
        cause: Option<BoxError>,
    },

    /// Remote state is still converging; re-invoke the same operation later
    #[error("{message} (retry in {}s)", retry_after.as_secs())]
    Retry {
        message: String,
        retry_after: Duration,
    },

    /// Raw client error, classified by the dispatcher before it reaches the
    /// host
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl OperationError {
    pub fn non_recoverable(message: impl Into<String>) -> Self {
        OperationError::NonRecoverable {
            message: message.into(),
            cause: None,
        }
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        OperationError::Recoverable {
            message: message.into(),
            retry_after: None,
            cause: None,
        }
    }

    pub fn retry(message: impl Into<String>, retry_after: Duration) -> Self {
        OperationError::Retry {
            message: message.into(),
            retry_after,
        }
    }

    /// Attach a cause to a non-recoverable or recoverable error
    pub fn caused_by(self, err: impl Into<BoxError>) -> Self {
        match self {
            OperationError::NonRecoverable { message, .. } => OperationError::NonRecoverable {
                message,
                cause: Some(err.into()),
            },
            OperationError::Recoverable {
                message,
                retry_after,
                ..
            } => OperationError::Recoverable {
                message,
                retry_after,
                cause: Some(err.into()),
            },
            other => other,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, OperationError::Retry { .. })
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, OperationError::Recoverable { .. })
    }

    pub fn is_non_recoverable(&self) -> bool {
        matches!(self, OperationError::NonRecoverable { .. })
    }

    /// Delay the host should wait before the next invocation, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OperationError::Retry { retry_after, .. } => Some(*retry_after),
            OperationError::Recoverable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short label for the error class
    pub fn class(&self) -> &'static str {
        match self {
            OperationError::NonRecoverable { .. } => "NonRecoverableError",
            OperationError::Recoverable { .. } => "RecoverableError",
            OperationError::Retry { .. } => "OperationRetry",
            OperationError::Cloud(_) => "CloudError",
        }
    }

    /// The underlying client error, when this is still unclassified
    pub fn cloud(&self) -> Option<&CloudError> {
        match self {
            OperationError::Cloud(e) => Some(e),
            _ => None,
        }
    }

    /// Unclassified client error reporting a missing resource
    pub fn is_not_found(&self) -> bool {
        self.cloud().is_some_and(CloudError::is_not_found)
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;
