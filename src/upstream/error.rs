use std::time::Duration;
use thiserror::Error;

/// Failure of a single upstream call, or of the whole retried fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream network error: {0}")]
    Network(String),

    #[error("upstream responded with status {status}")]
    Status {
        status: u16,
        /// Delay requested by the provider, if any
        retry_after: Option<Duration>,
    },

    #[error("upstream request cancelled")]
    Cancelled,

    #[error("invalid upstream endpoint: {0}")]
    InvalidEndpoint(String),
}

impl UpstreamError {
    /// Whether the failure is worth retrying.
    ///
    /// Network errors, timeouts, 5xx responses, and 429 are transient; any
    /// other status is the caller's problem and is returned immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Network(_) => true,
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::Cancelled | UpstreamError::InvalidEndpoint(_) => false,
        }
    }

    pub fn status(status: u16) -> Self {
        UpstreamError::Status {
            status,
            retry_after: None,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::Network(err.to_string())
    }
}
