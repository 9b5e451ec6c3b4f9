//! Resilient client for the upstream movie metadata provider.

mod client;
mod error;
mod throttle;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

use bytes::Bytes;

pub use client::{RetryPolicy, UpstreamProxyClient};
pub use error::UpstreamError;
pub use throttle::Throttle;
pub use transport::{parse_retry_after, ReqwestTransport, UpstreamTransport};

/// A successful upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Payload {
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }
}
