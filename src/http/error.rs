//! HTTP mapping for request-path errors.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::error::ValidationError;
use crate::ratelimit::Decision;
use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error("rate limit exceeded")]
    RateLimited(Decision),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_)
            | ApiError::BadRequest(_)
            | ApiError::Upstream(UpstreamError::InvalidEndpoint(_)) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(UpstreamError::Timeout(_)) | ApiError::DeadlineExceeded => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ApiError::Upstream(UpstreamError::Status { status, .. })
                if (400..500).contains(status) && *status != 429 =>
            {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::Upstream(UpstreamError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Whole seconds for a `Retry-After` header, rounded up, never zero.
pub fn retry_after_secs(retry_after_ms: u64) -> u64 {
    retry_after_ms.div_ceil(1_000).max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Validation(err) => (
                status,
                Json(json!({
                    "error": "validation failed",
                    "violations": err.violations,
                })),
            )
                .into_response(),
            ApiError::RateLimited(decision) => {
                let mut response = (
                    status,
                    Json(json!({
                        "error": "rate limit exceeded",
                        "reason": decision.reason,
                        "retryAfterMs": decision.retry_after_ms,
                    })),
                )
                    .into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_secs(decision.retry_after_ms)),
                );
                response
            }
            other => (status, Json(json!({ "error": other.to_string() }))).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Tier;
    use std::time::Duration;

    #[test]
    fn test_unauthorized_returns_401() {
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_validation_returns_400() {
        let err = ValidationError::single("ip.windowMs must be between 1000 and 3600000 (got 1)");
        assert_eq!(
            ApiError::from(err).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited(Decision::denied(Tier::Ip, 899_400)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "900");
    }

    #[test]
    fn test_retry_after_rounding() {
        assert_eq!(retry_after_secs(0), 1);
        assert_eq!(retry_after_secs(1), 1);
        assert_eq!(retry_after_secs(1_000), 1);
        assert_eq!(retry_after_secs(1_001), 2);
    }

    #[test]
    fn test_upstream_status_mapping() {
        let timeout = ApiError::Upstream(UpstreamError::Timeout(Duration::from_secs(30)));
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::Upstream(UpstreamError::status(503)).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Upstream(UpstreamError::status(429)).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Upstream(UpstreamError::status(404)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Upstream(UpstreamError::Network("reset".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::DeadlineExceeded.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::Upstream(UpstreamError::InvalidEndpoint("../x".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
