//! Inbound admission middleware and the movie metadata proxy route.

use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use super::error::ApiError;
use super::state::{AppState, ClientIdentity};
use crate::ratelimit::UNKNOWN_COUNTRY;

const UNKNOWN_IP: &str = "unknown";

/// Resolve the caller's IP address.
///
/// `X-Forwarded-For` is only honoured when the service sits behind a
/// trusted proxy; otherwise the socket peer address is used.
pub fn client_ip(request: &Request, identity: &ClientIdentity) -> String {
    if identity.trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()));
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Resolve the caller's country code from the configured header.
pub fn client_country(headers: &HeaderMap, identity: &ClientIdentity) -> String {
    headers
        .get(identity.country_header.as_str())
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNKNOWN_COUNTRY)
        .to_string()
}

/// Reject requests over any enabled tier with 429 before they reach a handler.
pub async fn admission(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request, &state.identity);
    let country = client_country(request.headers(), &state.identity);

    let decision = state.gateway.admit(&ip, &country);
    if !decision.allow {
        return ApiError::RateLimited(decision).into_response();
    }
    next.run(request).await
}

/// `GET /api/movies/{*endpoint}`: serve upstream metadata through the cache.
pub async fn movies(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("movies", %request_id, endpoint = %endpoint);

    let served = tokio::time::timeout(
        state.request_deadline,
        state.gateway.fetch(&endpoint, &params),
    )
    .instrument(span.clone())
    .await
    .map_err(|_| {
        span.in_scope(|| info!("Request deadline exceeded, abandoning upstream fetch"));
        ApiError::DeadlineExceeded
    })??;

    let status = StatusCode::from_u16(served.payload.status).unwrap_or(StatusCode::OK);
    let cache_status = if served.cache_hit { "HIT" } else { "MISS" };
    let mut response = (status, served.payload.body).into_response();

    let headers = response.headers_mut();
    headers.insert("x-cache", HeaderValue::from_static(cache_status));
    if let Some(content_type) = served
        .payload
        .content_type
        .as_deref()
        .and_then(|c| HeaderValue::from_str(c).ok())
    {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    if let Ok(id) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert("x-request-id", id);
    }

    Ok(response)
}
