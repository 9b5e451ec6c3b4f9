//! Administrator rate limit configuration endpoints.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::ratelimit::{RateLimitConfig, RateLimitConfigPatch};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionRequest {
    action: String,
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if state.auth.is_admin(headers) {
        Ok(())
    } else {
        warn!("Rejected admin request without valid credentials");
        Err(ApiError::Unauthorized)
    }
}

/// `GET /admin/rate-limits/config`
pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RateLimitConfig>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(*state.config.get()))
}

/// `PUT /admin/rate-limits/config` with a partial configuration.
pub async fn update_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RateLimitConfig>, ApiError> {
    require_admin(&state, &headers)?;
    let patch = RateLimitConfigPatch::from_json(&body)?;
    let updated = state.config.update(&patch).map_err(|err| {
        info!(violations = ?err.violations, "Rejected rate limit configuration update");
        err
    })?;
    Ok(Json(updated))
}

/// `POST /admin/rate-limits/config` with `{"action": "reset"}`.
pub async fn post_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RateLimitConfig>, ApiError> {
    require_admin(&state, &headers)?;
    let request: ActionRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed action request: {}", e)))?;

    match request.action.as_str() {
        "reset" => Ok(Json(state.config.reset())),
        other => Err(ApiError::BadRequest(format!("unknown action: {}", other))),
    }
}
