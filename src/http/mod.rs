//! HTTP surface: the admin configuration API and the movie proxy.

mod admin;
mod auth;
mod error;
mod proxy;
mod server;
mod state;

use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

pub use auth::{AdminAuthenticator, BearerTokenAuthenticator};
pub use error::{retry_after_secs, ApiError};
pub use proxy::{client_country, client_ip};
pub use server::{serve_on, HttpServer};
pub use state::{AppState, ClientIdentity};

/// Path of the administrator configuration resource.
pub const ADMIN_CONFIG_PATH: &str = "/admin/rate-limits/config";

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let movies = Router::new()
        .route("/api/movies/{*endpoint}", get(proxy::movies))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            proxy::admission,
        ));

    Router::new()
        .route("/health", get(health))
        .route(
            ADMIN_CONFIG_PATH,
            get(admin::get_config)
                .put(admin::update_config)
                .post(admin::post_config),
        )
        .merge(movies)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
