//! HTTP API.
pub mod delete_user;
pub mod status;

use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::AppState;

const BEARER: &str = "Bearer ";

/// Extract the bearer token from the `Authorization` header.
pub(crate) fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Prometheus scrape endpoint.
async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Only read-only routes time out. A deletion always answers with its outcome.
pub fn router(timeout: Duration) -> Router<AppState> {
    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(status::status))
        .route("/metrics", get(metrics))
        .route_layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        // `POST /functions/v1/delete-user` goes to `delete_user`.
        // Authorization required.
        .route("/functions/v1/delete-user", post(delete_user::handler))
        .route("/delete-user", post(delete_user::handler))
}
