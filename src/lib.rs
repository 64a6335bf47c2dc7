//! reaper deletes photo-sharing accounts along with everything they uploaded.

#![forbid(unsafe_code)]
pub mod backend;
pub mod config;
pub mod deletion;
pub mod error;
mod router;
pub mod storage_path;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderName, Method, header};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use backend::SessionProvider;
use backend::supabase::Supabase;
use deletion::{AccountDeletion, Privileged};
pub use error::ServerError;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    token: Option<&str>,
) -> axum::http::Response<axum::body::Body> {
    use axum::http::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request =
            request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub deletion: Arc<AccountDeletion>,
    /// Builds caller-scoped, never privileged, backend sessions.
    pub sessions: Arc<dyn SessionProvider>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout());
    let middleware = ServiceBuilder::new()
        // Mark secrets before the trace layer sees them.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            HeaderName::from_static("apikey"),
        ]))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(
                            size_bytes = chunk.len(),
                            latency = ?latency,
                            "sending body chunk"
                        )
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-client-info"),
                    HeaderName::from_static("apikey"),
                ]),
        );

    router::router(timeout)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    if config.backend.url.is_empty()
        || config.backend.anon_key.is_empty()
        || config.backend.service_role_key.is_empty()
    {
        return Err(
            "backend url, anon key and service role key are required".into(),
        );
    }

    let supabase = Supabase::new(&config.backend)?;
    let service = Arc::new(supabase.service());
    let deletion = AccountDeletion::new(
        Privileged {
            auth: service.clone(),
            store: service.clone(),
            objects: service,
        },
        config.buckets.clone(),
        config.cleanup,
    );

    Ok(AppState {
        config,
        deletion: Arc::new(deletion),
        sessions: Arc::new(supabase),
        metrics,
    })
}
