//! Liveness and readiness.

use axum::{extract::State, http::StatusCode};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::state::AppState;

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

pub fn router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(health))
        .with_state(state)
}

/// Health check endpoint.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service health check",
    description = "Plain `ok` while the database answers. Served on both listeners and never \
                   requires the admin API key.",
    responses(
        (status = 200, description = "Service is healthy", body = str, content_type = "text/plain", example = "ok"),
        (status = 503, description = "Database unreachable", body = str, content_type = "text/plain"),
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.db().ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed to reach the database");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}
