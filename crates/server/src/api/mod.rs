//! HTTP surface of the server.
//!
//! Two listeners are served:
//! - the public listener with the OAuth 2.0 / OpenID Connect endpoints and
//!   dynamic client registration
//! - the admin listener with client, flow, trust, key and policy
//!   administration, optionally gated by `admin.api_key`
//!
//! Both carry `/healthz` and their OpenAPI documentation at `/api-docs`.

pub mod auth;
pub mod health;
pub mod openapi;

pub use health::MISC_TAG;

use std::future::IntoFuture;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_redoc::{Redoc, Servable};

use crate::state::AppState;
use crate::{clients, oauth2, trust, warden};

/// Router of the public listener.
pub fn public_router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::PublicApiDoc::openapi())
        .merge(oauth2::public_router(state.clone()))
        .merge(clients::registration_router(state.clone()))
        .merge(health::router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Router of the admin listener.
pub fn admin_router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::AdminApiDoc::openapi())
        .merge(oauth2::admin_router(state.clone()))
        .merge(clients::admin_router(state.clone()))
        .merge(trust::admin_router(state.clone()))
        .merge(warden::admin_router(state.clone()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_key,
        ))
        .merge(health::router(state))
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Serves both listeners until one of them fails.
#[tracing::instrument(skip(state))]
pub async fn start_webserver(state: AppState) -> color_eyre::Result<()> {
    let public_bind = state.config.serve.public_bind.clone();
    let admin_bind = state.config.serve.admin_bind.clone();

    let public = tokio::net::TcpListener::bind(&public_bind).await?;
    let admin = tokio::net::TcpListener::bind(&admin_bind).await?;
    tracing::info!(public = %public_bind, admin = %admin_bind, "Server running");

    let public = axum::serve(public, public_router(state.clone())).into_future();
    let admin = axum::serve(admin, admin_router(state)).into_future();
    tokio::try_join!(public, admin)
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
