//! Bearer authentication: access tokens on the public listener and the
//! optional API key of the admin listener.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::entity::oauth2_token;
use crate::error::{ApiError, ErrorKind, OAuth2Error};
use crate::oauth2::issuer;
use crate::state::AppState;

/// Token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn invalid_token(hint: &str) -> OAuth2Error {
    OAuth2Error::new(ErrorKind::InvalidToken).with_hint(hint)
}

/// Axum extractor that validates an OAuth2 access token.
///
/// Extracts `Authorization: Bearer <token>` and looks the token up by its
/// signature. Refresh tokens, revoked and expired tokens are rejected with
/// `401 invalid_token`.
///
/// # Example
///
/// ```ignore
/// async fn handler(AccessToken(token): AccessToken) -> impl IntoResponse {
///     format!("Hello, {}", token.subject)
/// }
/// ```
pub struct AccessToken(pub oauth2_token::Model);

impl FromRequestParts<AppState> for AccessToken {
    type Rejection = OAuth2Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = bearer_token(&parts.headers)
            .ok_or_else(|| invalid_token("The request is missing a bearer access token."))?;

        let token = issuer::find_token(state.db(), presented)
            .await?
            .filter(oauth2_token::Model::is_access_token)
            .ok_or_else(|| invalid_token("The access token is unknown."))?;

        if !token.active {
            return Err(invalid_token("The access token has been revoked."));
        }
        if token.is_expired() {
            return Err(invalid_token("The access token has expired."));
        }
        Ok(AccessToken(token))
    }
}

/// Middleware of the admin listener: when `admin.api_key` is configured every
/// request must present it as a bearer token.
pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.config.admin.api_key.as_deref() {
        let presented = bearer_token(request.headers());
        if presented != Some(expected) {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request without valid API key");
            return ApiError::Unauthorized("A valid admin API key is required".into())
                .into_response();
        }
    }
    next.run(request).await
}
