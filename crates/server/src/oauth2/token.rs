//! `POST /oauth2/token`: token endpoint.

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::{ErrorKind, ErrorResponse, OAuth2Error};
use crate::oauth2::grants::{self, authorization_code, client_credentials, device, jwt_bearer, refresh};
use crate::oauth2::issuer::TokenResponse;
use crate::oauth2::{OAUTH2_TAG, client_auth};
use crate::state::AppState;

/// Form body of the token endpoint; which fields are read depends on `grant_type`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Space-separated scopes
    pub scope: Option<String>,
    /// Space-separated audiences
    pub audience: Option<String>,
    pub code_verifier: Option<String>,
    pub device_code: Option<String>,
    /// RFC 7523 assertion
    pub assertion: Option<String>,
}

/// Token responses and errors must not be cached (RFC 6749 section 5.1).
fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/oauth2/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange a grant for tokens",
    description = "Supports `authorization_code`, `refresh_token`, `client_credentials`, \
                   `urn:ietf:params:oauth:grant-type:device_code` and \
                   `urn:ietf:params:oauth:grant-type:jwt-bearer`.\n\n\
                   **Client authentication:** `client_secret_basic`, `client_secret_post` or `none`, \
                   whichever the client registered.\n\n\
                   A refresh token is only issued when `offline_access` was granted and the client may \
                   use the `refresh_token` grant. An ID token is only issued when `openid` was granted.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid grant or request", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Form(params) = match form {
        Ok(form) => form,
        Err(rejection) => {
            tracing::info!(error = %rejection, "Malformed token request");
            return no_store(OAuth2Error::from(rejection).into_response());
        }
    };
    let response = match exchange(&state, &headers, &params).await {
        Ok(tokens) => Json(tokens).into_response(),
        Err(err) => {
            tracing::info!(grant_type = %params.grant_type, error = %err, "Token request failed");
            err.into_response()
        }
    };
    no_store(response)
}

async fn exchange(
    state: &AppState,
    headers: &HeaderMap,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuth2Error> {
    let client = client_auth::authenticate(
        state.db(),
        headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    )
    .await?;

    let grant_type = params.grant_type.as_str();
    if !grants::ALL.contains(&grant_type) {
        return Err(OAuth2Error::new(ErrorKind::UnsupportedGrantType).with_hint(format!(
            "The grant type '{grant_type}' is not supported."
        )));
    }
    if !client.is_grant_type_allowed(grant_type) {
        return Err(OAuth2Error::unauthorized_client(format!(
            "The OAuth 2.0 Client is not allowed to use authorization grant '{grant_type}'."
        )));
    }

    match grant_type {
        grants::AUTHORIZATION_CODE => authorization_code::exchange(state, &client, params).await,
        grants::REFRESH_TOKEN => refresh::exchange(state, &client, params).await,
        grants::CLIENT_CREDENTIALS => client_credentials::exchange(state, &client, params).await,
        grants::DEVICE_CODE => device::exchange(state, &client, params).await,
        grants::JWT_BEARER => jwt_bearer::exchange(state, &client, params).await,
        _ => Err(OAuth2Error::new(ErrorKind::UnsupportedGrantType)),
    }
}
