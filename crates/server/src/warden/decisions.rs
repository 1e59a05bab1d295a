//! Access decision endpoints.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorResponse};
use crate::oauth2::introspect;
use crate::state::AppState;
use crate::warden::WARDEN_TAG;
use crate::warden::engine::{AccessRequest, Decision, evaluate};

#[derive(Debug, Serialize, ToSchema)]
pub struct AllowedResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenAccessRequest {
    /// Access token presented by the caller
    pub token: String,
    /// Scopes the token must carry
    #[serde(default)]
    pub scopes: Vec<String>,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct TokenAllowedResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

async fn decide(state: &AppState, request: &AccessRequest) -> Result<Decision, ApiError> {
    let (policies, roles) = crate::warden::load(state.db()).await?;
    let decision = evaluate(&policies, &roles, request);
    tracing::debug!(
        subject = %request.subject,
        action = %request.action,
        resource = %request.resource,
        ?decision,
        "Access decision"
    );
    Ok(decision)
}

#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/warden/allowed",
    tag = WARDEN_TAG,
    operation_id = "Check Access",
    summary = "Check whether a subject may perform an action on a resource",
    description = "An explicit deny wins over any allow. Without a matching allow the request is denied.",
    request_body(content = AccessRequest, description = "The access request"),
    responses(
        (status = 200, description = "The decision", body = AllowedResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
    )
)]
pub async fn allowed(
    State(state): State<AppState>,
    payload: Result<Json<AccessRequest>, JsonRejection>,
) -> Result<Json<AllowedResponse>, ApiError> {
    let Json(request) = payload?;
    let decision = decide(&state, &request).await?;
    Ok(Json(AllowedResponse {
        allowed: decision.is_allowed(),
    }))
}

#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/warden/token/allowed",
    tag = WARDEN_TAG,
    operation_id = "Check Token Access",
    summary = "Check whether the owner of an access token may perform an action",
    description = "The token must be an active access token carrying every requested scope. \
                   Policies are evaluated for the token's subject.",
    request_body(content = TokenAccessRequest, description = "The token and access request"),
    responses(
        (status = 200, description = "The decision and token details", body = TokenAllowedResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
    )
)]
pub async fn token_allowed(
    State(state): State<AppState>,
    payload: Result<Json<TokenAccessRequest>, JsonRejection>,
) -> Result<Json<TokenAllowedResponse>, ApiError> {
    let Json(request) = payload?;
    let token = match introspect::active_token(&state, &request.token, &request.scopes).await? {
        Some(token) if token.is_access_token() => token,
        _ => return Ok(Json(TokenAllowedResponse::default())),
    };

    let access = AccessRequest {
        subject: token.subject.clone(),
        action: request.action,
        resource: request.resource,
        context: request.context,
    };
    let decision = decide(&state, &access).await?;
    Ok(Json(TokenAllowedResponse {
        allowed: decision.is_allowed(),
        subject: Some(token.subject.clone()),
        client_id: Some(token.client_id.clone()),
        scope: Some(token.scope.clone()),
        aud: Some(token.audience_list()),
        iss: Some(state.config.oauth2.issuer().to_string()),
        exp: Some(token.expires_at.unix_timestamp()),
        iat: Some(token.created_at.unix_timestamp()),
    }))
}
