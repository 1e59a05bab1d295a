//! `POST /oauth2/introspect` (RFC 7662), served on the admin listener.

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::entity::oauth2_token;
use crate::error::{ApiError, ErrorResponse};
use crate::oauth2::{OAUTH2_TAG, issuer, scope};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct IntrospectionRequest {
    pub token: String,
    /// Space-separated scopes the token must carry
    pub scope: Option<String>,
}

/// Introspection result. Everything but `active` is omitted for inactive tokens.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// `access_token` or `refresh_token`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn from_token(token: &oauth2_token::Model, issuer: &str) -> Self {
        let ext = issuer::parse_claims(&token.access_token_claims);
        Self {
            active: true,
            sub: Some(token.subject.clone()),
            client_id: Some(token.client_id.clone()),
            scope: Some(token.scope.clone()),
            aud: Some(token.audience_list()),
            iss: Some(issuer.to_string()),
            exp: Some(token.expires_at.unix_timestamp()),
            iat: Some(token.created_at.unix_timestamp()),
            nbf: Some(token.created_at.unix_timestamp()),
            token_type: Some("Bearer".to_string()),
            token_use: Some(token.kind.clone()),
            ext: (!ext.is_empty()).then_some(ext),
        }
    }
}

/// Looks up a presented token and checks that it is usable and carries `required` scopes.
pub async fn active_token(
    state: &AppState,
    token: &str,
    required: &[String],
) -> Result<Option<oauth2_token::Model>, ApiError> {
    let Some(record) = issuer::find_token(state.db(), token).await? else {
        return Ok(None);
    };
    if !record.is_valid() {
        return Ok(None);
    }
    let strategy = state.config.oauth2.scope_strategy;
    if strategy.first_ungranted(&record.scopes_list(), required).is_some() {
        return Ok(None);
    }
    Ok(Some(record))
}

#[tracing::instrument(skip(state, form))]
#[utoipa::path(
    post,
    path = "/oauth2/introspect",
    tag = OAUTH2_TAG,
    operation_id = "Introspect Token",
    summary = "Introspect an access or refresh token",
    description = "Reports whether a token is active. Revoked, expired and unknown tokens, and tokens \
                   lacking one of the requested scopes, are reported as `{\"active\": false}`.",
    request_body(
        content = IntrospectionRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Introspection request"
    ),
    responses(
        (status = 200, description = "Introspection result", body = IntrospectionResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
    )
)]
pub async fn introspect(
    State(state): State<AppState>,
    form: Result<Form<IntrospectionRequest>, FormRejection>,
) -> Result<Json<IntrospectionResponse>, ApiError> {
    let Form(params) = form?;
    let required = scope::split(params.scope.as_deref().unwrap_or_default());
    let response = match active_token(&state, &params.token, &required).await? {
        Some(record) => IntrospectionResponse::from_token(&record, state.config.oauth2.issuer()),
        None => IntrospectionResponse::inactive(),
    };
    tracing::debug!(active = response.active, "Token introspected");
    Ok(Json(response))
}
