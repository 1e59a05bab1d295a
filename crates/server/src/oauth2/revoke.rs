//! Token revocation: RFC 7009 on the public listener, bulk revocation on the admin listener.

use axum::{
    Form,
    extract::{Query, State, rejection::FormRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::entity::oauth2_token;
use crate::error::{ApiError, ErrorResponse, OAuth2Error};
use crate::oauth2::{OAUTH2_TAG, client_auth, issuer};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: String,
    /// Accepted for compatibility, the token is found by its signature either way
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/oauth2/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke an access or refresh token",
    description = "Revokes exactly the presented token (RFC 7009). Revoking an access token leaves its \
                   refresh token usable and vice versa.\n\n\
                   Unknown tokens are accepted silently. Tokens issued to another client yield \
                   `unauthorized_client`.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked, or unknown"),
        (status = 400, description = "Malformed request, or token belongs to another client", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<RevokeRequest>, FormRejection>,
) -> Response {
    let Form(params) = match form {
        Ok(form) => form,
        Err(rejection) => return OAuth2Error::from(rejection).into_response(),
    };
    match revoke_token(&state, &headers, &params).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn revoke_token(
    state: &AppState,
    headers: &HeaderMap,
    params: &RevokeRequest,
) -> Result<(), OAuth2Error> {
    let client = client_auth::authenticate(
        state.db(),
        headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    )
    .await?;

    let Some(record) = issuer::find_token(state.db(), &params.token).await? else {
        tracing::debug!(client_id = %client.id, "Revocation of unknown token ignored");
        return Ok(());
    };
    if record.client_id != client.id {
        tracing::warn!(client_id = %client.id, owner = %record.client_id, "Client tried to revoke a foreign token");
        return Err(OAuth2Error::unauthorized_client(
            "The token was issued to another OAuth 2.0 Client.",
        ));
    }

    oauth2_token::Entity::update_many()
        .col_expr(oauth2_token::Column::Active, Expr::value(false))
        .filter(oauth2_token::Column::Signature.eq(&record.signature))
        .exec(state.db())
        .await?;
    tracing::info!(client_id = %client.id, kind = %record.kind, "Token revoked");
    Ok(())
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RevokeTokensQuery {
    pub client_id: Option<String>,
    pub subject: Option<String>,
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/oauth2/tokens",
    tag = OAUTH2_TAG,
    operation_id = "Revoke Tokens",
    summary = "Revoke every token of a client or a subject",
    description = "Exactly one of `client_id` and `subject` must be given.",
    params(RevokeTokensQuery),
    responses(
        (status = 204, description = "Tokens revoked"),
        (status = 400, description = "Neither or both filters given", body = ErrorResponse),
    )
)]
pub async fn revoke_tokens(
    State(state): State<AppState>,
    Query(query): Query<RevokeTokensQuery>,
) -> Result<StatusCode, ApiError> {
    let client_id = query.client_id.as_deref().filter(|v| !v.is_empty());
    let subject = query.subject.as_deref().filter(|v| !v.is_empty());
    let revoked = match (client_id, subject) {
        (Some(client_id), None) => issuer::revoke_for_client(state.db(), client_id).await?,
        (None, Some(subject)) => issuer::revoke_for_subject(state.db(), subject, None).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "Exactly one of 'client_id' and 'subject' must be given".into(),
            ));
        }
    };
    tracing::info!(?client_id, ?subject, revoked, "Revoked tokens");
    Ok(StatusCode::NO_CONTENT)
}
