//! OpenID Connect UserInfo endpoint.

use axum::{Json, extract::State};
use sea_orm::EntityTrait;
use serde_json::{Map, Value};

use crate::api::auth::AccessToken;
use crate::entity::oauth2_client;
use crate::error::{ErrorResponse, OAuth2Error};
use crate::oauth2::{OAUTH2_TAG, issuer, jwt};
use crate::state::AppState;

#[tracing::instrument(skip(state, token))]
#[utoipa::path(
    method(get, post),
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo",
    summary = "Claims about the authenticated end-user",
    description = "Returns `sub` and the ID token claims granted at consent.\n\n\
                   **Authentication:** the access token as a Bearer token in the Authorization header.",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "User claims as a JSON object"),
        (status = 401, description = "Missing, unknown, revoked or expired access token", body = ErrorResponse),
    )
)]
pub async fn userinfo(
    State(state): State<AppState>,
    AccessToken(token): AccessToken,
) -> Result<Json<Map<String, Value>>, OAuth2Error> {
    let config = &state.config.oauth2;
    let client = oauth2_client::Entity::find_by_id(&token.client_id)
        .one(state.db())
        .await?
        .ok_or_else(|| OAuth2Error::invalid_client("The OAuth 2.0 Client no longer exists."))?;

    let mut claims = issuer::parse_claims(&token.id_token_claims);
    claims.insert(
        "sub".to_string(),
        Value::String(jwt::subject_identifier(
            &client,
            &token.subject,
            &config.subject_identifier_salt,
        )),
    );
    Ok(Json(claims))
}
