//! OpenID Connect discovery, JWKS publication and signing key administration.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::oauth2::client_auth;
use crate::oauth2::keys::{self, ALGORITHM, KeySet};
use crate::oauth2::{OAUTH2_TAG, grants, pkce, scope};
use crate::state::AppState;

pub const KEYS_TAG: &str = "Keys";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub end_session_endpoint: String,
    pub device_authorization_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub userinfo_signing_alg_values_supported: Vec<String>,
    pub request_parameter_supported: bool,
    pub claims_parameter_supported: bool,
    pub frontchannel_logout_supported: bool,
    pub frontchannel_logout_session_supported: bool,
    pub backchannel_logout_supported: bool,
    pub backchannel_logout_session_supported: bool,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn parse_set(set: &str) -> Result<KeySet, ApiError> {
    KeySet::parse(set).ok_or_else(|| ApiError::NotFound(format!("Unknown key set '{set}'")))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Endpoint URLs and the grant types, response types, subject types, scopes, claims \
                   and algorithms this server supports.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<AppState>) -> Json<OpenIdConfiguration> {
    let config = &state.config.oauth2;
    Json(OpenIdConfiguration {
        issuer: config.issuer().to_string(),
        authorization_endpoint: config.public_url("/oauth2/auth"),
        token_endpoint: config.token_endpoint(),
        jwks_uri: config.public_url("/.well-known/jwks.json"),
        userinfo_endpoint: config.public_url("/userinfo"),
        revocation_endpoint: config.public_url("/oauth2/revoke"),
        end_session_endpoint: config.public_url("/oauth2/sessions/logout"),
        device_authorization_endpoint: config.public_url("/oauth2/device/auth"),
        registration_endpoint: config
            .dynamic_registration
            .enabled
            .then(|| config.public_url("/oauth2/register")),
        response_types_supported: strings(&["code"]),
        response_modes_supported: strings(&["query"]),
        grant_types_supported: strings(&grants::ALL),
        subject_types_supported: strings(&["public", "pairwise"]),
        scopes_supported: strings(&[scope::OPENID, scope::OFFLINE_ACCESS, scope::OFFLINE]),
        claims_supported: strings(&["sub", "iss", "aud", "auth_time", "acr", "sid", "nonce"]),
        token_endpoint_auth_methods_supported: strings(&client_auth::METHODS),
        code_challenge_methods_supported: strings(&[pkce::METHOD_S256, pkce::METHOD_PLAIN]),
        id_token_signing_alg_values_supported: strings(&[ALGORITHM]),
        userinfo_signing_alg_values_supported: strings(&["none"]),
        request_parameter_supported: false,
        claims_parameter_supported: false,
        frontchannel_logout_supported: true,
        frontchannel_logout_session_supported: true,
        backchannel_logout_supported: true,
        backchannel_logout_session_supported: true,
    })
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = OAUTH2_TAG,
    operation_id = "JSON Web Keys Discovery",
    summary = "Public signing keys",
    description = "Every public key of every key set, including rotated-out keys that may still \
                   verify previously issued tokens.",
    responses(
        (status = 200, description = "JSON Web Key Set"),
    )
)]
pub async fn jwks(State(state): State<AppState>) -> Result<Json<JwkSet>, ApiError> {
    for set in KeySet::ALL {
        keys::active_key(state.db(), set).await?;
    }
    let keys = keys::public_keys(state.db(), None).await?;
    Ok(Json(keys))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/keys/{set}",
    tag = KEYS_TAG,
    operation_id = "Get Key Set",
    summary = "Public keys of one key set",
    params(
        ("set" = String, Path, description = "`openid.id-token` or `oauth2.access-token`"),
    ),
    responses(
        (status = 200, description = "JSON Web Key Set"),
        (status = 404, description = "Unknown key set"),
    )
)]
pub async fn get_key_set(
    State(state): State<AppState>,
    Path(set): Path<String>,
) -> Result<Json<JwkSet>, ApiError> {
    let set = parse_set(&set)?;
    keys::active_key(state.db(), set).await?;
    let keys = keys::public_keys(state.db(), Some(set)).await?;
    Ok(Json(keys))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/keys/{set}/rotate",
    tag = KEYS_TAG,
    operation_id = "Rotate Key Set",
    summary = "Rotate the signing key of a key set",
    description = "The new key signs everything issued from now on. Old public keys stay published.",
    params(
        ("set" = String, Path, description = "`openid.id-token` or `oauth2.access-token`"),
    ),
    responses(
        (status = 201, description = "The new public key"),
        (status = 404, description = "Unknown key set"),
    )
)]
pub async fn rotate_key_set(
    State(state): State<AppState>,
    Path(set): Path<String>,
) -> Result<(StatusCode, Json<Jwk>), ApiError> {
    let set = parse_set(&set)?;
    let key = keys::rotate(state.db(), set).await?;
    Ok((StatusCode::CREATED, Json(keys::to_jwk(&key))))
}
