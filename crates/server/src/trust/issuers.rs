//! Admin API for trusted JWT-bearer issuers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, Jwk},
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::entity::jwt_bearer_grant;
use crate::error::{ApiError, ErrorResponse, conflict_or_db};
use crate::oauth2::scope;
use crate::state::AppState;
use crate::trust::TRUST_TAG;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTrustedIssuer {
    /// Value of the `iss` claim of accepted assertions
    pub issuer: String,
    /// Value of the `sub` claim; must be empty when `allow_any_subject` is set
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub allow_any_subject: bool,
    /// Scopes assertions of this issuer may obtain
    #[serde(default)]
    pub scope: Vec<String>,
    /// Public JSON Web Key the assertions are signed with
    #[schema(value_type = Object)]
    pub jwk: Value,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TrustedIssuer {
    pub id: String,
    pub issuer: String,
    pub subject: String,
    pub allow_any_subject: bool,
    pub scope: Vec<String>,
    pub key_id: String,
    #[schema(value_type = Object)]
    pub jwk: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<jwt_bearer_grant::Model> for TrustedIssuer {
    fn from(grant: jwt_bearer_grant::Model) -> Self {
        Self {
            scope: grant.scopes_list(),
            jwk: serde_json::from_str(&grant.jwk).unwrap_or(Value::Null),
            id: grant.id,
            issuer: grant.issuer,
            subject: grant.subject,
            allow_any_subject: grant.allow_any_subject,
            key_id: grant.key_id,
            expires_at: grant.expires_at,
            created_at: grant.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct IssuerListQuery {
    /// Only relationships of this issuer
    pub issuer: Option<String>,
}

/// Parses `value` as a public signing key usable for assertion verification.
fn parse_public_jwk(value: &Value) -> Result<Jwk, ApiError> {
    let jwk: Jwk = serde_json::from_value(value.clone())
        .map_err(|e| ApiError::BadRequest(format!("Unable to parse the JSON Web Key: {e}")))?;
    if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
        return Err(ApiError::BadRequest(
            "The JSON Web Key must be a public key, not a symmetric secret".into(),
        ));
    }
    DecodingKey::from_jwk(&jwk)
        .map_err(|e| ApiError::BadRequest(format!("The JSON Web Key is not a usable public key: {e}")))?;
    Ok(jwk)
}

#[tracing::instrument(skip(state, request))]
#[utoipa::path(
    post,
    path = "/trust/grants/jwt-bearer/issuers",
    tag = TRUST_TAG,
    operation_id = "Trust JWT Grant Issuer",
    summary = "Trust an issuer of JWT-bearer assertions",
    description = "Either `subject` or `allow_any_subject=true` must be given, not both. \
                   Only one relationship may exist per issuer and subject.",
    request_body(content = CreateTrustedIssuer, description = "Trust relationship"),
    responses(
        (status = 201, description = "Relationship created", body = TrustedIssuer),
        (status = 400, description = "Invalid relationship", body = ErrorResponse),
        (status = 409, description = "Relationship for this issuer and subject exists", body = ErrorResponse),
    )
)]
pub async fn create_issuer(
    State(state): State<AppState>,
    Json(request): Json<CreateTrustedIssuer>,
) -> Result<(StatusCode, Json<TrustedIssuer>), ApiError> {
    let issuer = request.issuer.trim();
    if issuer.is_empty() {
        return Err(ApiError::BadRequest("Field 'issuer' is required".into()));
    }
    let subject = request
        .subject
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    match (subject.is_empty(), request.allow_any_subject) {
        (true, false) => {
            return Err(ApiError::BadRequest(
                "Field 'subject' is required unless 'allow_any_subject' is set".into(),
            ));
        }
        (false, true) => {
            return Err(ApiError::BadRequest(
                "Field 'subject' must be empty when 'allow_any_subject' is set".into(),
            ));
        }
        _ => {}
    }
    let expires_at = request
        .expires_at
        .ok_or_else(|| ApiError::BadRequest("Field 'expires_at' is required".into()))?;
    let jwk = parse_public_jwk(&request.jwk)?;
    let jwk_json = serde_json::to_string(&jwk)
        .map_err(|e| ApiError::Internal(format!("Failed to encode JWK: {e}")))?;

    let grant = jwt_bearer_grant::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        issuer: Set(issuer.to_string()),
        subject: Set(subject.to_string()),
        allow_any_subject: Set(request.allow_any_subject),
        scope: Set(scope::join(&request.scope)),
        key_id: Set(jwk.common.key_id.clone().unwrap_or_default()),
        jwk: Set(jwk_json),
        expires_at: Set(expires_at),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(state.db())
    .await
    .map_err(|e| {
        conflict_or_db(
            e,
            format!("A trust relationship for issuer '{issuer}' and subject '{subject}' already exists"),
        )
    })?;

    tracing::info!(
        id = %grant.id,
        issuer = %grant.issuer,
        subject = %grant.subject,
        allow_any_subject = grant.allow_any_subject,
        "Trusted JWT-bearer issuer"
    );
    Ok((StatusCode::CREATED, Json(grant.into())))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/trust/grants/jwt-bearer/issuers",
    tag = TRUST_TAG,
    operation_id = "List Trusted JWT Grant Issuers",
    summary = "List trusted issuers",
    params(IssuerListQuery),
    responses(
        (status = 200, description = "Trust relationships", body = [TrustedIssuer]),
    )
)]
pub async fn list_issuers(
    State(state): State<AppState>,
    Query(query): Query<IssuerListQuery>,
) -> Result<Json<Vec<TrustedIssuer>>, ApiError> {
    let mut select = jwt_bearer_grant::Entity::find().order_by_asc(jwt_bearer_grant::Column::CreatedAt);
    if let Some(issuer) = query.issuer.as_deref().filter(|i| !i.is_empty()) {
        select = select.filter(jwt_bearer_grant::Column::Issuer.eq(issuer));
    }
    let grants = select.all(state.db()).await?;
    Ok(Json(grants.into_iter().map(TrustedIssuer::from).collect()))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/trust/grants/jwt-bearer/issuers/{id}",
    tag = TRUST_TAG,
    operation_id = "Get Trusted JWT Grant Issuer",
    summary = "Get a trust relationship",
    params(("id" = String, Path, description = "Relationship ID")),
    responses(
        (status = 200, description = "The relationship", body = TrustedIssuer),
        (status = 404, description = "Unknown relationship", body = ErrorResponse),
    )
)]
pub async fn get_issuer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TrustedIssuer>, ApiError> {
    let grant = jwt_bearer_grant::Entity::find_by_id(&id)
        .one(state.db())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Trust relationship '{id}' does not exist")))?;
    Ok(Json(grant.into()))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/trust/grants/jwt-bearer/issuers/{id}",
    tag = TRUST_TAG,
    operation_id = "Delete Trusted JWT Grant Issuer",
    summary = "Remove a trust relationship",
    params(("id" = String, Path, description = "Relationship ID")),
    responses(
        (status = 204, description = "Relationship removed"),
        (status = 404, description = "Unknown relationship", body = ErrorResponse),
    )
)]
pub async fn delete_issuer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = jwt_bearer_grant::Entity::delete_by_id(&id)
        .exec(state.db())
        .await?;
    if deleted.rows_affected == 0 {
        return Err(ApiError::NotFound(format!("Trust relationship '{id}' does not exist")));
    }
    tracing::info!(%id, "Removed trust relationship");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn symmetric_keys_are_refused() {
        let jwk = json!({"kty": "oct", "k": "c2VjcmV0", "kid": "a"});
        assert!(matches!(parse_public_jwk(&jwk), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn garbage_is_refused() {
        assert!(matches!(
            parse_public_jwk(&json!({"kty": "nope"})),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn okp_public_key_is_accepted() {
        let jwk = json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "kid": "issuer-key",
            "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"
        });
        let parsed = parse_public_jwk(&jwk).unwrap();
        assert_eq!(parsed.common.key_id.as_deref(), Some("issuer-key"));
    }
}
