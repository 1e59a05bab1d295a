//! `urn:ietf:params:oauth:grant-type:jwt-bearer` grant (RFC 7523).
//!
//! The assertion is read unverified first to find the trusted issuer, then
//! verified with the issuer's registered key. The `jti` is recorded with a
//! primary-key insert so a second presentation fails even when re-signed.

use jsonwebtoken::{DecodingKey, Validation, jwk::Jwk};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, SqlErr};
use serde::Deserialize;
use serde_json::Map;
use time::OffsetDateTime;

use crate::entity::{jwt_bearer_grant, jwt_bearer_jti, oauth2_client};
use crate::error::OAuth2Error;
use crate::oauth2::grants::client_credentials::requested_scope_and_audience;
use crate::oauth2::issuer::{self, IssueRequest, TokenResponse};
use crate::oauth2::jwt::deserialize_audience;
use crate::oauth2::{scope, secrets, token::TokenRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct Assertion {
    iss: Option<String>,
    sub: Option<String>,
    #[serde(default, deserialize_with = "deserialize_audience")]
    aud: Vec<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    jti: Option<String>,
}

fn missing_claim(claim: &str, description: &str) -> OAuth2Error {
    OAuth2Error::invalid_grant(format!(
        "The JWT in 'assertion' request parameter MUST contain an '{claim}' ({description}) claim."
    ))
}

fn read_unverified(assertion: &str) -> Result<(jsonwebtoken::Header, Assertion), OAuth2Error> {
    let header = jsonwebtoken::decode_header(assertion).map_err(|e| {
        OAuth2Error::invalid_grant(format!("Unable to parse the JSON Web Token passed in 'assertion': {e}"))
    })?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    let claims = jsonwebtoken::decode::<Assertion>(
        assertion,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|e| {
        OAuth2Error::invalid_grant(format!("Unable to parse the JSON Web Token passed in 'assertion': {e}"))
    })?
    .claims;
    Ok((header, claims))
}

/// Grant for `(issuer, subject)`, falling back to the issuer's any-subject
/// grant. Without a subject only the any-subject grant applies.
async fn find_grant(
    state: &AppState,
    issuer: &str,
    subject: Option<&str>,
) -> Result<Option<jwt_bearer_grant::Model>, OAuth2Error> {
    if let Some(subject) = subject {
        let exact = jwt_bearer_grant::Entity::find()
            .filter(jwt_bearer_grant::Column::Issuer.eq(issuer))
            .filter(jwt_bearer_grant::Column::Subject.eq(subject))
            .filter(jwt_bearer_grant::Column::AllowAnySubject.eq(false))
            .one(state.db())
            .await?;
        if exact.is_some() {
            return Ok(exact);
        }
    }
    Ok(jwt_bearer_grant::Entity::find()
        .filter(jwt_bearer_grant::Column::Issuer.eq(issuer))
        .filter(jwt_bearer_grant::Column::AllowAnySubject.eq(true))
        .one(state.db())
        .await?)
}

pub async fn exchange(
    state: &AppState,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuth2Error> {
    let config = &state.config.oauth2;
    let assertion = params
        .assertion
        .as_deref()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| OAuth2Error::invalid_request("The 'assertion' parameter is missing."))?;

    let (header, claims) = read_unverified(assertion)?;
    let iss = claims.iss.filter(|v| !v.is_empty()).ok_or_else(|| missing_claim("iss", "issuer"))?;
    let sub = claims.sub.filter(|v| !v.is_empty());
    let exp = claims.exp.ok_or_else(|| missing_claim("exp", "expiration time"))?;
    let iat = claims.iat.ok_or_else(|| missing_claim("iat", "issued at"))?;
    let jti = claims.jti.filter(|v| !v.is_empty()).ok_or_else(|| missing_claim("jti", "JWT ID"))?;

    let token_endpoint = config.token_endpoint();
    if !claims.aud.iter().any(|aud| aud == &token_endpoint) {
        return Err(OAuth2Error::invalid_grant(format!(
            "The JWT in 'assertion' request parameter MUST contain an 'aud' (audience) claim containing a value '{token_endpoint}' that identifies the authorization server as an intended audience."
        )));
    }

    let grant = find_grant(state, &iss, sub.as_deref()).await?;
    let grant = match (grant, &sub) {
        (Some(grant), _) => grant,
        (None, None) => return Err(missing_claim("sub", "subject")),
        (None, Some(sub)) => {
            tracing::warn!(issuer = %iss, subject = %sub, "No trust relationship for assertion");
            return Err(OAuth2Error::invalid_grant(format!(
                "No public JWK was registered for issuer '{iss}' and subject '{sub}'."
            )));
        }
    };
    if grant.is_expired() {
        return Err(OAuth2Error::invalid_grant(format!(
            "The trust relationship for issuer '{iss}' has expired."
        )));
    }

    let jwk: Jwk = serde_json::from_str(&grant.jwk)
        .map_err(|e| OAuth2Error::server_error(format!("Stored JWK is unreadable: {e}")))?;
    if let (Some(kid), Some(expected)) = (header.kid.as_deref(), jwk.common.key_id.as_deref())
        && kid != expected
    {
        return Err(OAuth2Error::invalid_grant(format!(
            "The JSON Web Token uses signing key with kid '{kid}', which was not registered for issuer '{iss}'."
        )));
    }
    let key = DecodingKey::from_jwk(&jwk)
        .map_err(|e| OAuth2Error::server_error(format!("Stored JWK is unusable: {e}")))?;
    let mut validation = Validation::new(header.alg);
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.validate_nbf = true;
    validation.set_required_spec_claims(&["exp", "iss"]);
    jsonwebtoken::decode::<serde_json::Value>(assertion, &key, &validation).map_err(|e| {
        tracing::warn!(issuer = %iss, error = %e, "Assertion failed verification");
        OAuth2Error::invalid_grant(format!("Unable to verify the integrity of the 'assertion' value: {e}"))
    })?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    if exp - iat > config.jwt_bearer.max_assertion_lifetime {
        return Err(OAuth2Error::invalid_grant(format!(
            "The JWT in 'assertion' request parameter exceeds the maximum lifetime of {} seconds.",
            config.jwt_bearer.max_assertion_lifetime
        )));
    }
    if iat > now + 60 {
        return Err(OAuth2Error::invalid_grant(
            "The JWT in 'assertion' request parameter was issued in the future.",
        ));
    }

    let (requested_scope, audience) = requested_scope_and_audience(state, client, params)?;

    let recorded = jwt_bearer_jti::ActiveModel {
        signature: Set(secrets::signature(&format!("{iss}\n{jti}"))),
        expires_at: Set(OffsetDateTime::from_unix_timestamp(exp)
            .unwrap_or_else(|_| OffsetDateTime::now_utc())),
    }
    .insert(state.db())
    .await;
    if let Err(err) = recorded {
        if let Some(SqlErr::UniqueConstraintViolation(_)) = err.sql_err() {
            tracing::warn!(issuer = %iss, %jti, "Assertion replayed");
            return Err(OAuth2Error::invalid_grant(
                "The jti was already used.",
            ));
        }
        return Err(err.into());
    }

    issuer::issue(
        state.db(),
        config,
        IssueRequest {
            client,
            request_id: uuid::Uuid::new_v4().to_string(),
            // Any-subject grants accept assertions about the issuer itself.
            subject: sub.unwrap_or(iss),
            scope: scope::intersect(&requested_scope, &grant.scopes_list()),
            audience,
            session_id: None,
            auth_time: None,
            acr: None,
            nonce: None,
            access_token_claims: Map::new(),
            id_token_claims: Map::new(),
            allow_refresh: false,
            allow_id_token: false,
        },
    )
    .await
}
