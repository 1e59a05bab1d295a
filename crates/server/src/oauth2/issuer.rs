//! Token issuance and token family bookkeeping.
//!
//! Every grant ends in [`issue`]: it mints the access token (opaque or JWT,
//! per client strategy), optionally a refresh token and an ID token, and
//! persists the signatures of the first two under the grant's `request_id`.

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

use crate::config::{OAuth2Config, TokenStrategy};
use crate::entity::{oauth2_authorization_code, oauth2_client, oauth2_token};
use crate::error::OAuth2Error;
use crate::oauth2::jwt::{self, AccessTokenClaims, IdTokenClaims};
use crate::oauth2::keys::{self, KeySet};
use crate::oauth2::{scope, secrets};

pub const TOKEN_TYPE_BEARER: &str = "bearer";

/// Successful token endpoint response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Everything a grant has established about the authorization being exchanged.
#[derive(Debug)]
pub struct IssueRequest<'a> {
    pub client: &'a oauth2_client::Model,
    /// Token family id
    pub request_id: String,
    pub subject: String,
    pub scope: Vec<String>,
    pub audience: Vec<String>,
    pub session_id: Option<String>,
    pub auth_time: Option<OffsetDateTime>,
    pub acr: Option<String>,
    pub nonce: Option<String>,
    pub access_token_claims: Map<String, Value>,
    pub id_token_claims: Map<String, Value>,
    /// Whether the grant type may yield a refresh token at all
    pub allow_refresh: bool,
    /// Whether the grant type may yield an ID token at all
    pub allow_id_token: bool,
}

pub fn parse_claims(raw: &str) -> Map<String, Value> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn claims_to_string(claims: &Map<String, Value>) -> String {
    Value::Object(claims.clone()).to_string()
}

fn strategy_for(client: &oauth2_client::Model, config: &OAuth2Config) -> TokenStrategy {
    TokenStrategy::parse(&client.access_token_strategy).unwrap_or(config.access_token_strategy)
}

/// Mints and stores the tokens of one grant.
pub async fn issue<C: ConnectionTrait>(
    conn: &C,
    config: &OAuth2Config,
    request: IssueRequest<'_>,
) -> Result<TokenResponse, OAuth2Error> {
    let now = OffsetDateTime::now_utc();
    let client = request.client;
    let access_expires_at = now + Duration::seconds(config.ttl.access_token);

    let access_token = match strategy_for(client, config) {
        TokenStrategy::Opaque => secrets::generate_token(),
        TokenStrategy::Jwt => {
            let claims = AccessTokenClaims {
                iss: config.issuer().to_string(),
                sub: request.subject.clone(),
                aud: request.audience.clone(),
                client_id: client.id.clone(),
                scp: request.scope.clone(),
                jti: uuid::Uuid::new_v4().to_string(),
                iat: now.unix_timestamp(),
                nbf: now.unix_timestamp(),
                exp: access_expires_at.unix_timestamp(),
                ext: request.access_token_claims.clone(),
            };
            keys::sign(conn, KeySet::AccessToken, &claims).await?
        }
    };

    let record = |signature: String, kind: &str, expires_at: OffsetDateTime| {
        oauth2_token::ActiveModel {
            signature: Set(signature),
            kind: Set(kind.to_string()),
            request_id: Set(request.request_id.clone()),
            client_id: Set(client.id.clone()),
            subject: Set(request.subject.clone()),
            scope: Set(scope::join(&request.scope)),
            audience: Set(scope::join(&request.audience)),
            session_id: Set(request.session_id.clone()),
            auth_time: Set(request.auth_time),
            acr: Set(request.acr.clone()),
            access_token_claims: Set(claims_to_string(&request.access_token_claims)),
            id_token_claims: Set(claims_to_string(&request.id_token_claims)),
            active: Set(true),
            expires_at: Set(expires_at),
            created_at: Set(now),
        }
    };

    record(
        secrets::signature(&access_token),
        oauth2_token::KIND_ACCESS_TOKEN,
        access_expires_at,
    )
    .insert(conn)
    .await?;

    let refresh_token = if request.allow_refresh
        && scope::grants_offline_access(&request.scope)
        && client.is_grant_type_allowed("refresh_token")
    {
        let token = secrets::generate_token();
        record(
            secrets::signature(&token),
            oauth2_token::KIND_REFRESH_TOKEN,
            now + Duration::seconds(config.ttl.refresh_token),
        )
        .insert(conn)
        .await?;
        Some(token)
    } else {
        None
    };

    let id_token = if request.allow_id_token && scope::contains(&request.scope, scope::OPENID) {
        let claims = IdTokenClaims {
            iss: config.issuer().to_string(),
            sub: jwt::subject_identifier(
                client,
                &request.subject,
                &config.subject_identifier_salt,
            ),
            aud: vec![client.id.clone()],
            iat: now.unix_timestamp(),
            exp: (now + Duration::seconds(config.ttl.id_token)).unix_timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            auth_time: request.auth_time.map(OffsetDateTime::unix_timestamp),
            nonce: request.nonce.clone().filter(|n| !n.is_empty()),
            sid: request.session_id.clone(),
            at_hash: Some(jwt::at_hash(&access_token)),
            acr: request.acr.clone(),
            extra: request.id_token_claims.clone(),
        };
        Some(keys::sign(conn, KeySet::IdToken, &claims).await?)
    } else {
        None
    };

    tracing::info!(
        client_id = %client.id,
        request_id = %request.request_id,
        refresh_token = refresh_token.is_some(),
        id_token = id_token.is_some(),
        "Issued tokens"
    );

    Ok(TokenResponse {
        access_token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: config.ttl.access_token,
        scope: scope::join(&request.scope),
        refresh_token,
        id_token,
    })
}

/// Looks a presented token up by its signature.
pub async fn find_token<C: ConnectionTrait>(
    conn: &C,
    token: &str,
) -> Result<Option<oauth2_token::Model>, DbErr> {
    oauth2_token::Entity::find_by_id(secrets::signature(token))
        .one(conn)
        .await
}

/// Deactivates every token and code of a token family.
pub async fn revoke_family<C: ConnectionTrait>(conn: &C, request_id: &str) -> Result<u64, DbErr> {
    let tokens = oauth2_token::Entity::update_many()
        .col_expr(oauth2_token::Column::Active, Expr::value(false))
        .filter(oauth2_token::Column::RequestId.eq(request_id))
        .filter(oauth2_token::Column::Active.eq(true))
        .exec(conn)
        .await?;
    oauth2_authorization_code::Entity::update_many()
        .col_expr(oauth2_authorization_code::Column::Active, Expr::value(false))
        .filter(oauth2_authorization_code::Column::RequestId.eq(request_id))
        .exec(conn)
        .await?;
    Ok(tokens.rows_affected)
}

/// Deactivates the access tokens of a family, leaving refresh tokens alone.
pub async fn revoke_family_access_tokens<C: ConnectionTrait>(
    conn: &C,
    request_id: &str,
) -> Result<u64, DbErr> {
    let result = oauth2_token::Entity::update_many()
        .col_expr(oauth2_token::Column::Active, Expr::value(false))
        .filter(oauth2_token::Column::RequestId.eq(request_id))
        .filter(oauth2_token::Column::Kind.eq(oauth2_token::KIND_ACCESS_TOKEN))
        .filter(oauth2_token::Column::Active.eq(true))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Deactivates the tokens and codes minted from any of `request_ids`.
pub async fn revoke_families<C: ConnectionTrait>(conn: &C, request_ids: &[String]) -> Result<u64, DbErr> {
    if request_ids.is_empty() {
        return Ok(0);
    }
    let tokens = oauth2_token::Entity::update_many()
        .col_expr(oauth2_token::Column::Active, Expr::value(false))
        .filter(oauth2_token::Column::RequestId.is_in(request_ids.iter().cloned()))
        .filter(oauth2_token::Column::Active.eq(true))
        .exec(conn)
        .await?;
    oauth2_authorization_code::Entity::update_many()
        .col_expr(oauth2_authorization_code::Column::Active, Expr::value(false))
        .filter(oauth2_authorization_code::Column::RequestId.is_in(request_ids.iter().cloned()))
        .exec(conn)
        .await?;
    Ok(tokens.rows_affected)
}

/// Deactivates every token of `subject`, optionally only those of one client.
pub async fn revoke_for_subject<C: ConnectionTrait>(
    conn: &C,
    subject: &str,
    client_id: Option<&str>,
) -> Result<u64, DbErr> {
    let mut update = oauth2_token::Entity::update_many()
        .col_expr(oauth2_token::Column::Active, Expr::value(false))
        .filter(oauth2_token::Column::Subject.eq(subject))
        .filter(oauth2_token::Column::Active.eq(true));
    if let Some(client_id) = client_id {
        update = update.filter(oauth2_token::Column::ClientId.eq(client_id));
    }
    Ok(update.exec(conn).await?.rows_affected)
}

/// Deactivates every token issued to a client.
pub async fn revoke_for_client<C: ConnectionTrait>(conn: &C, client_id: &str) -> Result<u64, DbErr> {
    let result = oauth2_token::Entity::update_many()
        .col_expr(oauth2_token::Column::Active, Expr::value(false))
        .filter(oauth2_token::Column::ClientId.eq(client_id))
        .filter(oauth2_token::Column::Active.eq(true))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
