//! `authorization_code` grant.

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};

use crate::entity::{oauth2_authorization_code, oauth2_client};
use crate::error::OAuth2Error;
use crate::oauth2::issuer::{self, IssueRequest, TokenResponse};
use crate::oauth2::{scope, secrets, token::TokenRequest};
use crate::state::AppState;

pub async fn exchange(
    state: &AppState,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuth2Error> {
    let db = state.db();
    let code = params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OAuth2Error::invalid_request("The 'code' parameter is missing."))?;
    let signature = secrets::signature(code);

    let record = oauth2_authorization_code::Entity::find_by_id(&signature)
        .one(db)
        .await?
        .ok_or_else(|| OAuth2Error::invalid_grant("The authorization code could not be found."))?;

    if record.client_id != client.id {
        return Err(OAuth2Error::invalid_grant(
            "The authorization code was issued to another client.",
        ));
    }

    let consumed = oauth2_authorization_code::Entity::update_many()
        .col_expr(oauth2_authorization_code::Column::Active, Expr::value(false))
        .filter(oauth2_authorization_code::Column::Signature.eq(&signature))
        .filter(oauth2_authorization_code::Column::Active.eq(true))
        .exec(db)
        .await?;
    if consumed.rows_affected != 1 {
        let revoked = issuer::revoke_family(db, &record.request_id).await?;
        tracing::warn!(
            client_id = %client.id,
            request_id = %record.request_id,
            revoked,
            "Authorization code reused, revoked token family"
        );
        return Err(OAuth2Error::invalid_grant(
            "The authorization code has already been used.",
        ));
    }

    if record.is_expired() {
        return Err(OAuth2Error::invalid_grant("The authorization code has expired."));
    }
    match params.redirect_uri.as_deref().filter(|uri| !uri.is_empty()) {
        Some(redirect_uri) if redirect_uri != record.redirect_uri => {
            return Err(OAuth2Error::invalid_grant(
                "The 'redirect_uri' parameter does not match the one used in the authorization request.",
            ));
        }
        None if record.redirect_uri_explicit => {
            return Err(OAuth2Error::invalid_grant(
                "The 'redirect_uri' parameter is required because it was included in the authorization request.",
            ));
        }
        _ => {}
    }
    if !record.verify_pkce(params.code_verifier.as_deref()) {
        return Err(OAuth2Error::invalid_grant(
            "The PKCE code challenge did not match the code verifier.",
        ));
    }

    issuer::issue(
        db,
        &state.config.oauth2,
        IssueRequest {
            client,
            request_id: record.request_id.clone(),
            subject: record.subject.clone(),
            scope: record.scopes_list(),
            audience: scope::split(&record.audience),
            session_id: record.session_id.clone(),
            auth_time: Some(record.auth_time),
            acr: record.acr.clone(),
            nonce: record.nonce.clone(),
            access_token_claims: issuer::parse_claims(&record.access_token_claims),
            id_token_claims: issuer::parse_claims(&record.id_token_claims),
            allow_refresh: true,
            allow_id_token: true,
        },
    )
    .await
}
