//! `refresh_token` grant with rotation.
//!
//! The presented refresh token is consumed and its successor inserted in one
//! transaction. Presenting a token that is no longer active revokes the whole
//! family, which also kills any descendant an attacker may already hold.

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, TransactionTrait, sea_query::Expr};

use crate::entity::{oauth2_client, oauth2_token};
use crate::error::OAuth2Error;
use crate::oauth2::issuer::{self, IssueRequest, TokenResponse};
use crate::oauth2::{scope, secrets, token::TokenRequest};
use crate::state::AppState;

fn token_inactive() -> OAuth2Error {
    OAuth2Error::invalid_grant(
        "token_inactive: The refresh token is no longer active, it was used or revoked.",
    )
}

pub async fn exchange(
    state: &AppState,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuth2Error> {
    let presented = params
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuth2Error::invalid_request("The 'refresh_token' parameter is missing."))?;
    let signature = secrets::signature(presented);

    let txn = state.db().begin().await?;

    let record = oauth2_token::Entity::find_by_id(&signature)
        .one(&txn)
        .await?
        .filter(oauth2_token::Model::is_refresh_token)
        .ok_or_else(|| OAuth2Error::invalid_grant("The refresh token could not be found."))?;

    if record.client_id != client.id {
        return Err(OAuth2Error::invalid_grant(
            "The refresh token was issued to another client.",
        ));
    }

    let consumed = oauth2_token::Entity::update_many()
        .col_expr(oauth2_token::Column::Active, Expr::value(false))
        .filter(oauth2_token::Column::Signature.eq(&signature))
        .filter(oauth2_token::Column::Active.eq(true))
        .exec(&txn)
        .await?;
    if consumed.rows_affected != 1 {
        let revoked = issuer::revoke_family(&txn, &record.request_id).await?;
        txn.commit().await?;
        tracing::warn!(
            client_id = %client.id,
            request_id = %record.request_id,
            revoked,
            "Inactive refresh token presented, revoked token family"
        );
        return Err(token_inactive());
    }

    if record.is_expired() {
        txn.commit().await?;
        return Err(OAuth2Error::invalid_grant("The refresh token has expired."));
    }

    let original_scope = record.scopes_list();
    let granted_scope = match params.scope.as_deref().map(scope::split) {
        Some(requested) if !requested.is_empty() => {
            if let Some(extra) = requested.iter().find(|s| !scope::contains(&original_scope, s)) {
                return Err(OAuth2Error::invalid_scope(format!(
                    "The requested scope '{extra}' was not granted by the resource owner."
                )));
            }
            requested
        }
        _ => original_scope.clone(),
    };

    issuer::revoke_family_access_tokens(&txn, &record.request_id).await?;

    let response = issuer::issue(
        &txn,
        &state.config.oauth2,
        IssueRequest {
            client,
            request_id: record.request_id.clone(),
            subject: record.subject.clone(),
            scope: granted_scope,
            audience: record.audience_list(),
            session_id: record.session_id.clone(),
            auth_time: record.auth_time,
            acr: record.acr.clone(),
            nonce: None,
            access_token_claims: issuer::parse_claims(&record.access_token_claims),
            id_token_claims: issuer::parse_claims(&record.id_token_claims),
            allow_refresh: true,
            allow_id_token: true,
        },
    )
    .await?;
    txn.commit().await?;

    tracing::info!(client_id = %client.id, request_id = %record.request_id, "Refresh token rotated");
    Ok(response)
}
