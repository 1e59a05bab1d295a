//! `client_credentials` grant.

use serde_json::Map;

use crate::entity::oauth2_client;
use crate::error::OAuth2Error;
use crate::oauth2::issuer::{self, IssueRequest, TokenResponse};
use crate::oauth2::{scope, token::TokenRequest};
use crate::state::AppState;

/// Checks requested scope and audience against the client registration.
pub fn requested_scope_and_audience(
    state: &AppState,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<(Vec<String>, Vec<String>), OAuth2Error> {
    let requested_scope = scope::split(params.scope.as_deref().unwrap_or_default());
    if let Some(denied) = state
        .config
        .oauth2
        .scope_strategy
        .first_ungranted(&client.scopes_list(), &requested_scope)
    {
        return Err(OAuth2Error::invalid_scope(format!(
            "The OAuth 2.0 Client is not allowed to request scope '{denied}'."
        )));
    }

    let requested_audience = scope::split(params.audience.as_deref().unwrap_or_default());
    let client_audience = client.audience_list();
    if let Some(denied) = requested_audience
        .iter()
        .find(|aud| !scope::contains(&client_audience, aud))
    {
        return Err(OAuth2Error::invalid_request(format!(
            "Requested audience '{denied}' has not been whitelisted by the OAuth 2.0 Client."
        )));
    }
    Ok((requested_scope, requested_audience))
}

pub async fn exchange(
    state: &AppState,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuth2Error> {
    if client.is_public() {
        return Err(OAuth2Error::unauthorized_client(
            "The OAuth 2.0 Client is marked as public and is thus not allowed to use authorization grant 'client_credentials'.",
        ));
    }
    let (scope, audience) = requested_scope_and_audience(state, client, params)?;

    issuer::issue(
        state.db(),
        &state.config.oauth2,
        IssueRequest {
            client,
            request_id: uuid::Uuid::new_v4().to_string(),
            subject: client.id.clone(),
            scope,
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
