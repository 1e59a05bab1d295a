//! `GET /oauth2/auth`: authorization endpoint.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use sea_orm::EntityTrait;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::entity::oauth2_client;
use crate::error::{ErrorKind, OAuth2Error};
use crate::oauth2::flow::{
    self, AuthorizationRequest, FlowError, PROMPT_CONSENT, PROMPT_LOGIN, PROMPT_NONE,
    PROMPT_SELECT_ACCOUNT,
};
use crate::oauth2::{OAUTH2_TAG, client_auth, pkce, scope};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AuthorizeParams {
    /// Must be `code`
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    /// Space-separated scopes
    pub scope: Option<String>,
    /// Space-separated audiences for the access token
    pub audience: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// Space-separated subset of `none`, `login`, `consent`, `select_account`
    pub prompt: Option<String>,
    pub max_age: Option<i64>,
    pub login_hint: Option<String>,
    pub acr_values: Option<String>,
    /// Set by the login UI redirect
    pub login_verifier: Option<String>,
    /// Set by the consent UI redirect
    pub consent_verifier: Option<String>,
}

#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    get,
    path = "/oauth2/auth",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start or continue an authorization code flow",
    description = "Validates the authorization request and redirects the browser to the login UI, \
                   the consent UI, or back to the client with an authorization code.\n\n\
                   Unknown clients and unregistered redirect URIs are reported on the server error page. \
                   Other errors are returned to the client's redirect URI.\n\n\
                   The login and consent UIs send the browser back here with `login_verifier` or \
                   `consent_verifier`.",
    params(AuthorizeParams),
    responses(
        (status = 303, description = "Redirect to the login UI, the consent UI, the client, or the error page"),
    )
)]
pub async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let result = if let Some(verifier) = params.login_verifier.clone() {
        flow::resume_login(&state, &verifier).await
    } else if let Some(verifier) = params.consent_verifier.clone() {
        flow::resume_consent(&state, &verifier).await
    } else {
        match validate(&state, params).await {
            Ok((client, request)) => flow::begin(&state, &headers, &client, request, None).await,
            Err(err) => Err(err),
        }
    };
    result.into_response()
}

/// Checks a new authorization request against the client registration.
async fn validate(
    state: &AppState,
    params: AuthorizeParams,
) -> Result<(oauth2_client::Model, AuthorizationRequest), FlowError> {
    let config = &state.config.oauth2;

    let client = match params.client_id.as_deref().filter(|id| !id.is_empty()) {
        Some(client_id) => oauth2_client::Entity::find_by_id(client_id)
            .one(state.db())
            .await?,
        None => None,
    };
    let Some(client) = client else {
        return Err(FlowError::page(
            config,
            OAuth2Error::invalid_client("The requested OAuth 2.0 Client does not exist."),
        ));
    };

    let registered = client.redirect_uris_list();
    let redirect_uri = match params.redirect_uri.as_deref().filter(|uri| !uri.is_empty()) {
        Some(uri) if client.is_redirect_uri_allowed(uri) => uri.to_string(),
        Some(_) => {
            return Err(FlowError::page(
                config,
                OAuth2Error::invalid_request(
                    "The 'redirect_uri' parameter does not match any of the OAuth 2.0 Client's pre-registered redirect urls.",
                ),
            ));
        }
        None if registered.len() == 1 => registered[0].clone(),
        None => {
            return Err(FlowError::page(
                config,
                OAuth2Error::invalid_request(
                    "The 'redirect_uri' parameter is required when the OAuth 2.0 Client registered more than one redirect url.",
                ),
            ));
        }
    };

    let state_param = params.state.as_deref();
    let fail = |error: OAuth2Error| FlowError::client(&redirect_uri, state_param, error);

    let response_type = params.response_type.clone().unwrap_or_default();
    if response_type != "code" || !client.is_response_type_allowed(&response_type) {
        return Err(fail(OAuth2Error::new(ErrorKind::UnsupportedResponseType).with_hint(
            format!("The client is not allowed to request response_type '{response_type}'."),
        )));
    }
    if !client.is_grant_type_allowed("authorization_code") {
        return Err(fail(OAuth2Error::unauthorized_client(
            "The client is not allowed to request authorization codes.",
        )));
    }

    let requested_scope = scope::split(params.scope.as_deref().unwrap_or_default());
    if let Some(denied) = config
        .scope_strategy
        .first_ungranted(&client.scopes_list(), &requested_scope)
    {
        return Err(fail(OAuth2Error::invalid_scope(format!(
            "The OAuth 2.0 Client is not allowed to request scope '{denied}'."
        ))));
    }

    let requested_audience = scope::split(params.audience.as_deref().unwrap_or_default());
    let client_audience = client.audience_list();
    if let Some(denied) = requested_audience
        .iter()
        .find(|aud| !scope::contains(&client_audience, aud))
    {
        return Err(fail(OAuth2Error::invalid_request(format!(
            "Requested audience '{denied}' has not been whitelisted by the OAuth 2.0 Client."
        ))));
    }

    let prompt = scope::split(params.prompt.as_deref().unwrap_or_default());
    if let Some(unknown) = prompt.iter().find(|p| {
        ![PROMPT_NONE, PROMPT_LOGIN, PROMPT_CONSENT, PROMPT_SELECT_ACCOUNT].contains(&p.as_str())
    }) {
        return Err(fail(OAuth2Error::invalid_request(format!(
            "Used unknown value '{unknown}' for prompt parameter."
        ))));
    }
    if scope::contains(&prompt, PROMPT_NONE) && prompt.len() > 1 {
        return Err(fail(OAuth2Error::invalid_request(
            "Parameter 'prompt' was set to 'none', but contains other values as well which is not allowed.",
        )));
    }

    let code_challenge = params.code_challenge.clone().filter(|c| !c.is_empty());
    let code_challenge_method = match &code_challenge {
        Some(_) => {
            let method = params
                .code_challenge_method
                .clone()
                .unwrap_or_else(|| pkce::METHOD_PLAIN.to_string());
            if !pkce::is_supported_method(&method) {
                return Err(fail(OAuth2Error::invalid_request(format!(
                    "The code_challenge_method '{method}' is not supported."
                ))));
            }
            Some(method)
        }
        None => {
            if config.enforce_pkce_for_public_clients
                && client.token_endpoint_auth_method == client_auth::METHOD_NONE
            {
                return Err(fail(OAuth2Error::invalid_request(
                    "Clients must include a code_challenge when performing the authorize code flow, but it is missing.",
                )));
            }
            None
        }
    };

    let request = AuthorizationRequest {
        response_type,
        client_id: client.id.clone(),
        redirect_uri: redirect_uri.clone(),
        redirect_uri_explicit: params.redirect_uri.as_deref().is_some_and(|uri| !uri.is_empty()),
        scope: requested_scope,
        audience: requested_audience,
        state: params.state.clone(),
        nonce: params.nonce.clone(),
        code_challenge,
        code_challenge_method,
        prompt,
        max_age: params.max_age,
        login_hint: params.login_hint.clone(),
        acr_values: params.acr_values.clone(),
    };
    Ok((client, request))
}
