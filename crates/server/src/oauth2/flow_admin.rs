//! Admin API used by the login, consent and logout UIs.
//!
//! Each UI receives a challenge, fetches the pending request with it, and then
//! accepts or rejects it. Accepting or rejecting is a single conditional update
//! on the pending state, so a request can only be handled once (409 otherwise).

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use sea_orm::{ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::entity::{login_session, logout_request, oauth2_client, oauth2_flow};
use crate::error::ApiError;
use crate::oauth2::flow::{AuthorizationRequest, FlowState, RequestDeniedError, with_query};
use crate::oauth2::{FLOW_TAG, scope, secrets};
use crate::state::AppState;

/// Public view of the client a request was made for.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClientSummary {
    pub client_id: String,
    pub client_name: String,
    pub scope: String,
    pub redirect_uris: Vec<String>,
    pub owner: String,
    pub skip_consent: bool,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
}

impl From<&oauth2_client::Model> for ClientSummary {
    fn from(client: &oauth2_client::Model) -> Self {
        Self {
            client_id: client.id.clone(),
            client_name: client.client_name.clone(),
            scope: client.scope.clone(),
            redirect_uris: client.redirect_uris_list(),
            owner: client.owner.clone(),
            skip_consent: client.skip_consent,
            client_uri: client.client_uri.clone(),
            logo_uri: client.logo_uri.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OidcContext {
    pub login_hint: Option<String>,
    pub acr_values: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub challenge: String,
    pub client: ClientSummary,
    pub requested_scope: Vec<String>,
    pub requested_access_token_audience: Vec<String>,
    /// Always false here: skipped logins never reach the login UI
    pub skip: bool,
    pub subject: String,
    pub request_url: String,
    pub session_id: Option<String>,
    pub oidc_context: OidcContext,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsentRequest {
    pub challenge: String,
    pub client: ClientSummary,
    pub requested_scope: Vec<String>,
    pub requested_access_token_audience: Vec<String>,
    pub skip: bool,
    pub subject: String,
    pub request_url: String,
    pub login_challenge: String,
    pub login_session_id: Option<String>,
    pub acr: Option<String>,
    pub context: Option<Value>,
    pub oidc_context: OidcContext,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub challenge: String,
    pub subject: String,
    pub sid: String,
    pub client_id: Option<String>,
    pub request_url: String,
    pub rp_initiated: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AcceptLoginRequest {
    pub subject: String,
    #[serde(default)]
    pub remember: bool,
    /// Seconds; 0 keeps the session until it is revoked
    #[serde(default)]
    pub remember_for: i64,
    pub acr: Option<String>,
    pub context: Option<Value>,
}

/// Claims to add to the tokens issued from a consent.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ConsentSessionClaims {
    #[serde(default)]
    pub access_token: Map<String, Value>,
    #[serde(default)]
    pub id_token: Map<String, Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AcceptConsentRequest {
    #[serde(default)]
    pub grant_scope: Vec<String>,
    #[serde(default)]
    pub grant_access_token_audience: Vec<String>,
    #[serde(default)]
    pub remember: bool,
    #[serde(default)]
    pub remember_for: i64,
    #[serde(default)]
    pub session: ConsentSessionClaims,
}

/// Where the UI must send the browser next.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CompletedRequest {
    pub redirect_to: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LoginChallengeQuery {
    pub login_challenge: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConsentChallengeQuery {
    pub consent_challenge: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LogoutChallengeQuery {
    pub logout_challenge: String,
}

fn parse_request(flow: &oauth2_flow::Model) -> Result<AuthorizationRequest, ApiError> {
    serde_json::from_str(&flow.request)
        .map_err(|e| ApiError::Internal(format!("stored authorization request: {e}")))
}

async fn pending_flow(
    state: &AppState,
    column: oauth2_flow::Column,
    challenge: &str,
    expected: FlowState,
    kind: &str,
) -> Result<oauth2_flow::Model, ApiError> {
    let flow = oauth2_flow::Entity::find()
        .filter(column.eq(challenge))
        .one(state.db())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("The {kind} request could not be found")))?;
    if flow.is_expired() {
        return Err(ApiError::NotFound(format!("The {kind} request has expired")));
    }
    if FlowState::parse(&flow.state) != Some(expected) {
        return Err(ApiError::Conflict(format!(
            "The {kind} request was already handled"
        )));
    }
    Ok(flow)
}

async fn find_client(state: &AppState, client_id: &str) -> Result<oauth2_client::Model, ApiError> {
    oauth2_client::Entity::find_by_id(client_id)
        .one(state.db())
        .await?
        .ok_or_else(|| ApiError::NotFound("The OAuth 2.0 Client no longer exists".into()))
}

/// Applies `update` to the flow if it is still in `expected`.
async fn transition(
    state: &AppState,
    flow_id: &str,
    expected: FlowState,
    update: oauth2_flow::ActiveModel,
    kind: &str,
) -> Result<(), ApiError> {
    let result = oauth2_flow::Entity::update_many()
        .set(update)
        .filter(oauth2_flow::Column::Id.eq(flow_id))
        .filter(oauth2_flow::Column::State.eq(expected.as_str()))
        .exec(state.db())
        .await?;
    if result.rows_affected != 1 {
        return Err(ApiError::Conflict(format!(
            "The {kind} request was already handled"
        )));
    }
    Ok(())
}

fn auth_redirect(state: &AppState, key: &str, verifier: &str) -> CompletedRequest {
    CompletedRequest {
        redirect_to: with_query(
            &state.config.oauth2.public_url("/oauth2/auth"),
            &[(key, verifier)],
        ),
    }
}

fn rejection(body: &RequestDeniedError) -> Result<String, ApiError> {
    serde_json::to_string(body).map_err(|e| ApiError::Internal(e.to_string()))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/oauth2/auth/requests/login",
    tag = FLOW_TAG,
    operation_id = "Get Login Request",
    summary = "Fetch a pending login request",
    params(LoginChallengeQuery),
    responses(
        (status = 200, description = "The login request", body = LoginRequest),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn get_login_request(
    State(state): State<AppState>,
    Query(query): Query<LoginChallengeQuery>,
) -> Result<Json<LoginRequest>, ApiError> {
    let flow = pending_flow(
        &state,
        oauth2_flow::Column::Id,
        &query.login_challenge,
        FlowState::LoginRequested,
        "login",
    )
    .await?;
    let request = parse_request(&flow)?;
    let client = find_client(&state, &flow.client_id).await?;

    Ok(Json(LoginRequest {
        challenge: flow.id.clone(),
        client: ClientSummary::from(&client),
        requested_scope: flow.requested_scope_list(),
        requested_access_token_audience: flow.requested_audience_list(),
        skip: flow.login_skip,
        subject: flow.subject.clone().unwrap_or_default(),
        request_url: request.request_url(&state.config.oauth2),
        session_id: flow.session_id.clone(),
        oidc_context: OidcContext {
            login_hint: request.login_hint,
            acr_values: request.acr_values,
        },
    }))
}

#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    put,
    path = "/oauth2/auth/requests/login/accept",
    tag = FLOW_TAG,
    operation_id = "Accept Login Request",
    summary = "Accept a login request",
    description = "Marks the user as authenticated. With `remember` the login session is stored in a \
                   cookie so later authorization requests skip the login UI.",
    params(LoginChallengeQuery),
    request_body = AcceptLoginRequest,
    responses(
        (status = 200, description = "Login accepted", body = CompletedRequest),
        (status = 400, description = "Invalid body"),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn accept_login_request(
    State(state): State<AppState>,
    Query(query): Query<LoginChallengeQuery>,
    Json(body): Json<AcceptLoginRequest>,
) -> Result<Json<CompletedRequest>, ApiError> {
    if body.subject.trim().is_empty() {
        return Err(ApiError::BadRequest("Field 'subject' must not be empty".into()));
    }
    if body.remember_for < 0 {
        return Err(ApiError::BadRequest("Field 'remember_for' must not be negative".into()));
    }
    let flow = pending_flow(
        &state,
        oauth2_flow::Column::Id,
        &query.login_challenge,
        FlowState::LoginRequested,
        "login",
    )
    .await?;
    if flow.login_skip
        && let Some(subject) = &flow.subject
        && subject != &body.subject
    {
        return Err(ApiError::BadRequest(
            "Field 'subject' does not match subject from previous authentication".into(),
        ));
    }

    // A session cookie of another user must not be reused for this subject.
    let session_id = match &flow.session_id {
        Some(sid) => match login_session::Entity::find_by_id(sid).one(state.db()).await? {
            Some(session) if session.subject != body.subject => uuid::Uuid::new_v4().to_string(),
            _ => sid.clone(),
        },
        None => uuid::Uuid::new_v4().to_string(),
    };

    let verifier = secrets::generate_token();
    let update = oauth2_flow::ActiveModel {
        state: Set(FlowState::LoginAccepted.as_str().to_string()),
        subject: Set(Some(body.subject.clone())),
        login_remember: Set(body.remember),
        login_remember_for: Set(body.remember_for),
        acr: Set(body.acr.clone()),
        login_context: Set(body.context.as_ref().map(Value::to_string)),
        session_id: Set(Some(session_id)),
        authenticated_at: Set(Some(OffsetDateTime::now_utc())),
        login_verifier: Set(Some(verifier.clone())),
        ..Default::default()
    };
    transition(&state, &flow.id, FlowState::LoginRequested, update, "login").await?;

    tracing::info!(flow = %flow.id, "Login request accepted");
    Ok(Json(auth_redirect(&state, "login_verifier", &verifier)))
}

#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    put,
    path = "/oauth2/auth/requests/login/reject",
    tag = FLOW_TAG,
    operation_id = "Reject Login Request",
    summary = "Reject a login request",
    description = "The error defaults to `access_denied`; it is returned to the client.",
    params(LoginChallengeQuery),
    request_body = RequestDeniedError,
    responses(
        (status = 200, description = "Login rejected", body = CompletedRequest),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn reject_login_request(
    State(state): State<AppState>,
    Query(query): Query<LoginChallengeQuery>,
    Json(body): Json<RequestDeniedError>,
) -> Result<Json<CompletedRequest>, ApiError> {
    let flow = pending_flow(
        &state,
        oauth2_flow::Column::Id,
        &query.login_challenge,
        FlowState::LoginRequested,
        "login",
    )
    .await?;

    let verifier = secrets::generate_token();
    let update = oauth2_flow::ActiveModel {
        state: Set(FlowState::LoginRejected.as_str().to_string()),
        error: Set(Some(rejection(&body)?)),
        login_verifier: Set(Some(verifier.clone())),
        ..Default::default()
    };
    transition(&state, &flow.id, FlowState::LoginRequested, update, "login").await?;

    tracing::info!(flow = %flow.id, "Login request rejected");
    Ok(Json(auth_redirect(&state, "login_verifier", &verifier)))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/oauth2/auth/requests/consent",
    tag = FLOW_TAG,
    operation_id = "Get Consent Request",
    summary = "Fetch a pending consent request",
    params(ConsentChallengeQuery),
    responses(
        (status = 200, description = "The consent request", body = ConsentRequest),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn get_consent_request(
    State(state): State<AppState>,
    Query(query): Query<ConsentChallengeQuery>,
) -> Result<Json<ConsentRequest>, ApiError> {
    let flow = pending_flow(
        &state,
        oauth2_flow::Column::ConsentChallenge,
        &query.consent_challenge,
        FlowState::ConsentRequested,
        "consent",
    )
    .await?;
    let request = parse_request(&flow)?;
    let client = find_client(&state, &flow.client_id).await?;

    Ok(Json(ConsentRequest {
        challenge: query.consent_challenge,
        client: ClientSummary::from(&client),
        requested_scope: flow.requested_scope_list(),
        requested_access_token_audience: flow.requested_audience_list(),
        skip: flow.consent_skip,
        subject: flow.subject.clone().unwrap_or_default(),
        request_url: request.request_url(&state.config.oauth2),
        login_challenge: flow.id.clone(),
        login_session_id: flow.session_id.clone(),
        acr: flow.acr.clone(),
        context: flow
            .login_context
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        oidc_context: OidcContext {
            login_hint: request.login_hint,
            acr_values: request.acr_values,
        },
    }))
}

#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    put,
    path = "/oauth2/auth/requests/consent/accept",
    tag = FLOW_TAG,
    operation_id = "Accept Consent Request",
    summary = "Accept a consent request",
    description = "Grants a subset of the requested scope and audience. With `remember` later \
                   requests of the same client for the same or a narrower scope skip the consent UI.",
    params(ConsentChallengeQuery),
    request_body = AcceptConsentRequest,
    responses(
        (status = 200, description = "Consent accepted", body = CompletedRequest),
        (status = 400, description = "Granted scope or audience was not requested"),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn accept_consent_request(
    State(state): State<AppState>,
    Query(query): Query<ConsentChallengeQuery>,
    Json(body): Json<AcceptConsentRequest>,
) -> Result<Json<CompletedRequest>, ApiError> {
    if body.remember_for < 0 {
        return Err(ApiError::BadRequest("Field 'remember_for' must not be negative".into()));
    }
    let flow = pending_flow(
        &state,
        oauth2_flow::Column::ConsentChallenge,
        &query.consent_challenge,
        FlowState::ConsentRequested,
        "consent",
    )
    .await?;

    let requested_scope = flow.requested_scope_list();
    if let Some(extra) = body
        .grant_scope
        .iter()
        .find(|s| !scope::contains(&requested_scope, s))
    {
        return Err(ApiError::BadRequest(format!(
            "Scope '{extra}' was granted but never requested"
        )));
    }
    let requested_audience = flow.requested_audience_list();
    if let Some(extra) = body
        .grant_access_token_audience
        .iter()
        .find(|a| !scope::contains(&requested_audience, a))
    {
        return Err(ApiError::BadRequest(format!(
            "Audience '{extra}' was granted but never requested"
        )));
    }

    let verifier = secrets::generate_token();
    let update = oauth2_flow::ActiveModel {
        state: Set(FlowState::ConsentAccepted.as_str().to_string()),
        granted_scope: Set(body.grant_scope.join(" ")),
        granted_audience: Set(body.grant_access_token_audience.join(" ")),
        consent_remember: Set(body.remember),
        consent_remember_for: Set(body.remember_for),
        access_token_claims: Set(Value::Object(body.session.access_token.clone()).to_string()),
        id_token_claims: Set(Value::Object(body.session.id_token.clone()).to_string()),
        consent_verifier: Set(Some(verifier.clone())),
        ..Default::default()
    };
    transition(&state, &flow.id, FlowState::ConsentRequested, update, "consent").await?;

    tracing::info!(flow = %flow.id, granted = %body.grant_scope.join(" "), "Consent request accepted");
    Ok(Json(auth_redirect(&state, "consent_verifier", &verifier)))
}

#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    put,
    path = "/oauth2/auth/requests/consent/reject",
    tag = FLOW_TAG,
    operation_id = "Reject Consent Request",
    summary = "Reject a consent request",
    params(ConsentChallengeQuery),
    request_body = RequestDeniedError,
    responses(
        (status = 200, description = "Consent rejected", body = CompletedRequest),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn reject_consent_request(
    State(state): State<AppState>,
    Query(query): Query<ConsentChallengeQuery>,
    Json(body): Json<RequestDeniedError>,
) -> Result<Json<CompletedRequest>, ApiError> {
    let flow = pending_flow(
        &state,
        oauth2_flow::Column::ConsentChallenge,
        &query.consent_challenge,
        FlowState::ConsentRequested,
        "consent",
    )
    .await?;

    let verifier = secrets::generate_token();
    let update = oauth2_flow::ActiveModel {
        state: Set(FlowState::ConsentRejected.as_str().to_string()),
        error: Set(Some(rejection(&body)?)),
        consent_verifier: Set(Some(verifier.clone())),
        ..Default::default()
    };
    transition(&state, &flow.id, FlowState::ConsentRequested, update, "consent").await?;

    tracing::info!(flow = %flow.id, "Consent request rejected");
    Ok(Json(auth_redirect(&state, "consent_verifier", &verifier)))
}

async fn pending_logout(
    state: &AppState,
    challenge: &str,
) -> Result<logout_request::Model, ApiError> {
    let request = logout_request::Entity::find_by_id(challenge)
        .one(state.db())
        .await?
        .ok_or_else(|| ApiError::NotFound("The logout request could not be found".into()))?;
    if request.is_expired() {
        return Err(ApiError::NotFound("The logout request has expired".into()));
    }
    if request.status != logout_request::STATUS_PENDING {
        return Err(ApiError::Conflict("The logout request was already handled".into()));
    }
    Ok(request)
}

async fn transition_logout(
    state: &AppState,
    challenge: &str,
    update: logout_request::ActiveModel,
) -> Result<(), ApiError> {
    let result = logout_request::Entity::update_many()
        .set(update)
        .filter(logout_request::Column::Challenge.eq(challenge))
        .filter(logout_request::Column::Status.eq(logout_request::STATUS_PENDING))
        .exec(state.db())
        .await?;
    if result.rows_affected != 1 {
        return Err(ApiError::Conflict("The logout request was already handled".into()));
    }
    Ok(())
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/oauth2/auth/requests/logout",
    tag = FLOW_TAG,
    operation_id = "Get Logout Request",
    summary = "Fetch a pending logout request",
    params(LogoutChallengeQuery),
    responses(
        (status = 200, description = "The logout request", body = LogoutRequest),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn get_logout_request(
    State(state): State<AppState>,
    Query(query): Query<LogoutChallengeQuery>,
) -> Result<Json<LogoutRequest>, ApiError> {
    let request = pending_logout(&state, &query.logout_challenge).await?;
    Ok(Json(LogoutRequest {
        request_url: with_query(
            &state.config.oauth2.public_url("/oauth2/sessions/logout"),
            &[("logout_challenge", &request.challenge)],
        ),
        challenge: request.challenge,
        subject: request.subject,
        sid: request.session_id,
        client_id: request.client_id,
        rp_initiated: request.rp_initiated,
    }))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    put,
    path = "/oauth2/auth/requests/logout/accept",
    tag = FLOW_TAG,
    operation_id = "Accept Logout Request",
    summary = "Accept a logout request",
    description = "The browser must be sent to `redirect_to`, which ends the login session and \
                   notifies relying parties over the front and back channel.",
    params(LogoutChallengeQuery),
    responses(
        (status = 200, description = "Logout accepted", body = CompletedRequest),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn accept_logout_request(
    State(state): State<AppState>,
    Query(query): Query<LogoutChallengeQuery>,
) -> Result<Json<CompletedRequest>, ApiError> {
    let request = pending_logout(&state, &query.logout_challenge).await?;
    let verifier = secrets::generate_token();
    let update = logout_request::ActiveModel {
        status: Set(logout_request::STATUS_ACCEPTED.to_string()),
        verifier: Set(Some(verifier.clone())),
        ..Default::default()
    };
    transition_logout(&state, &request.challenge, update).await?;

    tracing::info!(sid = %request.session_id, "Logout request accepted");
    Ok(Json(CompletedRequest {
        redirect_to: with_query(
            &state.config.oauth2.public_url("/oauth2/sessions/logout"),
            &[("logout_verifier", &verifier)],
        ),
    }))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    put,
    path = "/oauth2/auth/requests/logout/reject",
    tag = FLOW_TAG,
    operation_id = "Reject Logout Request",
    summary = "Reject a logout request",
    description = "The user stays logged in; the logout UI decides where to send the browser.",
    params(LogoutChallengeQuery),
    responses(
        (status = 204, description = "Logout rejected"),
        (status = 404, description = "Unknown or expired challenge"),
        (status = 409, description = "The request was already handled"),
    )
)]
pub async fn reject_logout_request(
    State(state): State<AppState>,
    Query(query): Query<LogoutChallengeQuery>,
) -> Result<StatusCode, ApiError> {
    let request = pending_logout(&state, &query.logout_challenge).await?;
    let update = logout_request::ActiveModel {
        status: Set(logout_request::STATUS_REJECTED.to_string()),
        ..Default::default()
    };
    transition_logout(&state, &request.challenge, update).await?;
    Ok(StatusCode::NO_CONTENT)
}
