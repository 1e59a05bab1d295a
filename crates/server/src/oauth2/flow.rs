//! Authorization flow state machine.
//!
//! A flow is created by `GET /oauth2/auth` and walks
//! `login_requested → login_accepted|login_rejected → login_used →
//! consent_requested → consent_accepted|consent_rejected → consent_used`.
//! The login and consent UIs drive the transitions through the admin API and
//! hand the browser back with a one-time verifier, which is consumed with a
//! conditional update so a verifier can be redeemed at most once.

use axum::{
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use cookie::CookieBuilder;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use url::Url;
use utoipa::ToSchema;

use crate::config::OAuth2Config;
use crate::entity::{
    consent_session, login_session, oauth2_authorization_code, oauth2_client,
    oauth2_device_request, oauth2_flow,
};
use crate::error::{ErrorKind, OAuth2Error};
use crate::oauth2::{scope, secrets};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "keyward_authentication_session";

pub const PROMPT_NONE: &str = "none";
pub const PROMPT_LOGIN: &str = "login";
pub const PROMPT_CONSENT: &str = "consent";
pub const PROMPT_SELECT_ACCOUNT: &str = "select_account";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowState {
    LoginRequested,
    LoginAccepted,
    LoginRejected,
    LoginUsed,
    ConsentRequested,
    ConsentAccepted,
    ConsentRejected,
    ConsentUsed,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::LoginRequested => "login_requested",
            FlowState::LoginAccepted => "login_accepted",
            FlowState::LoginRejected => "login_rejected",
            FlowState::LoginUsed => "login_used",
            FlowState::ConsentRequested => "consent_requested",
            FlowState::ConsentAccepted => "consent_accepted",
            FlowState::ConsentRejected => "consent_rejected",
            FlowState::ConsentUsed => "consent_used",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "login_requested" => FlowState::LoginRequested,
            "login_accepted" => FlowState::LoginAccepted,
            "login_rejected" => FlowState::LoginRejected,
            "login_used" => FlowState::LoginUsed,
            "consent_requested" => FlowState::ConsentRequested,
            "consent_accepted" => FlowState::ConsentAccepted,
            "consent_rejected" => FlowState::ConsentRejected,
            "consent_used" => FlowState::ConsentUsed,
            _ => return None,
        })
    }
}

/// Validated authorization request, persisted with the flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub response_type: String,
    pub client_id: String,
    /// Resolved redirect URI, empty for device flows
    pub redirect_uri: String,
    /// `redirect_uri` was part of the request rather than the single registered one
    #[serde(default)]
    pub redirect_uri_explicit: bool,
    pub scope: Vec<String>,
    pub audience: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub prompt: Vec<String>,
    pub max_age: Option<i64>,
    pub login_hint: Option<String>,
    pub acr_values: Option<String>,
}

impl AuthorizationRequest {
    pub fn has_prompt(&self, prompt: &str) -> bool {
        self.prompt.iter().any(|p| p == prompt)
    }

    /// The authorization URL this request was started with.
    pub fn request_url(&self, config: &OAuth2Config) -> String {
        let mut pairs: Vec<(&str, String)> = vec![
            ("response_type", self.response_type.clone()),
            ("client_id", self.client_id.clone()),
        ];
        if !self.redirect_uri.is_empty() {
            pairs.push(("redirect_uri", self.redirect_uri.clone()));
        }
        if !self.scope.is_empty() {
            pairs.push(("scope", scope::join(&self.scope)));
        }
        if !self.audience.is_empty() {
            pairs.push(("audience", scope::join(&self.audience)));
        }
        if !self.prompt.is_empty() {
            pairs.push(("prompt", self.prompt.join(" ")));
        }
        for (key, value) in [
            ("state", &self.state),
            ("nonce", &self.nonce),
            ("code_challenge", &self.code_challenge),
            ("code_challenge_method", &self.code_challenge_method),
            ("login_hint", &self.login_hint),
            ("acr_values", &self.acr_values),
        ] {
            if let Some(value) = value {
                pairs.push((key, value.clone()));
            }
        }
        let pairs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        with_query(&config.public_url("/oauth2/auth"), &pairs)
    }
}

/// Error set by the login or consent UI when rejecting a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RequestDeniedError {
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_hint: Option<String>,
    pub status_code: Option<u16>,
}

impl RequestDeniedError {
    pub fn to_oauth2_error(&self) -> OAuth2Error {
        let kind = self
            .error
            .as_deref()
            .and_then(ErrorKind::from_code)
            .unwrap_or(ErrorKind::AccessDenied);
        let mut error = OAuth2Error::new(kind);
        if let Some(description) = self.error_description.as_deref().filter(|d| !d.is_empty()) {
            error = error.with_description(description);
        }
        if let Some(hint) = self.error_hint.as_deref().filter(|h| !h.is_empty()) {
            error = error.with_hint(hint);
        }
        error
    }
}

/// An authorization flow error and where the browser should be sent with it.
#[derive(Debug)]
pub struct FlowError {
    pub error: OAuth2Error,
    /// `(redirect base, state)`; `None` renders the error as JSON
    pub target: Option<(String, Option<String>)>,
}

impl FlowError {
    /// Structural errors shown on the server error page.
    pub fn page(config: &OAuth2Config, error: OAuth2Error) -> Self {
        Self {
            error,
            target: Some((config.error_url(), None)),
        }
    }

    /// Client-correctable errors sent to the client.
    pub fn client(redirect_uri: &str, state: Option<&str>, error: OAuth2Error) -> Self {
        Self {
            error,
            target: Some((redirect_uri.to_string(), state.map(str::to_string))),
        }
    }
}

impl From<OAuth2Error> for FlowError {
    fn from(error: OAuth2Error) -> Self {
        Self {
            error,
            target: None,
        }
    }
}

impl From<DbErr> for FlowError {
    fn from(err: DbErr) -> Self {
        OAuth2Error::from(err).into()
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        tracing::info!(error = %self.error, "Authorization flow failed");
        match self.target {
            Some((base, state)) => self.error.redirect_to(&base, state.as_deref()),
            None => self.error.into_response(),
        }
    }
}

pub type FlowResult = Result<Response, FlowError>;

/// Appends query parameters to `base`, which may be absolute or relative.
pub fn with_query(base: &str, pairs: &[(&str, &str)]) -> String {
    if let Ok(mut url) = Url::parse(base) {
        url.query_pairs_mut().extend_pairs(pairs);
        return url.to_string();
    }
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}

/// Login session id carried by the browser.
pub fn session_cookie(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

fn login_cookie(config: &OAuth2Config, sid: String) -> CookieBuilder<'static> {
    Cookie::build((SESSION_COOKIE, sid))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.issuer().starts_with("https://"))
}

/// Session cookie, kept for `max_age` seconds or for the browser session.
pub fn set_session_cookie(
    response: Response,
    config: &OAuth2Config,
    sid: &str,
    max_age: Option<i64>,
) -> Response {
    let mut cookie = login_cookie(config, sid.to_string());
    if let Some(max_age) = max_age {
        cookie = cookie.max_age(Duration::seconds(max_age));
    }
    (CookieJar::new().add(cookie), response).into_response()
}

pub fn clear_session_cookie(response: Response, config: &OAuth2Config) -> Response {
    let cookie = login_cookie(config, String::new()).max_age(Duration::ZERO);
    (CookieJar::new().add(cookie), response).into_response()
}

/// Where correctable errors of `flow` go: the client, or the device page.
fn client_target(config: &OAuth2Config, request: &AuthorizationRequest, is_device: bool) -> (String, Option<String>) {
    if is_device {
        (config.device_done_url(), None)
    } else {
        (request.redirect_uri.clone(), request.state.clone())
    }
}

fn client_error(
    config: &OAuth2Config,
    request: &AuthorizationRequest,
    is_device: bool,
    error: OAuth2Error,
) -> FlowError {
    let (base, state) = client_target(config, request, is_device);
    FlowError::client(&base, state.as_deref(), error)
}

fn invalid_verifier(config: &OAuth2Config, kind: &str) -> FlowError {
    FlowError::page(
        config,
        OAuth2Error::invalid_request(format!(
            "The {kind} verifier has already been used, has not been granted, or is invalid."
        )),
    )
}

fn parse_request(flow: &oauth2_flow::Model) -> Result<AuthorizationRequest, OAuth2Error> {
    serde_json::from_str(&flow.request).map_err(|e| {
        tracing::error!(flow = %flow.id, error = %e, "Stored authorization request is unreadable");
        OAuth2Error::server_error("The authorization request could not be restored")
    })
}

/// Starts a flow for a validated request. A remembered login session skips the
/// login UI unless `prompt=login` was requested.
pub async fn begin(
    state: &AppState,
    headers: &HeaderMap,
    client: &oauth2_client::Model,
    request: AuthorizationRequest,
    device_request_id: Option<String>,
) -> FlowResult {
    let config = &state.config.oauth2;
    let db = state.db();
    let now = OffsetDateTime::now_utc();
    let is_device = device_request_id.is_some();

    let session = match session_cookie(&CookieJar::from_headers(headers)) {
        Some(sid) => login_session::Entity::find_by_id(sid).one(db).await?,
        None => None,
    };
    let within_max_age = |session: &login_session::Model| match request.max_age {
        Some(max_age) => session.authenticated_at + Duration::seconds(max_age) >= now,
        None => true,
    };
    let skip_session = session
        .as_ref()
        .filter(|s| s.can_skip_login() && within_max_age(s) && !request.has_prompt(PROMPT_LOGIN));

    if skip_session.is_none() && request.has_prompt(PROMPT_NONE) {
        return Err(client_error(
            config,
            &request,
            is_device,
            OAuth2Error::new(ErrorKind::LoginRequired).with_hint(
                "Prompt 'none' was requested, but no existing login session was found.",
            ),
        ));
    }

    let request_json = serde_json::to_string(&request)
        .map_err(|e| OAuth2Error::server_error(format!("Unable to store the request: {e}")))?;
    let flow = oauth2_flow::ActiveModel {
        id: Set(secrets::generate_token()),
        client_id: Set(client.id.clone()),
        request: Set(request_json),
        requested_scope: Set(scope::join(&request.scope)),
        requested_audience: Set(scope::join(&request.audience)),
        state: Set(match skip_session {
            Some(_) => FlowState::LoginUsed.as_str().to_string(),
            None => FlowState::LoginRequested.as_str().to_string(),
        }),
        login_skip: Set(skip_session.is_some()),
        subject: Set(skip_session.map(|s| s.subject.clone())),
        login_remember: Set(skip_session.is_some_and(|s| s.remember)),
        login_remember_for: Set(skip_session.map_or(0, |s| s.remember_for)),
        acr: Set(None),
        login_context: Set(None),
        session_id: Set(session.as_ref().map(|s| s.id.clone())),
        authenticated_at: Set(skip_session.map(|s| s.authenticated_at)),
        login_verifier: Set(None),
        consent_challenge: Set(None),
        consent_skip: Set(false),
        consent_verifier: Set(None),
        granted_scope: Set(String::new()),
        granted_audience: Set(String::new()),
        consent_remember: Set(false),
        consent_remember_for: Set(0),
        access_token_claims: Set("{}".to_string()),
        id_token_claims: Set("{}".to_string()),
        error: Set(None),
        device_request_id: Set(device_request_id),
        created_at: Set(now),
        expires_at: Set(now + Duration::seconds(config.ttl.login_consent_request)),
    }
    .insert(db)
    .await?;

    if skip_session.is_some() {
        tracing::debug!(flow = %flow.id, client_id = %client.id, "Skipping login with remembered session");
        return proceed_to_consent(state, flow, client, &request).await;
    }

    tracing::debug!(flow = %flow.id, client_id = %client.id, "Redirecting to login UI");
    Ok(Redirect::to(&with_query(&config.login_url(), &[("login_challenge", &flow.id)])).into_response())
}

/// Returns from the login UI with a `login_verifier`.
pub async fn resume_login(state: &AppState, verifier: &str) -> FlowResult {
    let config = &state.config.oauth2;
    let db = state.db();

    let flow = oauth2_flow::Entity::find()
        .filter(oauth2_flow::Column::LoginVerifier.eq(verifier))
        .one(db)
        .await?
        .ok_or_else(|| invalid_verifier(config, "login"))?;
    let current = FlowState::parse(&flow.state);
    if !matches!(current, Some(FlowState::LoginAccepted | FlowState::LoginRejected)) {
        return Err(invalid_verifier(config, "login"));
    }
    if !consume(db, &flow.id, flow.state.as_str(), FlowState::LoginUsed).await? {
        tracing::warn!(flow = %flow.id, "Login verifier redeemed concurrently");
        return Err(invalid_verifier(config, "login"));
    }

    let request = parse_request(&flow)?;
    let is_device = flow.device_request_id.is_some();
    if flow.is_expired() {
        return Err(client_error(
            config,
            &request,
            is_device,
            OAuth2Error::invalid_request("The login request has expired. Please try again."),
        ));
    }
    if current == Some(FlowState::LoginRejected) {
        return Err(reject(state, &flow, &request).await?);
    }

    let client = oauth2_client::Entity::find_by_id(&flow.client_id)
        .one(db)
        .await?
        .ok_or_else(|| {
            FlowError::page(
                config,
                OAuth2Error::invalid_client("The requested OAuth 2.0 Client does not exist."),
            )
        })?;

    let (Some(subject), Some(sid)) = (flow.subject.clone(), flow.session_id.clone()) else {
        return Err(OAuth2Error::server_error("Accepted login is missing its subject").into());
    };
    let authenticated_at = flow.authenticated_at.unwrap_or_else(OffsetDateTime::now_utc);
    match login_session::Entity::find_by_id(&sid).one(db).await? {
        Some(existing) => {
            let mut active: login_session::ActiveModel = existing.into();
            active.subject = Set(subject.clone());
            active.remember = Set(flow.login_remember);
            active.remember_for = Set(flow.login_remember_for);
            active.authenticated_at = Set(authenticated_at);
            active.update(db).await?;
        }
        None => {
            login_session::ActiveModel {
                id: Set(sid.clone()),
                subject: Set(subject.clone()),
                remember: Set(flow.login_remember),
                remember_for: Set(flow.login_remember_for),
                authenticated_at: Set(authenticated_at),
            }
            .insert(db)
            .await?;
        }
    }
    tracing::info!(flow = %flow.id, %subject, sid = %sid, "Login accepted");

    let remember = flow.login_remember;
    let remember_for = flow.login_remember_for;
    let response = proceed_to_consent(state, flow, &client, &request).await?;
    if !remember {
        return Ok(response);
    }
    let max_age = (remember_for > 0).then_some(remember_for);
    Ok(set_session_cookie(response, config, &sid, max_age))
}

/// Returns from the consent UI with a `consent_verifier`.
pub async fn resume_consent(state: &AppState, verifier: &str) -> FlowResult {
    let config = &state.config.oauth2;
    let db = state.db();

    let flow = oauth2_flow::Entity::find()
        .filter(oauth2_flow::Column::ConsentVerifier.eq(verifier))
        .one(db)
        .await?
        .ok_or_else(|| invalid_verifier(config, "consent"))?;
    let current = FlowState::parse(&flow.state);
    if !matches!(current, Some(FlowState::ConsentAccepted | FlowState::ConsentRejected)) {
        return Err(invalid_verifier(config, "consent"));
    }
    if !consume(db, &flow.id, flow.state.as_str(), FlowState::ConsentUsed).await? {
        tracing::warn!(flow = %flow.id, "Consent verifier redeemed concurrently");
        return Err(invalid_verifier(config, "consent"));
    }

    let request = parse_request(&flow)?;
    if flow.is_expired() {
        return Err(client_error(
            config,
            &request,
            flow.device_request_id.is_some(),
            OAuth2Error::invalid_request("The consent request has expired. Please try again."),
        ));
    }
    if current == Some(FlowState::ConsentRejected) {
        return Err(reject(state, &flow, &request).await?);
    }

    let client = oauth2_client::Entity::find_by_id(&flow.client_id)
        .one(db)
        .await?
        .ok_or_else(|| {
            FlowError::page(
                config,
                OAuth2Error::invalid_client("The requested OAuth 2.0 Client does not exist."),
            )
        })?;
    finish(state, flow, &client, &request, true).await
}

/// Moves the flow from `from` to `to`; false when another request won the race.
async fn consume<C: ConnectionTrait>(
    conn: &C,
    flow_id: &str,
    from: &str,
    to: FlowState,
) -> Result<bool, DbErr> {
    let result = oauth2_flow::Entity::update_many()
        .col_expr(oauth2_flow::Column::State, Expr::value(to.as_str()))
        .filter(oauth2_flow::Column::Id.eq(flow_id))
        .filter(oauth2_flow::Column::State.eq(from))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Error of a rejected login or consent, sent to the client.
async fn reject(
    state: &AppState,
    flow: &oauth2_flow::Model,
    request: &AuthorizationRequest,
) -> Result<FlowError, DbErr> {
    let denied: RequestDeniedError = flow
        .error
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    if let Some(device_id) = &flow.device_request_id {
        set_device_status(state.db(), device_id, oauth2_device_request::STATUS_DENIED).await?;
    }
    tracing::info!(flow = %flow.id, client_id = %flow.client_id, "Authorization request rejected");
    Ok(client_error(
        &state.config.oauth2,
        request,
        flow.device_request_id.is_some(),
        denied.to_oauth2_error(),
    ))
}

async fn set_device_status<C: ConnectionTrait>(
    conn: &C,
    device_id: &str,
    status: &str,
) -> Result<bool, DbErr> {
    let result = oauth2_device_request::Entity::update_many()
        .col_expr(oauth2_device_request::Column::Status, Expr::value(status))
        .filter(oauth2_device_request::Column::Id.eq(device_id))
        .filter(oauth2_device_request::Column::Status.eq(oauth2_device_request::STATUS_PENDING))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// After login: skip consent when allowed, otherwise hand over to the consent UI.
async fn proceed_to_consent(
    state: &AppState,
    flow: oauth2_flow::Model,
    client: &oauth2_client::Model,
    request: &AuthorizationRequest,
) -> FlowResult {
    let config = &state.config.oauth2;
    let db = state.db();
    let subject = flow.subject.clone().unwrap_or_default();
    let force_consent = request.has_prompt(PROMPT_CONSENT);

    let remembered = if force_consent {
        None
    } else {
        consent_session::Entity::find()
            .filter(consent_session::Column::ClientId.eq(&client.id))
            .filter(consent_session::Column::Subject.eq(&subject))
            .one(db)
            .await?
            .filter(|session| {
                session.is_reusable()
                    && scope::is_subset(&request.scope, &session.granted_scope_list())
                    && scope::is_subset(&request.audience, &session.granted_audience_list())
            })
    };

    if remembered.is_some() || (client.skip_consent && !force_consent) {
        let mut active: oauth2_flow::ActiveModel = flow.into();
        active.state = Set(FlowState::ConsentUsed.as_str().to_string());
        active.consent_skip = Set(true);
        active.granted_scope = Set(scope::join(&request.scope));
        active.granted_audience = Set(scope::join(&request.audience));
        if let Some(session) = &remembered {
            active.consent_remember = Set(session.remember);
            active.consent_remember_for = Set(session.remember_for);
            active.access_token_claims = Set(session.access_token_claims.clone());
            active.id_token_claims = Set(session.id_token_claims.clone());
        }
        let flow = active.update(db).await?;

        if let Some(session) = remembered {
            // Back-channel logout finds clients through the session id.
            let mut active: consent_session::ActiveModel = session.into();
            active.session_id = Set(flow.session_id.clone());
            active.update(db).await?;
            tracing::debug!(flow = %flow.id, "Skipping consent with remembered consent session");
            return finish(state, flow, client, request, false).await;
        }
        tracing::debug!(flow = %flow.id, "Skipping consent for first-party client");
        return finish(state, flow, client, request, true).await;
    }

    if request.has_prompt(PROMPT_NONE) {
        return Err(client_error(
            config,
            request,
            flow.device_request_id.is_some(),
            OAuth2Error::new(ErrorKind::ConsentRequired).with_hint(
                "Prompt 'none' was requested, but no previous consent was found.",
            ),
        ));
    }

    let challenge = secrets::generate_token();
    let mut active: oauth2_flow::ActiveModel = flow.into();
    active.state = Set(FlowState::ConsentRequested.as_str().to_string());
    active.consent_challenge = Set(Some(challenge.clone()));
    let flow = active.update(db).await?;

    tracing::debug!(flow = %flow.id, "Redirecting to consent UI");
    Ok(Redirect::to(&with_query(
        &config.consent_url(),
        &[("consent_challenge", &challenge)],
    ))
    .into_response())
}

/// Replaces the consent session of `(client, subject)` with the flow's grant.
async fn store_consent_session<C: ConnectionTrait>(
    conn: &C,
    flow: &oauth2_flow::Model,
) -> Result<(), DbErr> {
    let subject = flow.subject.clone().unwrap_or_default();
    consent_session::Entity::delete_many()
        .filter(consent_session::Column::ClientId.eq(&flow.client_id))
        .filter(consent_session::Column::Subject.eq(&subject))
        .exec(conn)
        .await?;
    consent_session::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        client_id: Set(flow.client_id.clone()),
        subject: Set(subject),
        granted_scope: Set(flow.granted_scope.clone()),
        granted_audience: Set(flow.granted_audience.clone()),
        remember: Set(flow.consent_remember),
        remember_for: Set(flow.consent_remember_for),
        session_id: Set(flow.session_id.clone()),
        access_token_claims: Set(flow.access_token_claims.clone()),
        id_token_claims: Set(flow.id_token_claims.clone()),
        handled_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

/// Issues the authorization code, or approves the bound device request.
async fn finish(
    state: &AppState,
    flow: oauth2_flow::Model,
    client: &oauth2_client::Model,
    request: &AuthorizationRequest,
    store_consent: bool,
) -> FlowResult {
    let config = &state.config.oauth2;
    let db = state.db();
    let now = OffsetDateTime::now_utc();

    if store_consent {
        store_consent_session(db, &flow).await?;
    }

    if let Some(device_id) = &flow.device_request_id {
        let device = oauth2_device_request::ActiveModel {
            status: Set(oauth2_device_request::STATUS_APPROVED.to_string()),
            subject: Set(flow.subject.clone()),
            granted_scope: Set(flow.granted_scope.clone()),
            granted_audience: Set(flow.granted_audience.clone()),
            session_id: Set(flow.session_id.clone()),
            auth_time: Set(flow.authenticated_at),
            acr: Set(flow.acr.clone()),
            access_token_claims: Set(flow.access_token_claims.clone()),
            id_token_claims: Set(flow.id_token_claims.clone()),
            ..Default::default()
        };
        let result = oauth2_device_request::Entity::update_many()
            .set(device)
            .filter(oauth2_device_request::Column::Id.eq(device_id))
            .filter(oauth2_device_request::Column::Status.eq(oauth2_device_request::STATUS_PENDING))
            .exec(db)
            .await?;
        if result.rows_affected != 1 {
            return Err(client_error(
                config,
                request,
                true,
                OAuth2Error::invalid_request("The device request is no longer pending."),
            ));
        }
        tracing::info!(device_request = %device_id, client_id = %client.id, "Device request approved");
        return Ok(Redirect::to(&config.device_done_url()).into_response());
    }

    let code = secrets::generate_token();
    oauth2_authorization_code::ActiveModel {
        signature: Set(secrets::signature(&code)),
        request_id: Set(flow.id.clone()),
        client_id: Set(client.id.clone()),
        subject: Set(flow.subject.clone().unwrap_or_default()),
        redirect_uri: Set(request.redirect_uri.clone()),
        redirect_uri_explicit: Set(request.redirect_uri_explicit),
        scope: Set(flow.granted_scope.clone()),
        audience: Set(flow.granted_audience.clone()),
        nonce: Set(request.nonce.clone()),
        code_challenge: Set(request.code_challenge.clone()),
        code_challenge_method: Set(request.code_challenge_method.clone()),
        session_id: Set(flow.session_id.clone()),
        auth_time: Set(flow.authenticated_at.unwrap_or(now)),
        acr: Set(flow.acr.clone()),
        access_token_claims: Set(flow.access_token_claims.clone()),
        id_token_claims: Set(flow.id_token_claims.clone()),
        active: Set(true),
        expires_at: Set(now + Duration::seconds(config.ttl.authorization_code)),
        created_at: Set(now),
    }
    .insert(db)
    .await?;

    tracing::info!(flow = %flow.id, client_id = %client.id, "Issued authorization code");
    let mut pairs = vec![("code", code.as_str()), ("scope", flow.granted_scope.as_str())];
    if let Some(state) = request.state.as_deref() {
        pairs.push(("state", state));
    }
    Ok(Redirect::to(&with_query(&request.redirect_uri, &pairs)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_state_names_round_trip() {
        for state in [
            FlowState::LoginRequested,
            FlowState::LoginAccepted,
            FlowState::LoginRejected,
            FlowState::LoginUsed,
            FlowState::ConsentRequested,
            FlowState::ConsentAccepted,
            FlowState::ConsentRejected,
            FlowState::ConsentUsed,
        ] {
            assert_eq!(FlowState::parse(state.as_str()), Some(state));
        }
    }

    fn config(issuer_url: &str) -> OAuth2Config {
        serde_json::from_value(serde_json::json!({ "issuer_url": issuer_url })).unwrap()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(axum::http::header::SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            "theme=dark; keyward_authentication_session=abc123; x=y".parse().unwrap(),
        );
        assert_eq!(session_cookie(&CookieJar::from_headers(&headers)).as_deref(), Some("abc123"));

        let mut empty = HeaderMap::new();
        empty.insert(
            axum::http::header::COOKIE,
            "keyward_authentication_session=".parse().unwrap(),
        );
        assert_eq!(session_cookie(&CookieJar::from_headers(&empty)), None);
    }

    #[test]
    fn session_cookie_attributes_follow_issuer_scheme() {
        let response = set_session_cookie(
            Redirect::to("/").into_response(),
            &config("https://auth.example.com"),
            "abc123",
            Some(3600),
        );
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 1);
        let cookie = Cookie::parse(cookies[0].as_str()).unwrap();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(3600)));

        let response = set_session_cookie(
            Redirect::to("/").into_response(),
            &config("http://localhost:4444"),
            "abc123",
            None,
        );
        let cookie = Cookie::parse(set_cookies(&response)[0].clone()).unwrap();
        assert_eq!(cookie.secure(), None);
        assert_eq!(cookie.max_age(), None);
    }

    #[test]
    fn cleared_session_cookie_expires_immediately() {
        let response = clear_session_cookie(
            Redirect::to("/").into_response(),
            &config("https://auth.example.com"),
        );
        let cookie = Cookie::parse(set_cookies(&response)[0].clone()).unwrap();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }

    #[test]
    fn query_is_appended_to_absolute_and_relative_urls() {
        assert_eq!(
            with_query("https://app.example.com/cb?x=1", &[("code", "a b")]),
            "https://app.example.com/cb?x=1&code=a+b"
        );
        assert_eq!(with_query("/login", &[("login_challenge", "c")]), "/login?login_challenge=c");
    }

    #[test]
    fn rejection_defaults_to_access_denied() {
        let error = RequestDeniedError::default().to_oauth2_error();
        assert_eq!(error.kind, ErrorKind::AccessDenied);
        assert_eq!(error.description(), "The resource owner denied the request");

        let custom = RequestDeniedError {
            error: Some("login_required".into()),
            error_description: Some("Please sign in".into()),
            error_hint: Some("hint".into()),
            status_code: None,
        }
        .to_oauth2_error();
        assert_eq!(custom.kind, ErrorKind::LoginRequired);
        assert_eq!(custom.description(), "Please sign in");
        assert_eq!(custom.hint.as_deref(), Some("hint"));
    }
}
