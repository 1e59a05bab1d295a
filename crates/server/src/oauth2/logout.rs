//! RP-initiated logout with front- and back-channel notification.
//!
//! `GET /oauth2/sessions/logout` first hands the browser to the logout UI with
//! a challenge. Once the UI accepted the request the browser returns with a
//! `logout_verifier`; then the login session is removed, every relying party
//! that obtained consent in that session receives a back-channel logout token,
//! and a page embedding the front-channel logout URIs is rendered.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use futures::future::join_all;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};
use serde::Deserialize;
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use utoipa::IntoParams;

use crate::entity::{consent_session, login_session, logout_request, oauth2_client};
use crate::error::OAuth2Error;
use crate::oauth2::flow::{FlowError, FlowResult, clear_session_cookie, session_cookie, with_query};
use crate::oauth2::jwt::{self, BACKCHANNEL_LOGOUT_EVENT, IdTokenClaims, LogoutToken};
use crate::oauth2::keys::{self, KeySet};
use crate::oauth2::{OAUTH2_TAG, secrets};
use crate::pages::{self, FrontchannelLogoutPage};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct LogoutParams {
    /// A previously issued ID token identifying the relying party
    pub id_token_hint: Option<String>,
    /// Must be registered for the client of `id_token_hint`
    pub post_logout_redirect_uri: Option<String>,
    pub state: Option<String>,
    /// Set by the logout UI redirect
    pub logout_verifier: Option<String>,
}

/// Clients that obtained consent during login session `sid`.
async fn session_clients(
    state: &AppState,
    sid: &str,
) -> Result<Vec<oauth2_client::Model>, sea_orm::DbErr> {
    let client_ids: Vec<String> = consent_session::Entity::find()
        .filter(consent_session::Column::SessionId.eq(sid))
        .all(state.db())
        .await?
        .into_iter()
        .map(|session| session.client_id)
        .collect();
    if client_ids.is_empty() {
        return Ok(Vec::new());
    }
    oauth2_client::Entity::find()
        .filter(oauth2_client::Column::Id.is_in(client_ids))
        .all(state.db())
        .await
}

/// Sends a logout token to every back-channel logout URI of the clients of
/// session `sid`. Deliveries run concurrently; failures are only logged.
pub async fn notify_backchannel(state: &AppState, sid: &str) -> Result<usize, OAuth2Error> {
    let config = &state.config.oauth2;
    let timeout = std::time::Duration::from_secs(config.backchannel_logout_timeout);
    let clients = session_clients(state, sid).await?;

    let mut deliveries = Vec::new();
    for client in &clients {
        let Some(uri) = client.backchannel_logout_uri.clone().filter(|u| !u.is_empty()) else {
            continue;
        };
        let mut events = Map::new();
        events.insert(BACKCHANNEL_LOGOUT_EVENT.to_string(), Value::Object(Map::new()));
        let claims = LogoutToken {
            iss: config.issuer().to_string(),
            aud: vec![client.id.clone()],
            iat: OffsetDateTime::now_utc().unix_timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            sid: sid.to_string(),
            events,
            nonce: None,
        };
        let token = keys::sign(state.db(), KeySet::IdToken, &claims).await?;
        let http = state.http.clone();
        let client_id = client.id.clone();
        deliveries.push(async move {
            let result = http
                .post(&uri)
                .timeout(timeout)
                .form(&[("logout_token", token.as_str())])
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match result {
                Ok(_) => {
                    tracing::debug!(%client_id, %uri, "Delivered back-channel logout");
                    true
                }
                Err(e) => {
                    tracing::warn!(%client_id, %uri, error = %e, "Back-channel logout delivery failed");
                    false
                }
            }
        });
    }

    let delivered = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();
    tracing::info!(sid, delivered, "Back-channel logout finished");
    Ok(delivered)
}

/// Front-channel logout URIs of the clients of session `sid`.
async fn frontchannel_uris(state: &AppState, sid: &str) -> Result<Vec<String>, sea_orm::DbErr> {
    let issuer = state.config.oauth2.issuer();
    Ok(session_clients(state, sid)
        .await?
        .iter()
        .filter_map(|client| client.frontchannel_logout_uri.as_deref())
        .filter(|uri| !uri.is_empty())
        .map(|uri| with_query(uri, &[("iss", issuer), ("sid", sid)]))
        .collect())
}

/// Claims of an ID token we issued; expiry is not enforced for hints.
async fn decode_hint(state: &AppState, hint: &str) -> Result<IdTokenClaims, FlowError> {
    let config = &state.config.oauth2;
    let mut validation = keys::validation(config.issuer());
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    keys::verify::<_, IdTokenClaims>(state.db(), hint, &validation)
        .await
        .map_err(|e| {
            tracing::info!(error = %e, "Rejected id_token_hint");
            FlowError::page(
                config,
                OAuth2Error::invalid_request("The 'id_token_hint' is not a valid ID token."),
            )
        })
}

fn post_logout_target(config: &crate::config::OAuth2Config, uri: Option<&str>, state: Option<&str>) -> String {
    match uri {
        Some(uri) => match state {
            Some(state) => with_query(uri, &[("state", state)]),
            None => uri.to_string(),
        },
        None => config.post_logout_redirect_url(),
    }
}

#[tracing::instrument(skip(state, jar, params))]
#[utoipa::path(
    get,
    path = "/oauth2/sessions/logout",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Logout",
    summary = "End the login session",
    description = "RP-initiated logout. `post_logout_redirect_uri` requires `id_token_hint` and must be \
                   registered for the hint's client. Without a login session the browser is sent \
                   straight to the post-logout target; otherwise to the logout UI.\n\n\
                   The logout UI sends the browser back with `logout_verifier`, which ends the \
                   session and notifies relying parties.",
    params(LogoutParams),
    responses(
        (status = 200, description = "Front-channel logout page"),
        (status = 303, description = "Redirect to the logout UI, the post-logout target, or the error page"),
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<LogoutParams>,
) -> Response {
    let result = match params.logout_verifier.as_deref() {
        Some(verifier) => finish(&state, verifier).await,
        None => initiate(&state, &jar, &params).await,
    };
    result.into_response()
}

async fn initiate(state: &AppState, jar: &CookieJar, params: &LogoutParams) -> FlowResult {
    let config = &state.config.oauth2;
    let db = state.db();

    let hint = match params.id_token_hint.as_deref().filter(|h| !h.is_empty()) {
        Some(hint) => Some(decode_hint(state, hint).await?),
        None => None,
    };
    let client_id = hint.as_ref().and_then(|h| h.aud.first().cloned());

    let client = match &client_id {
        Some(id) => oauth2_client::Entity::find_by_id(id).one(db).await?,
        None => None,
    };

    let redirect_uri = params
        .post_logout_redirect_uri
        .as_deref()
        .filter(|u| !u.is_empty());
    if let Some(uri) = redirect_uri {
        if hint.is_none() {
            return Err(FlowError::page(
                config,
                OAuth2Error::invalid_request(
                    "Logout failed because query parameter 'post_logout_redirect_uri' is set but 'id_token_hint' is missing.",
                ),
            ));
        }
        let registered = client
            .as_ref()
            .is_some_and(|client| client.post_logout_redirect_uris_list().iter().any(|u| u == uri));
        if !registered {
            return Err(FlowError::page(
                config,
                OAuth2Error::invalid_request(
                    "Logout failed because query parameter 'post_logout_redirect_uri' is not whitelisted for the OAuth 2.0 Client.",
                ),
            ));
        }
    }

    let session = match session_cookie(jar) {
        Some(sid) => login_session::Entity::find_by_id(sid).one(db).await?,
        None => None,
    };
    let Some(session) = session else {
        tracing::debug!("Logout without a login session");
        let target = post_logout_target(config, redirect_uri, params.state.as_deref());
        return Ok(Redirect::to(&target).into_response());
    };

    if let (Some(hint), Some(client)) = (&hint, &client) {
        let expected = jwt::subject_identifier(client, &session.subject, &config.subject_identifier_salt);
        if hint.sub != expected {
            return Err(FlowError::page(
                config,
                OAuth2Error::invalid_request(
                    "Logout failed because the subject of the 'id_token_hint' does not match the authenticated end-user.",
                ),
            ));
        }
    }

    let now = OffsetDateTime::now_utc();
    let challenge = secrets::generate_token();
    logout_request::ActiveModel {
        challenge: Set(challenge.clone()),
        verifier: Set(None),
        subject: Set(session.subject.clone()),
        session_id: Set(session.id.clone()),
        client_id: Set(client_id),
        post_logout_redirect_uri: Set(redirect_uri.map(str::to_string)),
        state: Set(params.state.clone()),
        rp_initiated: Set(hint.is_some()),
        status: Set(logout_request::STATUS_PENDING.to_string()),
        created_at: Set(now),
        expires_at: Set(now + Duration::seconds(config.ttl.login_consent_request)),
    }
    .insert(db)
    .await?;

    tracing::info!(sid = %session.id, "Redirecting to logout UI");
    Ok(Redirect::to(&with_query(&config.logout_url(), &[("logout_challenge", &challenge)])).into_response())
}

async fn finish(state: &AppState, verifier: &str) -> FlowResult {
    let config = &state.config.oauth2;
    let db = state.db();
    let invalid = || {
        FlowError::page(
            config,
            OAuth2Error::invalid_request(
                "The logout verifier has already been used, has not been granted, or is invalid.",
            ),
        )
    };

    let request = logout_request::Entity::find()
        .filter(logout_request::Column::Verifier.eq(verifier))
        .one(db)
        .await?
        .filter(|r| r.status == logout_request::STATUS_ACCEPTED && !r.is_expired())
        .ok_or_else(invalid)?;

    let used = logout_request::Entity::update_many()
        .col_expr(logout_request::Column::Status, Expr::value(logout_request::STATUS_USED))
        .filter(logout_request::Column::Challenge.eq(&request.challenge))
        .filter(logout_request::Column::Status.eq(logout_request::STATUS_ACCEPTED))
        .exec(db)
        .await?;
    if used.rows_affected != 1 {
        return Err(invalid());
    }

    login_session::Entity::delete_by_id(&request.session_id)
        .exec(db)
        .await?;
    tracing::info!(sid = %request.session_id, subject = %request.subject, "Login session ended");

    if let Err(e) = notify_backchannel(state, &request.session_id).await {
        tracing::error!(sid = %request.session_id, error = %e, "Back-channel logout failed");
    }
    let iframes = frontchannel_uris(state, &request.session_id).await?;
    let redirect_to = post_logout_target(
        config,
        request.post_logout_redirect_uri.as_deref(),
        request.state.as_deref(),
    );

    let response = if iframes.is_empty() {
        Redirect::to(&redirect_to).into_response()
    } else {
        pages::render(StatusCode::OK, &FrontchannelLogoutPage { iframes, redirect_to })
    };
    Ok(clear_session_cookie(response, config))
}
