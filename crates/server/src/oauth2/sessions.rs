//! Consent and login session administration, plus the public session check.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::entity::{consent_session, login_session, oauth2_client, oauth2_flow};
use crate::error::ApiError;
use crate::oauth2::flow::session_cookie;
use crate::oauth2::flow_admin::ClientSummary;
use crate::oauth2::{FLOW_TAG, OAUTH2_TAG, issuer, logout};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsentSessionView {
    pub id: String,
    pub subject: String,
    /// `None` when the client has since been deleted
    pub client: Option<ClientSummary>,
    pub grant_scope: Vec<String>,
    pub grant_access_token_audience: Vec<String>,
    pub remember: bool,
    pub remember_for: i64,
    pub session_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub handled_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SubjectQuery {
    pub subject: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RevokeConsentQuery {
    pub subject: String,
    /// Revoke only the consent given to this client
    pub client: Option<String>,
    /// Revoke every consent of the subject
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct SessionCheck {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/oauth2/auth/sessions/consent",
    tag = FLOW_TAG,
    operation_id = "List Consent Sessions",
    summary = "Consent sessions of a subject",
    params(SubjectQuery),
    responses(
        (status = 200, description = "Consent sessions, newest first", body = [ConsentSessionView]),
    )
)]
pub async fn list_consent_sessions(
    State(state): State<AppState>,
    Query(query): Query<SubjectQuery>,
) -> Result<Json<Vec<ConsentSessionView>>, ApiError> {
    let sessions = consent_session::Entity::find()
        .filter(consent_session::Column::Subject.eq(&query.subject))
        .order_by_desc(consent_session::Column::HandledAt)
        .all(state.db())
        .await?;

    let client_ids: Vec<&str> = sessions.iter().map(|s| s.client_id.as_str()).collect();
    let clients: HashMap<String, oauth2_client::Model> = oauth2_client::Entity::find()
        .filter(oauth2_client::Column::Id.is_in(client_ids))
        .all(state.db())
        .await?
        .into_iter()
        .map(|client| (client.id.clone(), client))
        .collect();

    Ok(Json(
        sessions
            .into_iter()
            .map(|session| ConsentSessionView {
                client: clients.get(&session.client_id).map(ClientSummary::from),
                grant_scope: session.granted_scope_list(),
                grant_access_token_audience: session.granted_audience_list(),
                id: session.id,
                subject: session.subject,
                remember: session.remember,
                remember_for: session.remember_for,
                session_id: session.session_id,
                handled_at: session.handled_at,
            })
            .collect(),
    ))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/oauth2/auth/sessions/consent",
    tag = FLOW_TAG,
    operation_id = "Revoke Consent Sessions",
    summary = "Revoke consent of a subject",
    description = "Revokes the consent given to `client`, or every consent of the subject with \
                   `all=true`. Access and refresh tokens issued under the revoked consent are \
                   deactivated as well.",
    params(RevokeConsentQuery),
    responses(
        (status = 204, description = "Consent revoked"),
        (status = 400, description = "Neither `client` nor `all=true` given"),
    )
)]
pub async fn revoke_consent_sessions(
    State(state): State<AppState>,
    Query(query): Query<RevokeConsentQuery>,
) -> Result<StatusCode, ApiError> {
    let client = query.client.as_deref().filter(|c| !c.is_empty());
    if client.is_none() && !query.all {
        return Err(ApiError::BadRequest(
            "Either 'client' or 'all=true' must be set".into(),
        ));
    }
    let client = if query.all { None } else { client };

    let mut delete = consent_session::Entity::delete_many()
        .filter(consent_session::Column::Subject.eq(&query.subject));
    if let Some(client) = client {
        delete = delete.filter(consent_session::Column::ClientId.eq(client));
    }
    let removed = delete.exec(state.db()).await?.rows_affected;

    // Tokens from grants without consent (client credentials, jwt-bearer) stay.
    let mut flows = oauth2_flow::Entity::find()
        .filter(oauth2_flow::Column::Subject.eq(&query.subject));
    if let Some(client) = client {
        flows = flows.filter(oauth2_flow::Column::ClientId.eq(client));
    }
    let flows = flows.all(state.db()).await?;
    let request_ids: Vec<String> = flows
        .iter()
        .flat_map(|flow| std::iter::once(flow.id.clone()).chain(flow.device_request_id.clone()))
        .collect();
    let revoked = issuer::revoke_families(state.db(), &request_ids).await?;
    oauth2_flow::Entity::delete_many()
        .filter(oauth2_flow::Column::Id.is_in(flows.into_iter().map(|flow| flow.id)))
        .exec(state.db())
        .await?;

    tracing::info!(
        subject = %query.subject,
        client = client.unwrap_or("*"),
        removed,
        revoked,
        "Consent revoked"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/oauth2/auth/sessions/login",
    tag = FLOW_TAG,
    operation_id = "Revoke Login Sessions",
    summary = "Log a subject out everywhere",
    description = "Removes every login session of the subject and sends back-channel logout \
                   notifications for each of them.",
    params(SubjectQuery),
    responses(
        (status = 204, description = "Login sessions removed"),
    )
)]
pub async fn revoke_login_sessions(
    State(state): State<AppState>,
    Query(query): Query<SubjectQuery>,
) -> Result<StatusCode, ApiError> {
    let sessions = login_session::Entity::find()
        .filter(login_session::Column::Subject.eq(&query.subject))
        .all(state.db())
        .await?;
    login_session::Entity::delete_many()
        .filter(login_session::Column::Subject.eq(&query.subject))
        .exec(state.db())
        .await?;

    for session in &sessions {
        if let Err(e) = logout::notify_backchannel(&state, &session.id).await {
            tracing::error!(sid = %session.id, error = %e, "Back-channel logout failed");
        }
    }
    tracing::info!(subject = %query.subject, sessions = sessions.len(), "Login sessions revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, jar))]
#[utoipa::path(
    get,
    path = "/oauth2/sessions/check",
    tag = OAUTH2_TAG,
    operation_id = "Check Login Session",
    summary = "Whether the browser has an active login session",
    responses(
        (status = 200, description = "Session state", body = SessionCheck),
    )
)]
pub async fn check_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<SessionCheck>, ApiError> {
    let Some(sid) = session_cookie(&jar) else {
        return Ok(Json(SessionCheck::default()));
    };
    let session = login_session::Entity::find_by_id(&sid)
        .one(state.db())
        .await?;
    Ok(Json(match session {
        Some(session) => SessionCheck {
            active: true,
            subject: Some(session.subject),
            sid: Some(session.id),
        },
        None => SessionCheck::default(),
    }))
}
