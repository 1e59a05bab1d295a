//! Device authorization grant endpoints (RFC 8628).

use axum::{
    Form, Json,
    extract::{Query, State, rejection::FormRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::{IntoParams, ToSchema};

use crate::entity::{oauth2_client, oauth2_device_request};
use crate::error::{ErrorResponse, OAuth2Error};
use crate::oauth2::flow::{self, AuthorizationRequest, FlowError, with_query};
use crate::oauth2::{OAUTH2_TAG, client_auth, grants, scope, secrets};
use crate::pages::{self, DeviceVerifyPage};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceAuthorizationRequest {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Space-separated scopes
    pub scope: Option<String>,
    /// Space-separated audiences
    pub audience: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: i64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeviceVerifyQuery {
    pub user_code: Option<String>,
}

/// User codes are shown grouped and typed in by hand.
fn normalize_user_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/oauth2/device/auth",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Device Authorization",
    summary = "Start a device authorization",
    description = "Returns a device code for polling the token endpoint and a user code the end-user \
                   enters at `verification_uri`. The client must be allowed to use the \
                   `urn:ietf:params:oauth:grant-type:device_code` grant.",
    request_body(
        content = DeviceAuthorizationRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Device authorization request"
    ),
    responses(
        (status = 200, description = "Device authorization started", body = DeviceAuthorizationResponse),
        (status = 400, description = "Invalid scope or audience, or grant not allowed", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn device_authorization(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<DeviceAuthorizationRequest>, FormRejection>,
) -> Response {
    let Form(params) = match form {
        Ok(form) => form,
        Err(rejection) => return OAuth2Error::from(rejection).into_response(),
    };
    match start(&state, &headers, &params).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn start(
    state: &AppState,
    headers: &HeaderMap,
    params: &DeviceAuthorizationRequest,
) -> Result<DeviceAuthorizationResponse, OAuth2Error> {
    let config = &state.config.oauth2;
    let client = client_auth::authenticate(
        state.db(),
        headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    )
    .await?;
    if !client.is_grant_type_allowed(grants::DEVICE_CODE) {
        return Err(OAuth2Error::unauthorized_client(format!(
            "The OAuth 2.0 Client is not allowed to use authorization grant '{}'.",
            grants::DEVICE_CODE
        )));
    }

    let requested_scope = scope::split(params.scope.as_deref().unwrap_or_default());
    if let Some(denied) = config
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

    let now = OffsetDateTime::now_utc();
    let device_code = secrets::generate_token();
    let user_code = secrets::generate_user_code(config.device.user_code_length);
    let record = oauth2_device_request::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        device_code_signature: Set(secrets::signature(&device_code)),
        user_code: Set(user_code.clone()),
        client_id: Set(client.id.clone()),
        requested_scope: Set(scope::join(&requested_scope)),
        requested_audience: Set(scope::join(&requested_audience)),
        status: Set(oauth2_device_request::STATUS_PENDING.to_string()),
        subject: Set(None),
        granted_scope: Set(String::new()),
        granted_audience: Set(String::new()),
        session_id: Set(None),
        auth_time: Set(None),
        acr: Set(None),
        access_token_claims: Set("{}".to_string()),
        id_token_claims: Set("{}".to_string()),
        interval_secs: Set(config.device.poll_interval),
        last_polled_at: Set(None),
        expires_at: Set(now + Duration::seconds(config.ttl.device_code)),
        created_at: Set(now),
    }
    .insert(state.db())
    .await?;
    tracing::info!(client_id = %client.id, device_request = %record.id, "Device authorization started");

    let verification_uri = config.public_url("/oauth2/device/verify");
    Ok(DeviceAuthorizationResponse {
        device_code,
        verification_uri_complete: with_query(&verification_uri, &[("user_code", &user_code)]),
        user_code,
        verification_uri,
        expires_in: config.ttl.device_code,
        interval: config.device.poll_interval,
    })
}

#[tracing::instrument(skip(state, headers, query))]
#[utoipa::path(
    get,
    path = "/oauth2/device/verify",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Device Verification",
    summary = "Enter a device user code",
    description = "Without `user_code` a form asking for the code is rendered. With a valid code an \
                   authorization flow bound to the device request starts; once consent is given the \
                   device request is approved and the browser lands on the device done page.",
    params(DeviceVerifyQuery),
    responses(
        (status = 200, description = "User code form"),
        (status = 303, description = "Redirect to the login UI or the device done page"),
    )
)]
pub async fn device_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DeviceVerifyQuery>,
) -> Response {
    let config = &state.config.oauth2;
    let Some(user_code) = query.user_code.as_deref().filter(|c| !c.trim().is_empty()) else {
        return pages::render(
            StatusCode::OK,
            &DeviceVerifyPage {
                action: config.public_url("/oauth2/device/verify"),
            },
        );
    };

    let result = verify(&state, &headers, &normalize_user_code(user_code)).await;
    result.into_response()
}

async fn verify(state: &AppState, headers: &HeaderMap, user_code: &str) -> flow::FlowResult {
    let config = &state.config.oauth2;
    let device_error = |error: OAuth2Error| FlowError::client(&config.device_done_url(), None, error);

    let record = oauth2_device_request::Entity::find()
        .filter(oauth2_device_request::Column::UserCode.eq(user_code))
        .one(state.db())
        .await?
        .filter(|r| r.status == oauth2_device_request::STATUS_PENDING && !r.is_expired())
        .ok_or_else(|| {
            device_error(OAuth2Error::invalid_request(
                "The user code is unknown, expired or was already used.",
            ))
        })?;

    let client = oauth2_client::Entity::find_by_id(&record.client_id)
        .one(state.db())
        .await?
        .ok_or_else(|| {
            FlowError::page(
                config,
                OAuth2Error::invalid_client("The requested OAuth 2.0 Client does not exist."),
            )
        })?;

    let request = AuthorizationRequest {
        response_type: "device_code".to_string(),
        client_id: client.id.clone(),
        scope: record.requested_scope_list(),
        audience: record.requested_audience_list(),
        ..Default::default()
    };
    flow::begin(state, headers, &client, request, Some(record.id)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_code_is_normalized() {
        assert_eq!(normalize_user_code("bcdf-ghjk"), "BCDFGHJK");
        assert_eq!(normalize_user_code(" BCDF GHJK "), "BCDFGHJK");
    }
}
