//! Built-in pages used while no external login, consent or logout UI is configured.

use axum::{extract::Query, http::StatusCode, response::Response};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::oauth2::OAUTH2_TAG;
use crate::pages::{self, MessagePage};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ErrorQuery {
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_hint: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ChallengeQuery {
    pub login_challenge: Option<String>,
    pub consent_challenge: Option<String>,
    pub logout_challenge: Option<String>,
}

fn not_configured(what: &str, key: &str, challenge: Option<&str>) -> Response {
    pages::render(
        StatusCode::OK,
        &MessagePage::new(
            format!("{what} is not configured"),
            format!(
                "No {} UI has been configured. Set `oauth2.urls.{key}` to the URL of your {} UI.",
                what.to_lowercase(),
                what.to_lowercase()
            ),
        )
        .detail("Challenge", challenge),
    )
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/oauth2/fallbacks/error",
    tag = OAUTH2_TAG,
    operation_id = "Error Page",
    summary = "Default error page",
    description = "Shown for authorization errors that cannot be sent to the client, until \
                   `oauth2.urls.error` points elsewhere.",
    params(ErrorQuery),
    responses(
        (status = 200, description = "HTML error page"),
    )
)]
pub async fn error_page(Query(query): Query<ErrorQuery>) -> Response {
    let title = query.error.as_deref().unwrap_or("error");
    pages::render(
        StatusCode::OK,
        &MessagePage::new(
            "An error occurred",
            query
                .error_description
                .as_deref()
                .unwrap_or("The request could not be completed."),
        )
        .detail("Error", Some(title))
        .detail("Hint", query.error_hint.as_deref()),
    )
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/oauth2/fallbacks/login",
    tag = OAUTH2_TAG,
    operation_id = "Login Fallback",
    summary = "Placeholder login UI",
    params(ChallengeQuery),
    responses(
        (status = 200, description = "HTML page"),
    )
)]
pub async fn login_fallback(Query(query): Query<ChallengeQuery>) -> Response {
    not_configured("Login", "login", query.login_challenge.as_deref())
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/oauth2/fallbacks/consent",
    tag = OAUTH2_TAG,
    operation_id = "Consent Fallback",
    summary = "Placeholder consent UI",
    params(ChallengeQuery),
    responses(
        (status = 200, description = "HTML page"),
    )
)]
pub async fn consent_fallback(Query(query): Query<ChallengeQuery>) -> Response {
    not_configured("Consent", "consent", query.consent_challenge.as_deref())
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/oauth2/fallbacks/logout",
    tag = OAUTH2_TAG,
    operation_id = "Logout Fallback",
    summary = "Placeholder logout UI",
    params(ChallengeQuery),
    responses(
        (status = 200, description = "HTML page"),
    )
)]
pub async fn logout_fallback(Query(query): Query<ChallengeQuery>) -> Response {
    not_configured("Logout", "logout", query.logout_challenge.as_deref())
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/oauth2/fallbacks/logout/callback",
    tag = OAUTH2_TAG,
    operation_id = "Logout Callback",
    summary = "Default post-logout page",
    responses(
        (status = 200, description = "HTML page"),
    )
)]
pub async fn logout_callback() -> Response {
    pages::render(
        StatusCode::OK,
        &MessagePage::new("Logged out", "You have been logged out successfully."),
    )
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/oauth2/fallbacks/device/done",
    tag = OAUTH2_TAG,
    operation_id = "Device Done",
    summary = "Default device verification result page",
    params(ErrorQuery),
    responses(
        (status = 200, description = "HTML page"),
    )
)]
pub async fn device_done(Query(query): Query<ErrorQuery>) -> Response {
    let page = match query.error.as_deref() {
        Some(error) => MessagePage::new(
            "Device not authorized",
            query
                .error_description
                .as_deref()
                .unwrap_or("The device could not be authorized."),
        )
        .detail("Error", Some(error))
        .detail("Hint", query.error_hint.as_deref()),
        None => MessagePage::new(
            "Device authorized",
            "Your device is now connected. You can close this window.",
        ),
    };
    pages::render(StatusCode::OK, &page)
}
