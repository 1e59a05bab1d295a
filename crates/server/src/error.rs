use axum::{
    Json,
    extract::rejection::{FormRejection, JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

/// RFC 6749 / OIDC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error(
        "The request is missing a required parameter, includes an invalid parameter value, includes a parameter more than once, or is otherwise malformed."
    )]
    InvalidRequest,
    #[error(
        "Client authentication failed (e.g., unknown client, no client authentication included, or unsupported authentication method)."
    )]
    InvalidClient,
    #[error(
        "The provided authorization grant (e.g., authorization code, resource owner credentials) or refresh token is invalid, expired, revoked, does not match the redirection URI used in the authorization request, or was issued to another client."
    )]
    InvalidGrant,
    #[error("The client is not authorized to request a token using this method.")]
    UnauthorizedClient,
    #[error("The authorization grant type is not supported by the authorization server.")]
    UnsupportedGrantType,
    #[error(
        "The authorization server does not support obtaining a token using this method."
    )]
    UnsupportedResponseType,
    #[error("The requested scope is invalid, unknown, or malformed.")]
    InvalidScope,
    #[error("The resource owner denied the request")]
    AccessDenied,
    #[error("The Authorization Server requires End-User authentication.")]
    LoginRequired,
    #[error("The Authorization Server requires End-User consent.")]
    ConsentRequired,
    #[error("The request is not allowed.")]
    RequestForbidden,
    #[error(
        "The access token provided is expired, revoked, malformed, or invalid for other reasons."
    )]
    InvalidToken,
    #[error(
        "The authorization request is still pending as the end user hasn't yet completed the user-interaction steps."
    )]
    AuthorizationPending,
    #[error(
        "The authorization request is still pending and polling should continue, but the interval MUST be increased."
    )]
    SlowDown,
    #[error("The device_code has expired, and the device authorization session has concluded.")]
    ExpiredToken,
    #[error(
        "The authorization server encountered an unexpected condition that prevented it from fulfilling the request."
    )]
    ServerError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidClient => "invalid_client",
            ErrorKind::InvalidGrant => "invalid_grant",
            ErrorKind::UnauthorizedClient => "unauthorized_client",
            ErrorKind::UnsupportedGrantType => "unsupported_grant_type",
            ErrorKind::UnsupportedResponseType => "unsupported_response_type",
            ErrorKind::InvalidScope => "invalid_scope",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::LoginRequired => "login_required",
            ErrorKind::ConsentRequired => "consent_required",
            ErrorKind::RequestForbidden => "request_forbidden",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::AuthorizationPending => "authorization_pending",
            ErrorKind::SlowDown => "slow_down",
            ErrorKind::ExpiredToken => "expired_token",
            ErrorKind::ServerError => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidClient | ErrorKind::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorKind::AccessDenied | ErrorKind::RequestForbidden => StatusCode::FORBIDDEN,
            ErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "invalid_request" => ErrorKind::InvalidRequest,
            "invalid_client" => ErrorKind::InvalidClient,
            "invalid_grant" => ErrorKind::InvalidGrant,
            "unauthorized_client" => ErrorKind::UnauthorizedClient,
            "unsupported_grant_type" => ErrorKind::UnsupportedGrantType,
            "unsupported_response_type" => ErrorKind::UnsupportedResponseType,
            "invalid_scope" => ErrorKind::InvalidScope,
            "access_denied" => ErrorKind::AccessDenied,
            "login_required" => ErrorKind::LoginRequired,
            "consent_required" => ErrorKind::ConsentRequired,
            "request_forbidden" => ErrorKind::RequestForbidden,
            "invalid_token" => ErrorKind::InvalidToken,
            "authorization_pending" => ErrorKind::AuthorizationPending,
            "slow_down" => ErrorKind::SlowDown,
            "expired_token" => ErrorKind::ExpiredToken,
            "server_error" => ErrorKind::ServerError,
            _ => return None,
        })
    }
}

/// Protocol error returned by the public OAuth2 endpoints, either as a JSON body
/// or as query parameters on a redirect.
#[derive(Debug, Clone)]
pub struct OAuth2Error {
    pub kind: ErrorKind,
    pub hint: Option<String>,
    /// Replaces the default description of `kind`, set by login/consent rejections.
    pub description: Option<String>,
}

impl OAuth2Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            description: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| self.kind.to_string())
    }

    pub fn invalid_request(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest).with_hint(hint)
    }

    pub fn invalid_client(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidClient).with_hint(hint)
    }

    pub fn invalid_grant(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidGrant).with_hint(hint)
    }

    pub fn invalid_scope(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidScope).with_hint(hint)
    }

    pub fn unauthorized_client(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnauthorizedClient).with_hint(hint)
    }

    pub fn access_denied() -> Self {
        Self::new(ErrorKind::AccessDenied)
    }

    pub fn server_error(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError).with_hint(hint)
    }

    pub fn to_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.kind.code().to_string(),
            error_description: Some(self.description()),
            error_hint: self.hint.clone(),
        }
    }

    /// Appends the error to `redirect_uri` as query parameters.
    pub fn redirect_to(&self, redirect_uri: &str, state: Option<&str>) -> Response {
        let Ok(mut url) = Url::parse(redirect_uri) else {
            return self.clone().into_response();
        };
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("error", self.kind.code());
            pairs.append_pair("error_description", &self.description());
            if let Some(hint) = &self.hint {
                pairs.append_pair("error_hint", hint);
            }
            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
        }
        Redirect::to(url.as_str()).into_response()
    }
}

impl fmt::Display for OAuth2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.description())?;
        if let Some(hint) = &self.hint {
            write!(f, " {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for OAuth2Error {}

impl From<DbErr> for OAuth2Error {
    fn from(err: DbErr) -> Self {
        tracing::error!(error = %err, "Database error");
        OAuth2Error::server_error("A database error occurred")
    }
}

impl IntoResponse for OAuth2Error {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let mut response = (status, Json(self.to_body())).into_response();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = format!("Bearer error=\"{}\"", self.kind.code());
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

/// Standard OAuth2 error body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_hint: Option<String>,
}

/// Errors of the admin and registration APIs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Database(_) | ApiError::Internal(_) => "server_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let description = match &self {
            ApiError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "A database error occurred".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorResponse {
            error: self.code().to_string(),
            error_description: Some(description),
            error_hint: None,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<FormRejection> for OAuth2Error {
    fn from(rejection: FormRejection) -> Self {
        OAuth2Error::invalid_request(rejection.body_text())
    }
}

/// Maps a unique-constraint violation to `Conflict`, everything else to `Database`.
pub fn conflict_or_db(err: DbErr, message: impl Into<String>) -> ApiError {
    match err.sql_err() {
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => ApiError::Conflict(message.into()),
        _ => ApiError::Database(err),
    }
}
