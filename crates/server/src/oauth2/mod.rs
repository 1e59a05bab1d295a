//! OAuth 2.0 and OpenID Connect authorization server.
//!
//! Public endpoints (authorization, token, revocation, userinfo, discovery,
//! device authorization, logout) are served by [`public_router`]. The login,
//! consent and logout UIs drive flows through the admin API in
//! [`admin_router`], which also carries introspection, bulk token revocation,
//! key administration and session management.

pub mod authorize;
pub mod client_auth;
pub mod device;
pub mod discovery;
pub mod fallbacks;
pub mod flow;
pub mod flow_admin;
pub mod grants;
pub mod introspect;
pub mod issuer;
pub mod jwt;
pub mod keys;
pub mod logout;
pub mod pkce;
pub mod revoke;
pub mod scope;
pub mod secrets;
pub mod sessions;
pub mod token;
pub mod userinfo;

use utoipa_axum::{router::OpenApiRouter, routes};

use crate::state::AppState;

/// OpenAPI tag for the public OAuth2 and OpenID Connect endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
/// OpenAPI tag for the login, consent and logout flow administration
pub const FLOW_TAG: &str = "Flows";

/// Endpoints served to browsers and relying parties.
pub fn public_router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize::authorize))
        .routes(routes!(token::token))
        .routes(routes!(revoke::revoke))
        .routes(routes!(userinfo::userinfo))
        .routes(routes!(discovery::openid_configuration))
        .routes(routes!(discovery::jwks))
        .routes(routes!(device::device_authorization))
        .routes(routes!(device::device_verify))
        .routes(routes!(logout::logout))
        .routes(routes!(sessions::check_session))
        .routes(routes!(fallbacks::error_page))
        .routes(routes!(fallbacks::login_fallback))
        .routes(routes!(fallbacks::consent_fallback))
        .routes(routes!(fallbacks::logout_fallback))
        .routes(routes!(fallbacks::logout_callback))
        .routes(routes!(fallbacks::device_done))
        .with_state(state)
}

/// Endpoints for the login, consent and logout UIs and for operators.
pub fn admin_router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(flow_admin::get_login_request))
        .routes(routes!(flow_admin::accept_login_request))
        .routes(routes!(flow_admin::reject_login_request))
        .routes(routes!(flow_admin::get_consent_request))
        .routes(routes!(flow_admin::accept_consent_request))
        .routes(routes!(flow_admin::reject_consent_request))
        .routes(routes!(flow_admin::get_logout_request))
        .routes(routes!(flow_admin::accept_logout_request))
        .routes(routes!(flow_admin::reject_logout_request))
        .routes(routes!(
            sessions::list_consent_sessions,
            sessions::revoke_consent_sessions
        ))
        .routes(routes!(sessions::revoke_login_sessions))
        .routes(routes!(introspect::introspect))
        .routes(routes!(revoke::revoke_tokens))
        .routes(routes!(discovery::get_key_set))
        .routes(routes!(discovery::rotate_key_set))
        .with_state(state)
}
