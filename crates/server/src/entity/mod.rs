//! sea-orm entities of the authorization server.

pub mod consent_session;
pub mod jwt_bearer_grant;
pub mod jwt_bearer_jti;
pub mod login_session;
pub mod logout_request;
pub mod oauth2_authorization_code;
pub mod oauth2_client;
pub mod oauth2_device_request;
pub mod oauth2_flow;
pub mod oauth2_token;
pub mod policy;
pub mod role;
pub mod signing_key;
