//! Trust relationships for the JWT-bearer authorization grant (RFC 7523).
//!
//! Each relationship names an issuer, the subject it may assert (or any
//! subject), the scopes it may obtain and the public key its assertions are
//! signed with.

pub mod issuers;

use utoipa_axum::{router::OpenApiRouter, routes};

use crate::state::AppState;

/// OpenAPI tag for trust relationship administration
pub const TRUST_TAG: &str = "Trust";

pub fn admin_router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(issuers::create_issuer, issuers::list_issuers))
        .routes(routes!(issuers::get_issuer, issuers::delete_issuer))
        .with_state(state)
}
