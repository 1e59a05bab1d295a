//! OpenAPI/Utoipa configuration.

use crate::api::health::MISC_TAG;
use crate::clients::CLIENTS_TAG;
use crate::oauth2::discovery::KEYS_TAG;
use crate::oauth2::{FLOW_TAG, OAUTH2_TAG};
use crate::trust::TRUST_TAG;
use crate::warden::WARDEN_TAG;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Security schemes shared by both listeners.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);

        let bearer = HttpBuilder::new()
            .scheme(HttpAuthScheme::Bearer)
            .description(Some(
                "An access token issued by `/oauth2/token`, or the registration access token \
                 returned by `/oauth2/register` on the registration endpoints.",
            ))
            .build();
        components.add_security_scheme("bearer_auth", SecurityScheme::Http(bearer));

        let admin = HttpBuilder::new()
            .scheme(HttpAuthScheme::Bearer)
            .description(Some(
                "The `admin.api_key` from the configuration. Required on the admin listener when set.",
            ))
            .build();
        components.add_security_scheme("admin_api_key", SecurityScheme::Http(admin));
    }
}

/// OpenAPI documentation of the public listener.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "keyward public API",
        version = "1.0.0",
        description = "OAuth 2.0 and OpenID Connect endpoints used by clients and browsers."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth 2.0 and OpenID Connect endpoints"),
        (name = KEYS_TAG, description = "Signing keys"),
        (name = CLIENTS_TAG, description = "Dynamic client registration")
    )
)]
pub struct PublicApiDoc;

/// OpenAPI documentation of the admin listener.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    security(("admin_api_key" = [])),
    info(
        title = "keyward admin API",
        version = "1.0.0",
        description = "Administration of clients, login and consent flows, trust relationships, \
                       signing keys and access policies."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "Token introspection and revocation"),
        (name = FLOW_TAG, description = "Login, consent and logout requests and sessions"),
        (name = KEYS_TAG, description = "Signing keys"),
        (name = CLIENTS_TAG, description = "OAuth 2.0 client management"),
        (name = TRUST_TAG, description = "Trusted JWT-bearer grant issuers"),
        (name = WARDEN_TAG, description = "Access policies and decisions")
    )
)]
pub struct AdminApiDoc;
