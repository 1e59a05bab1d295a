//! OAuth 2.0 client registry.
//!
//! Operators manage clients through `/clients` on the admin listener. When
//! enabled, relying parties may register themselves through
//! `/oauth2/register` (RFC 7591) and manage their registration with the
//! returned registration access token (RFC 7592).

pub mod admin;
pub mod registration;
pub mod validation;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::entity::oauth2_client;
use crate::state::AppState;

/// OpenAPI tag for client administration and dynamic registration
pub const CLIENTS_TAG: &str = "Clients";

/// Client metadata as submitted on create, update and registration.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct ClientRequest {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_name: Option<String>,
    /// Space-separated scopes the client may request
    pub scope: Option<String>,
    pub grant_types: Option<Vec<String>>,
    pub response_types: Option<Vec<String>>,
    pub redirect_uris: Option<Vec<String>>,
    pub audience: Option<Vec<String>>,
    pub token_endpoint_auth_method: Option<String>,
    pub subject_type: Option<String>,
    pub access_token_strategy: Option<String>,
    pub backchannel_logout_uri: Option<String>,
    pub backchannel_logout_session_required: Option<bool>,
    pub frontchannel_logout_uri: Option<String>,
    pub frontchannel_logout_session_required: Option<bool>,
    pub post_logout_redirect_uris: Option<Vec<String>>,
    pub skip_consent: Option<bool>,
    pub owner: Option<String>,
    pub contacts: Option<Vec<String>>,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
}

/// A stored client. Secrets and registration tokens only appear in the
/// response of the call that set them.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClientResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub client_name: String,
    pub scope: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub redirect_uris: Vec<String>,
    pub audience: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub subject_type: String,
    pub access_token_strategy: String,
    pub backchannel_logout_uri: Option<String>,
    pub backchannel_logout_session_required: bool,
    pub frontchannel_logout_uri: Option<String>,
    pub frontchannel_logout_session_required: bool,
    pub post_logout_redirect_uris: Vec<String>,
    pub skip_consent: bool,
    pub owner: String,
    pub contacts: Vec<String>,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_client_uri: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&oauth2_client::Model> for ClientResponse {
    fn from(client: &oauth2_client::Model) -> Self {
        Self {
            client_id: client.id.clone(),
            client_secret: None,
            client_name: client.client_name.clone(),
            scope: client.scope.clone(),
            grant_types: client.grant_types_list(),
            response_types: client.response_types_list(),
            redirect_uris: client.redirect_uris_list(),
            audience: client.audience_list(),
            token_endpoint_auth_method: client.token_endpoint_auth_method.clone(),
            subject_type: client.subject_type.clone(),
            access_token_strategy: client.access_token_strategy.clone(),
            backchannel_logout_uri: client.backchannel_logout_uri.clone(),
            backchannel_logout_session_required: client.backchannel_logout_session_required,
            frontchannel_logout_uri: client.frontchannel_logout_uri.clone(),
            frontchannel_logout_session_required: client.frontchannel_logout_session_required,
            post_logout_redirect_uris: client.post_logout_redirect_uris_list(),
            skip_consent: client.skip_consent,
            owner: client.owner.clone(),
            contacts: client.contacts_list(),
            client_uri: client.client_uri.clone(),
            logo_uri: client.logo_uri.clone(),
            registration_access_token: None,
            registration_client_uri: None,
            created_at: client.created_at,
            updated_at: client.updated_at,
        }
    }
}

/// `/clients` for operators.
pub fn admin_router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(admin::create_client, admin::list_clients))
        .routes(routes!(
            admin::get_client,
            admin::update_client,
            admin::delete_client
        ))
        .with_state(state)
}

/// `/oauth2/register` for relying parties.
pub fn registration_router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(registration::register_client))
        .routes(routes!(
            registration::get_registration,
            registration::update_registration,
            registration::delete_registration
        ))
        .with_state(state)
}
