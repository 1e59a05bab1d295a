//! OAuth2 Client entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Argon2 hash of the client secret (None for public clients)
    pub secret_hash: Option<String>,
    pub client_name: String,
    /// Space-separated list of allowed scopes
    pub scope: String,
    /// Space-separated list of allowed grant types
    pub grant_types: String,
    /// Space-separated list of allowed response types
    pub response_types: String,
    /// JSON array of allowed redirect URIs
    pub redirect_uris: String,
    /// Space-separated list of allowed access token audiences
    pub audience: String,
    pub token_endpoint_auth_method: String,
    pub subject_type: String,
    pub access_token_strategy: String,
    pub backchannel_logout_uri: Option<String>,
    pub backchannel_logout_session_required: bool,
    pub frontchannel_logout_uri: Option<String>,
    pub frontchannel_logout_session_required: bool,
    /// JSON array of allowed post-logout redirect URIs
    pub post_logout_redirect_uris: String,
    pub skip_consent: bool,
    pub owner: String,
    /// JSON array of contact addresses
    pub contacts: String,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
    /// Argon2 hash of the dynamic registration access token
    pub registration_token_hash: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse redirect URIs from JSON string
    pub fn redirect_uris_list(&self) -> Vec<String> {
        serde_json::from_str(&self.redirect_uris).unwrap_or_default()
    }

    pub fn post_logout_redirect_uris_list(&self) -> Vec<String> {
        serde_json::from_str(&self.post_logout_redirect_uris).unwrap_or_default()
    }

    pub fn contacts_list(&self) -> Vec<String> {
        serde_json::from_str(&self.contacts).unwrap_or_default()
    }

    /// Parse grant types from space-separated string
    pub fn grant_types_list(&self) -> Vec<String> {
        self.grant_types
            .split_whitespace()
            .map(String::from)
            .collect()
    }

    pub fn response_types_list(&self) -> Vec<String> {
        self.response_types
            .split_whitespace()
            .map(String::from)
            .collect()
    }

    /// Parse scopes from space-separated string
    pub fn scopes_list(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }

    pub fn audience_list(&self) -> Vec<String> {
        self.audience.split_whitespace().map(String::from).collect()
    }

    /// Check if a redirect URI is allowed for this client
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris_list()
            .iter()
            .any(|allowed| allowed == uri)
    }

    /// Check if a grant type is allowed for this client
    pub fn is_grant_type_allowed(&self, grant_type: &str) -> bool {
        self.grant_types_list().iter().any(|g| g == grant_type)
    }

    pub fn is_response_type_allowed(&self, response_type: &str) -> bool {
        self.response_types_list().iter().any(|r| r == response_type)
    }

    /// Public clients authenticate with `none` and hold no secret.
    pub fn is_public(&self) -> bool {
        self.token_endpoint_auth_method == "none"
    }

    pub fn is_pairwise(&self) -> bool {
        self.subject_type == "pairwise"
    }
}
