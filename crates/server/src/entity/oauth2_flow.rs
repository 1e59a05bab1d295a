//! Authorization flow entity - one row per `/oauth2/auth` attempt, carrying the
//! login and consent results until the code is issued.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_flow")]
pub struct Model {
    /// Also the login challenge
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub client_id: String,
    /// JSON encoded authorization request parameters
    pub request: String,
    pub requested_scope: String,
    pub requested_audience: String,
    pub state: String,
    pub login_skip: bool,
    pub subject: Option<String>,
    pub login_remember: bool,
    pub login_remember_for: i64,
    pub acr: Option<String>,
    pub login_context: Option<String>,
    pub session_id: Option<String>,
    pub authenticated_at: Option<OffsetDateTime>,
    #[sea_orm(unique)]
    pub login_verifier: Option<String>,
    #[sea_orm(unique)]
    pub consent_challenge: Option<String>,
    pub consent_skip: bool,
    #[sea_orm(unique)]
    pub consent_verifier: Option<String>,
    pub granted_scope: String,
    pub granted_audience: String,
    pub consent_remember: bool,
    pub consent_remember_for: i64,
    /// JSON object of extra access token claims
    pub access_token_claims: String,
    /// JSON object of extra ID token claims
    pub id_token_claims: String,
    /// JSON encoded rejection, set by a login or consent reject
    pub error: Option<String>,
    pub device_request_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    pub fn requested_scope_list(&self) -> Vec<String> {
        self.requested_scope
            .split_whitespace()
            .map(String::from)
            .collect()
    }

    pub fn requested_audience_list(&self) -> Vec<String> {
        self.requested_audience
            .split_whitespace()
            .map(String::from)
            .collect()
    }

    pub fn granted_scope_list(&self) -> Vec<String> {
        self.granted_scope
            .split_whitespace()
            .map(String::from)
            .collect()
    }

    pub fn granted_audience_list(&self) -> Vec<String> {
        self.granted_audience
            .split_whitespace()
            .map(String::from)
            .collect()
    }
}
