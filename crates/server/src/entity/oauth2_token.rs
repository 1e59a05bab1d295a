//! OAuth2 Token entity - access and refresh tokens, keyed by the SHA-256
//! signature of the token string.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const KIND_ACCESS_TOKEN: &str = "access_token";
pub const KIND_REFRESH_TOKEN: &str = "refresh_token";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_token")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub signature: String,
    pub kind: String,
    /// Token family
    pub request_id: String,
    pub client_id: String,
    pub subject: String,
    pub scope: String,
    pub audience: String,
    pub session_id: Option<String>,
    pub auth_time: Option<OffsetDateTime>,
    pub acr: Option<String>,
    pub access_token_claims: String,
    pub id_token_claims: String,
    pub active: bool,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    /// Active, unexpired and not revoked.
    pub fn is_valid(&self) -> bool {
        self.active && !self.is_expired()
    }

    pub fn is_access_token(&self) -> bool {
        self.kind == KIND_ACCESS_TOKEN
    }

    pub fn is_refresh_token(&self) -> bool {
        self.kind == KIND_REFRESH_TOKEN
    }

    /// Parse scopes from space-separated string
    pub fn scopes_list(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }

    pub fn audience_list(&self) -> Vec<String> {
        self.audience.split_whitespace().map(String::from).collect()
    }

    /// Check if token has a specific scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes_list().iter().any(|s| s == scope)
    }
}
