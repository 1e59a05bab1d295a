//! Device authorization request entity (RFC 8628).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_DENIED: &str = "denied";
pub const STATUS_CONSUMED: &str = "consumed";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_device_request")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub device_code_signature: String,
    #[sea_orm(unique)]
    pub user_code: String,
    pub client_id: String,
    pub requested_scope: String,
    pub requested_audience: String,
    pub status: String,
    pub subject: Option<String>,
    pub granted_scope: String,
    pub granted_audience: String,
    pub session_id: Option<String>,
    pub auth_time: Option<OffsetDateTime>,
    pub acr: Option<String>,
    pub access_token_claims: String,
    pub id_token_claims: String,
    pub interval_secs: i64,
    pub last_polled_at: Option<OffsetDateTime>,
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
}
