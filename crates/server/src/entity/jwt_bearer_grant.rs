//! Trusted JWT-bearer issuer entity (RFC 7523).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "jwt_bearer_grant")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub issuer: String,
    /// Empty when `allow_any_subject` is set
    pub subject: String,
    pub allow_any_subject: bool,
    pub scope: String,
    pub key_id: String,
    /// JSON encoded public JWK
    pub jwk: String,
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

    pub fn scopes_list(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }
}
