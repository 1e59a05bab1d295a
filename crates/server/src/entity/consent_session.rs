//! Consent session entity - granted scope per (client, subject).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "consent_session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub client_id: String,
    pub subject: String,
    pub granted_scope: String,
    pub granted_audience: String,
    pub remember: bool,
    pub remember_for: i64,
    /// Login session the consent was granted under
    pub session_id: Option<String>,
    pub access_token_claims: String,
    pub id_token_claims: String,
    pub handled_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
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

    /// Remembered and not yet past `remember_for`.
    pub fn is_reusable(&self) -> bool {
        if !self.remember {
            return false;
        }
        self.remember_for == 0
            || self.handled_at + Duration::seconds(self.remember_for) > OffsetDateTime::now_utc()
    }
}
