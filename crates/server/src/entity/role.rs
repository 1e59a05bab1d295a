//! Role entity. Policies naming a role apply to all of its members.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "role")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// JSON array of member subjects
    pub members: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn members_list(&self) -> Vec<String> {
        serde_json::from_str(&self.members).unwrap_or_default()
    }

    pub fn has_member(&self, subject: &str) -> bool {
        self.members_list().iter().any(|m| m == subject)
    }
}
