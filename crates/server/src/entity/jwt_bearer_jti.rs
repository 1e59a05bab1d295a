//! Used assertion identifiers, kept until the assertion would have expired.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "jwt_bearer_jti")]
pub struct Model {
    /// SHA-256 of issuer and jti
    #[sea_orm(primary_key, auto_increment = false)]
    pub signature: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
