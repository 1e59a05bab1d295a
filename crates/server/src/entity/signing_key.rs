//! Signing key entity. Rotated-out keys stay for verification with `active = false`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "signing_key")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub kid: String,
    pub key_set: String,
    pub algorithm: String,
    /// Base64 encoded PKCS#8 DER private key
    #[serde(skip_serializing)]
    pub private_key: String,
    /// Base64url encoded Ed25519 public key
    pub public_key: String,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
