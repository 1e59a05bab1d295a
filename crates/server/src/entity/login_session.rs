//! Authentication session entity. The id is the `sid` claim of ID tokens.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "login_session")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub subject: String,
    pub remember: bool,
    /// Seconds, 0 means until the session is revoked
    pub remember_for: i64,
    pub authenticated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this session lets a new authorization request skip the login UI.
    pub fn can_skip_login(&self) -> bool {
        if !self.remember {
            return false;
        }
        self.remember_for == 0
            || self.authenticated_at + Duration::seconds(self.remember_for)
                > OffsetDateTime::now_utc()
    }
}
