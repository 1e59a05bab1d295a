//! OAuth2 Authorization Code entity - single-use codes exchanged for tokens.
//! Only the SHA-256 signature of the code is stored.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::oauth2::pkce;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_authorization_code")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub signature: String,
    /// Token family shared by every token issued from this code
    pub request_id: String,
    pub client_id: String,
    pub subject: String,
    pub redirect_uri: String,
    /// The authorization request named `redirect_uri` itself
    pub redirect_uri_explicit: bool,
    pub scope: String,
    pub audience: String,
    /// OpenID Connect nonce
    pub nonce: Option<String>,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (S256 or plain)
    pub code_challenge_method: Option<String>,
    pub session_id: Option<String>,
    pub auth_time: OffsetDateTime,
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
    /// Check if this authorization code has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    pub fn scopes_list(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }

    /// Verify PKCE code verifier against stored challenge
    pub fn verify_pkce(&self, code_verifier: Option<&str>) -> bool {
        match (&self.code_challenge, &self.code_challenge_method) {
            (Some(challenge), Some(method)) => code_verifier
                .is_some_and(|verifier| pkce::verify(challenge, method, verifier)),
            // No PKCE required if not provided during authorization
            (None, None) => code_verifier.is_none(),
            _ => false,
        }
    }
}
