//! JWT claim sets issued by the server.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::entity::oauth2_client;

pub const BACKCHANNEL_LOGOUT_EVENT: &str = "http://schemas.openid.net/event/backchannel-logout";

/// `aud` may be a single string or an array.
pub fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Audience>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Audience::One(aud)) => vec![aud],
        Some(Audience::Many(aud)) => aud,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,
    pub client_id: String,
    pub scp: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub ext: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    /// Claims granted through the consent session
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// OpenID Connect Back-Channel Logout token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutToken {
    pub iss: String,
    #[serde(default, deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,
    pub iat: i64,
    pub jti: String,
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub events: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogoutTokenError {
    #[error("logout token must not contain a nonce")]
    NoncePresent,
    #[error("logout token is missing the sid claim")]
    MissingSid,
    #[error("logout token issuer {0} does not match")]
    IssuerMismatch(String),
    #[error("logout token is missing the back-channel logout event")]
    MissingEvent,
}

impl LogoutToken {
    /// Relying-party side checks from OpenID Connect Back-Channel Logout 1.0
    /// section 2.6, applied after the signature was verified.
    pub fn validate(&self, expected_issuer: &str) -> Result<(), LogoutTokenError> {
        if self.nonce.is_some() {
            return Err(LogoutTokenError::NoncePresent);
        }
        if self.sid.is_empty() {
            return Err(LogoutTokenError::MissingSid);
        }
        if self.iss != expected_issuer {
            return Err(LogoutTokenError::IssuerMismatch(self.iss.clone()));
        }
        if !self.events.contains_key(BACKCHANNEL_LOGOUT_EVENT) {
            return Err(LogoutTokenError::MissingEvent);
        }
        Ok(())
    }
}

/// `at_hash` for EdDSA: left half of the SHA-512 digest of the access token.
pub fn at_hash(access_token: &str) -> String {
    let digest = Sha512::digest(access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

/// Subject identifier presented to `client`. Pairwise clients receive a
/// per-sector hash of the subject.
pub fn subject_identifier(client: &oauth2_client::Model, subject: &str, salt: &str) -> String {
    if !client.is_pairwise() {
        return subject.to_string();
    }
    let sector = client
        .redirect_uris_list()
        .first()
        .and_then(|uri| url::Url::parse(uri).ok())
        .and_then(|uri| uri.host_str().map(str::to_string))
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{sector}{subject}{salt}").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logout_token() -> LogoutToken {
        let mut events = Map::new();
        events.insert(BACKCHANNEL_LOGOUT_EVENT.into(), Value::Object(Map::new()));
        LogoutToken {
            iss: "https://auth.example.com".into(),
            aud: vec!["client".into()],
            iat: 0,
            jti: "jti".into(),
            sid: "sid".into(),
            events,
            nonce: None,
        }
    }

    #[test]
    fn logout_token_validation() {
        let issuer = "https://auth.example.com";
        assert_eq!(logout_token().validate(issuer), Ok(()));

        let mut with_nonce = logout_token();
        with_nonce.nonce = Some("n".into());
        assert_eq!(
            with_nonce.validate(issuer),
            Err(LogoutTokenError::NoncePresent)
        );

        let mut without_sid = logout_token();
        without_sid.sid.clear();
        assert_eq!(
            without_sid.validate(issuer),
            Err(LogoutTokenError::MissingSid)
        );

        assert!(matches!(
            logout_token().validate("https://other.example.com"),
            Err(LogoutTokenError::IssuerMismatch(_))
        ));
    }

    #[test]
    fn audience_accepts_string_or_array() {
        let single: LogoutToken = serde_json::from_value(serde_json::json!({
            "iss": "i", "aud": "a", "iat": 0, "jti": "j", "sid": "s"
        }))
        .unwrap();
        assert_eq!(single.aud, vec!["a".to_string()]);

        let many: LogoutToken = serde_json::from_value(serde_json::json!({
            "iss": "i", "aud": ["a", "b"], "iat": 0, "jti": "j", "sid": "s"
        }))
        .unwrap();
        assert_eq!(many.aud.len(), 2);
    }

    #[test]
    fn at_hash_is_half_digest() {
        // 32 bytes encode to 43 base64url characters
        assert_eq!(at_hash("token").len(), 43);
    }
}
