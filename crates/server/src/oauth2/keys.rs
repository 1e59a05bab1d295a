//! Signing key management.
//!
//! Every key set holds Ed25519 keys. Exactly one key per set is active and used
//! for new signatures; rotation deactivates the current key and creates a new
//! one, while the old public keys stay published in the JWKS so previously
//! issued tokens keep verifying.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm,
    OctetKeyPairParameters, OctetKeyPairType, PublicKeyUse,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder, sea_query::Expr,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use time::OffsetDateTime;

use crate::entity::signing_key;
use crate::error::{ApiError, OAuth2Error};

pub const ALGORITHM: &str = "EdDSA";

/// Named groups of signing keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySet {
    /// ID tokens and logout tokens
    IdToken,
    /// JWT access tokens
    AccessToken,
}

impl KeySet {
    pub const ALL: [KeySet; 2] = [KeySet::IdToken, KeySet::AccessToken];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeySet::IdToken => "openid.id-token",
            KeySet::AccessToken => "oauth2.access-token",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        KeySet::ALL.into_iter().find(|set| set.as_str() == value)
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("Key encoding error: {0}")]
    Encoding(String),
    #[error("Unknown key id: {0}")]
    UnknownKey(String),
}

impl From<KeyError> for ApiError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Database(e) => ApiError::Database(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<KeyError> for OAuth2Error {
    fn from(err: KeyError) -> Self {
        tracing::error!(error = %err, "Signing key error");
        OAuth2Error::server_error("Unable to sign the token")
    }
}

fn generate_key(set: KeySet) -> Result<signing_key::ActiveModel, KeyError> {
    let mut seed = [0u8; 32];
    getrandom::fill(&mut seed).map_err(|e| KeyError::Encoding(e.to_string()))?;
    let key = SigningKey::from_bytes(&seed);
    let der = key
        .to_pkcs8_der()
        .map_err(|e| KeyError::Encoding(e.to_string()))?;

    Ok(signing_key::ActiveModel {
        kid: Set(uuid::Uuid::new_v4().to_string()),
        key_set: Set(set.as_str().to_string()),
        algorithm: Set(ALGORITHM.to_string()),
        private_key: Set(STANDARD.encode(der.as_bytes())),
        public_key: Set(URL_SAFE_NO_PAD.encode(key.verifying_key().as_bytes())),
        active: Set(true),
        created_at: Set(OffsetDateTime::now_utc()),
    })
}

/// The key currently used for signing in `set`, created on first use.
pub async fn active_key<C: ConnectionTrait>(
    conn: &C,
    set: KeySet,
) -> Result<signing_key::Model, KeyError> {
    let existing = signing_key::Entity::find()
        .filter(signing_key::Column::KeySet.eq(set.as_str()))
        .filter(signing_key::Column::Active.eq(true))
        .order_by_desc(signing_key::Column::CreatedAt)
        .one(conn)
        .await?;
    if let Some(key) = existing {
        return Ok(key);
    }

    let key = generate_key(set)?.insert(conn).await?;
    tracing::info!(kid = %key.kid, key_set = set.as_str(), "Created signing key");
    Ok(key)
}

/// Deactivates every key of `set` and creates a fresh active one.
pub async fn rotate<C: ConnectionTrait>(conn: &C, set: KeySet) -> Result<signing_key::Model, KeyError> {
    signing_key::Entity::update_many()
        .col_expr(signing_key::Column::Active, Expr::value(false))
        .filter(signing_key::Column::KeySet.eq(set.as_str()))
        .exec(conn)
        .await?;

    let key = generate_key(set)?.insert(conn).await?;
    tracing::info!(kid = %key.kid, key_set = set.as_str(), "Rotated signing key");
    Ok(key)
}

/// Signs `claims` with the active key of `set`.
pub async fn sign<C: ConnectionTrait, T: Serialize>(
    conn: &C,
    set: KeySet,
    claims: &T,
) -> Result<String, KeyError> {
    let key = active_key(conn, set).await?;
    let der = STANDARD
        .decode(&key.private_key)
        .map_err(|e| KeyError::Encoding(e.to_string()))?;

    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(key.kid.clone());
    header.typ = Some("JWT".to_string());
    Ok(jsonwebtoken::encode(
        &header,
        claims,
        &EncodingKey::from_ed_der(&der),
    )?)
}

/// Verifies a token signed by one of our keys, looking the key up by `kid`.
pub async fn verify<C: ConnectionTrait, T: DeserializeOwned>(
    conn: &C,
    token: &str,
    validation: &Validation,
) -> Result<T, KeyError> {
    let header = jsonwebtoken::decode_header(token)?;
    let kid = header
        .kid
        .ok_or_else(|| KeyError::UnknownKey("<missing>".into()))?;
    let key = signing_key::Entity::find_by_id(&kid)
        .one(conn)
        .await?
        .ok_or(KeyError::UnknownKey(kid))?;
    let decoding_key = DecodingKey::from_ed_components(&key.public_key)?;
    Ok(jsonwebtoken::decode::<T>(token, &decoding_key, validation)?.claims)
}

/// Validation settings for our own EdDSA tokens.
pub fn validation(issuer: &str) -> Validation {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.set_issuer(&[issuer]);
    validation.validate_aud = false;
    validation
}

pub fn to_jwk(key: &signing_key::Model) -> Jwk {
    Jwk {
        common: CommonParameters {
            public_key_use: Some(PublicKeyUse::Signature),
            key_algorithm: Some(KeyAlgorithm::EdDSA),
            key_id: Some(key.kid.clone()),
            ..Default::default()
        },
        algorithm: AlgorithmParameters::OctetKeyPair(OctetKeyPairParameters {
            key_type: OctetKeyPairType::OctetKeyPair,
            curve: EllipticCurve::Ed25519,
            x: key.public_key.clone(),
        }),
    }
}

/// Public keys of `set`, or of every set, newest first.
pub async fn public_keys<C: ConnectionTrait>(
    conn: &C,
    set: Option<KeySet>,
) -> Result<JwkSet, KeyError> {
    let mut query = signing_key::Entity::find().order_by_desc(signing_key::Column::CreatedAt);
    if let Some(set) = set {
        query = query.filter(signing_key::Column::KeySet.eq(set.as_str()));
    }
    let keys = query.all(conn).await?;
    Ok(JwkSet {
        keys: keys.iter().map(to_jwk).collect(),
    })
}
