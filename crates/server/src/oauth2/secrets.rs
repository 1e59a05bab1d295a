//! Secret hashing, random token generation and token signatures.
//!
//! Client secrets and registration access tokens are hashed with Argon2id.
//! Issued codes and tokens are high-entropy random strings; only their SHA-256
//! signature is persisted.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Length of generated client secrets.
pub const CLIENT_SECRET_LENGTH: usize = 26;

/// Shortest client secret accepted from the admin API.
pub const MIN_CLIENT_SECRET_LENGTH: usize = 6;

/// RFC 8628 recommends a consonant-only alphabet for user codes.
const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";

/// Hash a secret using Argon2id.
///
/// Returns the PHC-formatted hash string suitable for storage.
pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a secret against a stored hash.
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed_hash)
        .is_ok()
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).expect("Failed to generate random bytes");
    bytes
}

/// Generate a secure random token (authorization codes, opaque access and
/// refresh tokens, verifiers).
///
/// Returns a URL-safe base64-encoded string.
pub fn generate_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<32>())
}

/// Generate a client secret of [`CLIENT_SECRET_LENGTH`] URL-safe characters.
pub fn generate_client_secret() -> String {
    let mut secret = URL_SAFE_NO_PAD.encode(random_bytes::<24>());
    secret.truncate(CLIENT_SECRET_LENGTH);
    secret
}

/// Generate a user code for the device flow.
pub fn generate_user_code(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    getrandom::fill(&mut bytes).expect("Failed to generate random bytes");
    bytes
        .iter()
        .map(|b| USER_CODE_ALPHABET[*b as usize % USER_CODE_ALPHABET.len()] as char)
        .collect()
}

/// SHA-256 signature under which a token is stored.
pub fn signature(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}
