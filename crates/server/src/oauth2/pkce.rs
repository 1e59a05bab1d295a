//! Proof Key for Code Exchange (RFC 7636).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

pub const METHOD_S256: &str = "S256";
pub const METHOD_PLAIN: &str = "plain";

pub fn is_supported_method(method: &str) -> bool {
    method == METHOD_S256 || method == METHOD_PLAIN
}

/// Checks a `code_verifier` against the stored challenge.
pub fn verify(challenge: &str, method: &str, verifier: &str) -> bool {
    // RFC 7636 section 4.1
    if !(43..=128).contains(&verifier.len()) {
        return false;
    }
    match method {
        METHOD_S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())) == challenge,
        METHOD_PLAIN => verifier == challenge,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s256_matches_rfc_example() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mJ92K9qpgxDIz3Z5Jx6jT1X4jDvfaE";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert!(verify(challenge, METHOD_S256, verifier));
        assert!(!verify(challenge, METHOD_PLAIN, verifier));
    }

    #[test]
    fn rejects_short_verifier() {
        assert!(!verify("short", METHOD_PLAIN, "short"));
    }

    #[test]
    fn unknown_method_never_verifies() {
        let verifier = "a".repeat(43);
        assert!(!verify(&verifier, "S512", &verifier));
        assert!(!is_supported_method("S512"));
    }
}
