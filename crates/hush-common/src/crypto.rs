//! Server-side crypto helpers.
//!
//! The server deliberately performs NO message cryptography: no decryption,
//! no key derivation, no Signal handshake. This module contains only:
//!
//! - **Key material validation** — shape checks on uploaded public key blobs
//!   (base64 encoding, expected byte lengths for X25519 / Ed25519).
//! - **Token hashing** — the salted hash stored on sessions and the
//!   deterministic digest used as the blacklist key. Tokens are never stored
//!   in plaintext.
//! - **Signing-secret strength** — length and Shannon-entropy floor, checked
//!   at startup (fail fast on a weak secret).
//! - **Constant-time comparison** for verification and approval codes.
//! - **PIN format validation** — the PIN is hashed client-side with
//!   Argon2id; the server only checks the PHC string shape.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use sha2::{Digest, Sha256};

/// Byte length of an Ed25519 or X25519 public key.
const PUBLIC_KEY_LEN: usize = 32;
/// Byte length of an Ed25519 signature.
const SIGNATURE_LEN: usize = 64;

/// Minimum signing-secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;
/// Minimum Shannon entropy of the signing secret, in bits per character.
pub const MIN_SECRET_ENTROPY: f64 = 3.5;

// ============================================================
// Key material validation
// ============================================================

/// Error returned when uploaded key material fails validation.
#[derive(Debug, thiserror::Error)]
pub enum KeyMaterialError {
    #[error("{0} is not valid base64")]
    NotBase64(String),
    #[error("{label} has wrong length: expected {expected} bytes, got {actual}")]
    WrongLength {
        label: String,
        expected: usize,
        actual: usize,
    },
}

/// Validate that a string is base64 and decodes to exactly `expected_len` bytes.
pub fn validate_key_bytes(
    encoded: &str,
    expected_len: usize,
    label: &str,
) -> Result<Vec<u8>, KeyMaterialError> {
    let bytes = B64
        .decode(encoded)
        .map_err(|_| KeyMaterialError::NotBase64(label.to_owned()))?;
    if bytes.len() != expected_len {
        return Err(KeyMaterialError::WrongLength {
            label: label.to_owned(),
            expected: expected_len,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Validate an Ed25519 public identity key (32 bytes, base64).
pub fn validate_identity_key(encoded: &str) -> Result<Vec<u8>, KeyMaterialError> {
    validate_key_bytes(encoded, PUBLIC_KEY_LEN, "identity_key")
}

/// Validate an X25519 public key (signed pre-key, one-time pre-key, or
/// device key — all 32 bytes).
pub fn validate_public_key(encoded: &str, label: &str) -> Result<Vec<u8>, KeyMaterialError> {
    validate_key_bytes(encoded, PUBLIC_KEY_LEN, label)
}

/// Validate an Ed25519 signature (64 bytes, base64).
pub fn validate_prekey_signature(encoded: &str) -> Result<Vec<u8>, KeyMaterialError> {
    validate_key_bytes(encoded, SIGNATURE_LEN, "signed_pre_key_sig")
}

// ============================================================
// Token hashing
// ============================================================

/// Hash a bearer token with a fresh random salt. Stored on the session row;
/// format `"<salt_hex>$<digest_hex>"`.
pub fn salted_token_hash(token: &str) -> String {
    let salt: [u8; 16] = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(token.as_bytes());
    format!("{}${}", hex::encode(salt), hex::encode(hasher.finalize()))
}

/// Recompute a salted hash and compare against the stored value.
pub fn verify_salted_hash(token: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(token.as_bytes());
    constant_time_eq(&hex::encode(hasher.finalize()), digest_hex)
}

/// Deterministic SHA-256 digest of a token, hex-encoded. Used as the
/// blacklist key — revocation needs a lookup key derivable from the token
/// alone, which the salted hash deliberately is not.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

// ============================================================
// Signing-secret strength
// ============================================================

/// Shannon entropy of a string in bits per character.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0usize) += 1;
    }
    let len = s.chars().count() as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Check signing-secret strength: at least [`MIN_SECRET_LEN`] bytes and
/// [`MIN_SECRET_ENTROPY`] bits/char. A failing secret is a startup error.
pub fn check_secret_strength(secret: &str) -> Result<(), String> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(format!(
            "signing secret too short: {} bytes, need at least {MIN_SECRET_LEN}",
            secret.len()
        ));
    }
    let entropy = shannon_entropy(secret);
    if entropy < MIN_SECRET_ENTROPY {
        return Err(format!(
            "signing secret entropy too low: {entropy:.2} bits/char, need at least {MIN_SECRET_ENTROPY}"
        ));
    }
    Ok(())
}

// ============================================================
// Constant-time comparison
// ============================================================

/// Compare two strings without short-circuiting on the first mismatch.
/// Used for verification and approval codes.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ============================================================
// PIN format
// ============================================================

/// Validate a client-hashed PIN: must be a well-formed PHC string using
/// Argon2id. The server never hashes or verifies PINs itself.
pub fn validate_pin_hash(phc: &str) -> Result<(), String> {
    let parsed = password_hash::PasswordHash::new(phc)
        .map_err(|e| format!("malformed PIN hash: {e}"))?;
    if parsed.algorithm != argon2::ARGON2ID_IDENT {
        return Err(format!(
            "PIN must be hashed with argon2id, got '{}'",
            parsed.algorithm
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_length_is_enforced() {
        let ok = B64.encode([7u8; 32]);
        assert!(validate_identity_key(&ok).is_ok());

        let short = B64.encode([7u8; 31]);
        assert!(matches!(
            validate_identity_key(&short),
            Err(KeyMaterialError::WrongLength { .. })
        ));

        assert!(matches!(
            validate_public_key("not base64!!!", "signed_pre_key"),
            Err(KeyMaterialError::NotBase64(_))
        ));
    }

    #[test]
    fn salted_hashes_verify_and_differ() {
        let token = "eyJhbGciOiJIUzI1NiJ9.x.y";
        let h1 = salted_token_hash(token);
        let h2 = salted_token_hash(token);
        assert_ne!(h1, h2, "fresh salt per hash");
        assert!(verify_salted_hash(token, &h1));
        assert!(verify_salted_hash(token, &h2));
        assert!(!verify_salted_hash("other-token", &h1));
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(token_digest("abc"), token_digest("abc"));
        assert_ne!(token_digest("abc"), token_digest("abd"));
    }

    #[test]
    fn weak_secrets_are_rejected() {
        // Too short
        assert!(check_secret_strength("short").is_err());
        // Long enough but one repeated character — near-zero entropy
        assert!(check_secret_strength(&"a".repeat(64)).is_err());
        // Realistic random secret passes
        assert!(check_secret_strength("k9J#mP2$vL8@qR5^wN3&xB7*zD4!fG6%").is_ok());
    }

    #[test]
    fn code_compare_requires_exact_match() {
        assert!(constant_time_eq("654321", "654321"));
        assert!(!constant_time_eq("654321", "654322"));
        assert!(!constant_time_eq("654321", "65432"));
    }

    #[test]
    fn pin_must_be_argon2id_phc() {
        let good = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$qWk0GnFLCvMihK61GIypEckJjfHwgJwgvnZzMXAYDiE";
        assert!(validate_pin_hash(good).is_ok());

        let wrong_alg = "$argon2i$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$qWk0GnFLCvMihK61GIypEckJjfHwgJwgvnZzMXAYDiE";
        assert!(validate_pin_hash(wrong_alg).is_err());

        assert!(validate_pin_hash("123456").is_err());
    }
}
