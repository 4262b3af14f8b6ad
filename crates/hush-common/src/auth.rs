//! Shared JWT claim types and low-level sign/verify.
//!
//! Claims and signature verification live here so both hush-api and
//! hush-gateway can validate tokens without circular dependencies. The
//! token authority (rotation, sessions, blacklist) lives in hush-auth.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

pub const TOKEN_KIND_ACCESS: &str = "access";
pub const TOKEN_KIND_REFRESH: &str = "refresh";

/// JWT claims embedded in access and refresh tokens.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject (user id as string)
    pub sub: String,
    /// Device the token is bound to
    pub device_id: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// Token kind ("access" or "refresh")
    pub token_type: String,
}

/// Sign claims with the given secret (HS256).
pub fn sign_claims(claims: &Claims, secret: &[u8]) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Verify and decode a token against one secret.
///
/// The algorithm list is pinned to HS256: `none` and asymmetric-algorithm
/// confusion are rejected by construction. Expiry is checked here;
/// blacklist and device liveness are the token authority's job.
pub fn decode_claims(token: &str, secret: &[u8]) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}

/// True when the decode error means "signature didn't match" rather than a
/// structural or expiry problem — the only case where trying the previous
/// rotation secret makes sense.
pub fn is_signature_mismatch(err: &jsonwebtoken::errors::Error) -> bool {
    matches!(
        err.kind(),
        jsonwebtoken::errors::ErrorKind::InvalidSignature
    )
}

/// True when the token parsed fine but is past its expiry.
pub fn is_expired(err: &jsonwebtoken::errors::Error) -> bool {
    matches!(err.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature)
}
