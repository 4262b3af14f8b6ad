//! Token authority.
//!
//! Issues access (1 h) and refresh (30 d) HS256 bearer tokens, validates
//! them against the current and — during a bounded rotation window — the
//! previous signing secret, and drives revocation through the blacklist.
//!
//! Rotation is driven by the secret source (configuration): deploy with
//! `previous_jwt_secret` set to the old value and `jwt_secret` to the new
//! one; tokens signed with the old secret keep validating until the
//! acceptance window closes. Restarting re-derives the same state, so
//! rotation is durable.
//!
//! Blacklist reads fail CLOSED: if the store can't answer, the token is
//! rejected. (The rate limiter makes the opposite call.)

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use hush_common::auth::{
    Claims, TOKEN_KIND_ACCESS, TOKEN_KIND_REFRESH, decode_claims, is_expired,
    is_signature_mismatch, sign_claims,
};
use hush_common::config::AuthConfig;
use hush_common::crypto::{check_secret_strength, salted_token_hash, token_digest};
use hush_common::error::{HushError, HushResult};
use hush_common::ids;
use hush_common::models::session::TokenPair;
use hush_db::counter_store::CounterStore;
use hush_db::repository::{devices, sessions};

/// The validated identity a token proves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: Uuid,
    pub device_id: Uuid,
}

// ============================================================
// Key ring — pure dual-key sign/verify
// ============================================================

#[derive(Debug, PartialEq, Eq)]
pub enum VerifyFailure {
    Expired,
    Invalid,
}

/// Current + optional previous signing secret. Signing always uses
/// current; verification tries current first, then previous while its
/// acceptance window is open.
pub struct KeyRing {
    current: String,
    previous: Option<(String, DateTime<Utc>)>,
}

impl KeyRing {
    pub fn new(
        current: String,
        previous: Option<String>,
        previous_window_secs: u64,
    ) -> Result<Self, String> {
        check_secret_strength(&current)?;
        let previous = previous
            .map(|secret| {
                check_secret_strength(&secret)?;
                Ok::<_, String>((
                    secret,
                    Utc::now() + Duration::seconds(previous_window_secs as i64),
                ))
            })
            .transpose()?;
        Ok(Self { current, previous })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        sign_claims(claims, self.current.as_bytes())
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, VerifyFailure> {
        match decode_claims(token, self.current.as_bytes()) {
            Ok(claims) => return Ok(claims),
            Err(e) if is_expired(&e) => return Err(VerifyFailure::Expired),
            Err(e) if is_signature_mismatch(&e) => {
                // Fall through to the previous secret.
            }
            Err(_) => return Err(VerifyFailure::Invalid),
        }

        let Some((previous, retire_at)) = &self.previous else {
            return Err(VerifyFailure::Invalid);
        };
        if now >= *retire_at {
            return Err(VerifyFailure::Invalid);
        }
        match decode_claims(token, previous.as_bytes()) {
            Ok(claims) => Ok(claims),
            Err(e) if is_expired(&e) => Err(VerifyFailure::Expired),
            Err(_) => Err(VerifyFailure::Invalid),
        }
    }
}

// ============================================================
// Token authority
// ============================================================

pub struct TokenAuthority {
    keys: KeyRing,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
    pool: sqlx::AnyPool,
    store: CounterStore,
}

impl TokenAuthority {
    /// Construct from config. A weak secret is a hard error — callers are
    /// expected to abort startup.
    pub fn new(
        cfg: &AuthConfig,
        pool: sqlx::AnyPool,
        store: CounterStore,
    ) -> anyhow::Result<Self> {
        let keys = KeyRing::new(
            cfg.jwt_secret.clone(),
            cfg.previous_jwt_secret.clone(),
            cfg.previous_secret_window_secs,
        )
        .map_err(|reason| anyhow::anyhow!("refusing to start: {reason}"))?;

        Ok(Self {
            keys,
            access_ttl_secs: cfg.access_token_ttl_secs,
            refresh_ttl_secs: cfg.refresh_token_ttl_secs,
            pool,
            store,
        })
    }

    // ── Issuance ─────────────────────────────────────────────────────────

    /// Mint an access+refresh pair and record the session (salted hash +
    /// blacklist digest). Runs on the caller's connection so registration
    /// can bundle it into its transaction.
    pub async fn issue(
        &self,
        conn: &mut sqlx::AnyConnection,
        user_id: Uuid,
        device_id: Uuid,
    ) -> HushResult<TokenPair> {
        let now = Utc::now();
        let access_exp = now + Duration::seconds(self.access_ttl_secs as i64);
        let refresh_exp = now + Duration::seconds(self.refresh_ttl_secs as i64);

        let access = self
            .keys
            .sign(&Claims {
                sub: user_id.to_string(),
                device_id: device_id.to_string(),
                iat: now.timestamp(),
                exp: access_exp.timestamp(),
                token_type: TOKEN_KIND_ACCESS.into(),
            })
            .map_err(|e| HushError::Internal(e.into()))?;

        let refresh = self
            .keys
            .sign(&Claims {
                sub: user_id.to_string(),
                device_id: device_id.to_string(),
                iat: now.timestamp(),
                exp: refresh_exp.timestamp(),
                token_type: TOKEN_KIND_REFRESH.into(),
            })
            .map_err(|e| HushError::Internal(e.into()))?;

        sessions::insert_session(
            conn,
            ids::generate_id(),
            user_id,
            device_id,
            &salted_token_hash(&access),
            &token_digest(&access),
            access_exp,
        )
        .await?;

        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_in: self.access_ttl_secs,
            token_type: "Bearer".into(),
        })
    }

    // ── Validation ───────────────────────────────────────────────────────

    /// Validate an access token: signature (current then previous), expiry,
    /// kind, blacklist.
    pub async fn validate_access(&self, token: &str) -> HushResult<TokenIdentity> {
        let claims = self.verify_kind(token, TOKEN_KIND_ACCESS)?;
        self.check_blacklist(token).await?;
        parse_identity(&claims)
    }

    /// Validate a refresh token; additionally requires the bound device to
    /// still be active.
    pub async fn validate_refresh(&self, token: &str) -> HushResult<TokenIdentity> {
        let claims = self.verify_kind(token, TOKEN_KIND_REFRESH)?;
        self.check_blacklist(token).await?;
        let identity = parse_identity(&claims)?;

        let device = devices::find_for_user(&self.pool, identity.user_id, identity.device_id)
            .await?
            .ok_or(HushError::AuthInvalid)?;
        if !device.active {
            return Err(HushError::AuthInvalid);
        }
        Ok(identity)
    }

    fn verify_kind(&self, token: &str, kind: &str) -> HushResult<Claims> {
        let claims = match self.keys.verify(token, Utc::now()) {
            Ok(claims) => claims,
            Err(VerifyFailure::Expired) => return Err(HushError::AuthExpired),
            Err(VerifyFailure::Invalid) => return Err(HushError::AuthInvalid),
        };
        // An access token presented as refresh (or vice versa) is invalid.
        if claims.token_type != kind {
            return Err(HushError::AuthInvalid);
        }
        Ok(claims)
    }

    async fn check_blacklist(&self, token: &str) -> HushResult<()> {
        match self.store.is_blacklisted(&token_digest(token)).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(HushError::AuthInvalid),
            Err(e) => {
                // Fail closed: an unanswerable blacklist rejects the token.
                tracing::error!("Blacklist unavailable, rejecting token: {e}");
                Err(HushError::AuthInvalid)
            }
        }
    }

    // ── Revocation ───────────────────────────────────────────────────────

    /// Revoke every live session of a user and blacklist their access
    /// tokens for the remainder of each session's lifetime.
    pub async fn revoke_all_user_sessions(&self, user_id: Uuid) -> HushResult<usize> {
        let live = sessions::live_for_user(&self.pool, user_id).await?;
        sessions::revoke_for_user(&self.pool, user_id).await?;

        let now = Utc::now();
        for session in &live {
            let ttl = (session.expires_at - now).num_seconds().max(1) as u64;
            self.store
                .blacklist(&session.token_digest, "session revoked", ttl)
                .await?;
        }
        tracing::info!(user = %user_id, revoked = live.len(), "Revoked all user sessions");
        Ok(live.len())
    }

    /// Revoke the live sessions of one device (device removal path). Runs
    /// the DB side on the caller's transaction; the blacklist writes happen
    /// immediately (a blacklist entry for a session the transaction rolls
    /// back is harmless).
    pub async fn revoke_device_sessions(
        &self,
        conn: &mut sqlx::AnyConnection,
        device_id: Uuid,
    ) -> HushResult<usize> {
        let live = sessions::live_for_device(&self.pool, device_id).await?;
        sessions::revoke_for_device(conn, device_id).await?;

        let now = Utc::now();
        for session in &live {
            let ttl = (session.expires_at - now).num_seconds().max(1) as u64;
            self.store
                .blacklist(&session.token_digest, "device removed", ttl)
                .await?;
        }
        Ok(live.len())
    }
}

fn parse_identity(claims: &Claims) -> HushResult<TokenIdentity> {
    let user_id = claims.sub.parse().map_err(|_| HushError::AuthInvalid)?;
    let device_id = claims
        .device_id
        .parse()
        .map_err(|_| HushError::AuthInvalid)?;
    Ok(TokenIdentity { user_id, device_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_A: &str = "k9J#mP2$vL8@qR5^wN3&xB7*zD4!fG6%";
    const SECRET_B: &str = "Q1w2E3r4T5y6U7i8O9p0aSdFgHjKlZxC";

    fn claims(kind: &str, exp_offset_secs: i64) -> Claims {
        let now = Utc::now();
        Claims {
            sub: Uuid::now_v7().to_string(),
            device_id: Uuid::now_v7().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(exp_offset_secs)).timestamp(),
            token_type: kind.into(),
        }
    }

    #[test]
    fn weak_secrets_fail_construction() {
        assert!(KeyRing::new("short".into(), None, 3600).is_err());
        assert!(KeyRing::new("a".repeat(64), None, 3600).is_err());
        assert!(KeyRing::new(SECRET_A.into(), None, 3600).is_ok());
        // A weak previous secret is just as fatal.
        assert!(KeyRing::new(SECRET_A.into(), Some("weak".into()), 3600).is_err());
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let ring = KeyRing::new(SECRET_A.into(), None, 3600).unwrap();
        let token = ring.sign(&claims(TOKEN_KIND_ACCESS, 60)).unwrap();
        let verified = ring.verify(&token, Utc::now()).unwrap();
        assert_eq!(verified.token_type, TOKEN_KIND_ACCESS);
    }

    #[test]
    fn expired_tokens_report_expired() {
        let ring = KeyRing::new(SECRET_A.into(), None, 3600).unwrap();
        let token = ring.sign(&claims(TOKEN_KIND_ACCESS, -120)).unwrap();
        assert_eq!(
            ring.verify(&token, Utc::now()),
            Err(VerifyFailure::Expired)
        );
    }

    #[test]
    fn rotation_accepts_previous_within_window() {
        let old_ring = KeyRing::new(SECRET_A.into(), None, 3600).unwrap();
        let token = old_ring.sign(&claims(TOKEN_KIND_ACCESS, 3600)).unwrap();

        // Rotate: A becomes previous, B is current.
        let rotated = KeyRing::new(SECRET_B.into(), Some(SECRET_A.into()), 3600).unwrap();
        assert!(rotated.verify(&token, Utc::now()).is_ok());

        // Past the acceptance window the old signature is dead.
        let later = Utc::now() + Duration::seconds(7200);
        assert_eq!(
            rotated.verify(&token, later),
            Err(VerifyFailure::Invalid)
        );

        // New tokens are signed with current and survive the window close.
        let fresh = rotated.sign(&claims(TOKEN_KIND_ACCESS, 86400)).unwrap();
        assert!(rotated.verify(&fresh, later).is_ok());
    }

    #[test]
    fn unrelated_secret_never_verifies() {
        let ring_a = KeyRing::new(SECRET_A.into(), None, 3600).unwrap();
        let ring_b = KeyRing::new(SECRET_B.into(), None, 3600).unwrap();
        let token = ring_a.sign(&claims(TOKEN_KIND_ACCESS, 60)).unwrap();
        assert_eq!(
            ring_b.verify(&token, Utc::now()),
            Err(VerifyFailure::Invalid)
        );
    }

    #[test]
    fn tampered_tokens_are_invalid() {
        let ring = KeyRing::new(SECRET_A.into(), None, 3600).unwrap();
        let mut token = ring.sign(&claims(TOKEN_KIND_ACCESS, 60)).unwrap();
        token.push('x');
        assert_eq!(
            ring.verify(&token, Utc::now()),
            Err(VerifyFailure::Invalid)
        );
    }
}
