//! Phone verification service.
//!
//! Codes are 6 decimal digits from the OS CSPRNG, live five minutes, and
//! are consumed exactly once — inside the transaction that creates the
//! user (registration) or the session (login), so a rollback leaves the
//! code unconsumed.

use chrono::{Duration, Utc};
use rand::Rng;

use hush_common::config::RunMode;
use hush_common::crypto::constant_time_eq;
use hush_common::error::{HushError, HushResult};
use hush_common::ids;
use hush_common::models::verification::{CODE_TTL_SECS, MAX_ATTEMPTS};
use hush_common::validation::validate_phone;
use hush_db::repository::verification;
use hush_db::sms::SmsSender;

/// Outcome of a request-code call. `dev_echo` carries the code back to the
/// HTTP layer in development mode only.
#[derive(Debug)]
pub struct CodeDispatch {
    pub dev_echo: Option<String>,
}

#[derive(Clone)]
pub struct VerificationService {
    pool: sqlx::AnyPool,
    sms: SmsSender,
    mode: RunMode,
}

impl VerificationService {
    pub fn new(pool: sqlx::AnyPool, sms: SmsSender, mode: RunMode) -> Self {
        Self { pool, sms, mode }
    }

    /// Generate, store, and dispatch a fresh code, superseding any prior
    /// active code for the phone.
    pub async fn request_code(&self, phone: &str) -> HushResult<CodeDispatch> {
        validate_phone(phone)?;

        let code = generate_code();
        let expires_at = Utc::now() + Duration::seconds(CODE_TTL_SECS);
        verification::upsert_code(&self.pool, ids::generate_id(), phone, &code, expires_at)
            .await?;

        if let Err(e) = self.sms.send_verification_code(phone, &code).await {
            if self.mode.is_production() {
                tracing::error!(phone = %phone, "SMS dispatch failed: {e}");
                return Err(HushError::UpstreamUnavailable {
                    service: "sms".into(),
                });
            }
            tracing::warn!(phone = %phone, "SMS dispatch failed (dev, absorbed): {e}");
        }

        let dev_echo = match self.mode {
            RunMode::Development => Some(code),
            RunMode::Production => None,
        };
        Ok(CodeDispatch { dev_echo })
    }

    /// Non-consuming pre-validation: constant-time compare against the
    /// active code, respecting expiry and the attempt budget.
    pub async fn check_code(&self, phone: &str, code: &str) -> HushResult<()> {
        let record = verification::find_unverified(&self.pool, phone)
            .await?
            .ok_or(HushError::AuthInvalid)?;

        if record.expires_at <= Utc::now() {
            return Err(HushError::AuthInvalid);
        }
        if record.attempts >= MAX_ATTEMPTS {
            return Err(HushError::AuthInvalid);
        }

        if !constant_time_eq(code, &record.code) {
            let attempts = verification::increment_attempts(&self.pool, phone).await?;
            if attempts >= MAX_ATTEMPTS {
                tracing::warn!(phone = %phone, "Verification code burned after {attempts} failed attempts");
                verification::invalidate(&self.pool, phone).await?;
            }
            return Err(HushError::AuthInvalid);
        }
        Ok(())
    }

    /// Consuming variant, run on the caller's transaction. The UPDATE
    /// re-checks "unverified and unexpired", so two racing registrations
    /// can't both consume the code.
    pub async fn verify_code(
        &self,
        conn: &mut sqlx::AnyConnection,
        phone: &str,
        code: &str,
    ) -> HushResult<()> {
        self.check_code(phone, code).await?;
        if !verification::consume(conn, phone).await? {
            return Err(HushError::AuthInvalid);
        }
        Ok(())
    }
}

/// Six decimal digits, leading zeros allowed.
fn generate_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..256 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
