//! Device registry — account registration, login admission, primary
//! reassignment, device removal, account deletion.
//!
//! Every multi-row write here is one transaction: register is
//! user + consumed code + device + session, device removal is
//! revoked sessions + deactivation. Token blacklisting happens alongside
//! (an extra blacklist entry for a rolled-back transaction is harmless;
//! the reverse would not be).

use uuid::Uuid;

use hush_common::error::{HushError, HushResult};
use hush_common::models::device::{Device, DeviceDescriptor};
use hush_common::models::session::TokenPair;
use hush_common::models::user::User;
use hush_db::Database;
use hush_db::repository::{approvals, devices, users, verification};

use crate::authority::TokenAuthority;
use crate::verification::VerificationService;

pub struct RegisterInput {
    pub phone_number: String,
    pub code: String,
    pub username: String,
    pub display_name: Option<String>,
    pub identity_key: String,
    pub signed_pre_key: String,
    pub signed_pre_key_sig: String,
    pub device: DeviceDescriptor,
}

pub struct DeviceRegistry {
    db: Database,
}

impl DeviceRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Atomic account creation: consume the code, create the user, register
    /// the first device as primary, store the pre-key set, mint a session.
    pub async fn register_account(
        &self,
        verification_service: &VerificationService,
        authority: &TokenAuthority,
        input: RegisterInput,
    ) -> HushResult<(User, Device, TokenPair)> {
        if users::find_by_phone(&self.db.pool, &input.phone_number)
            .await?
            .is_some()
        {
            return Err(HushError::Conflict {
                resource: "Account".into(),
            });
        }
        if users::find_by_username(&self.db.pool, &input.username)
            .await?
            .is_some()
        {
            return Err(HushError::Conflict {
                resource: "Username".into(),
            });
        }

        let mut tx = self.db.pool.begin().await?;

        verification_service
            .verify_code(&mut *tx, &input.phone_number, &input.code)
            .await?;

        let user = users::create_user(
            &mut *tx,
            hush_common::ids::generate_id(),
            &input.phone_number,
            &input.username,
            input.display_name.as_deref(),
        )
        .await?;

        // First device of the account is primary by definition.
        let device = devices::insert_device(
            &mut *tx,
            input.device.device_id,
            user.id,
            &input.device.device_name,
            input.device.device_type,
            &input.device.public_device_key,
            true,
        )
        .await?;

        hush_db::repository::prekeys::upsert_set(
            &mut *tx,
            user.id,
            &input.identity_key,
            &input.signed_pre_key,
            &input.signed_pre_key_sig,
        )
        .await?;

        let tokens = authority.issue(&mut *tx, user.id, device.id).await?;

        tx.commit().await?;

        tracing::info!(user = %user.id, device = %device.id, "Account registered");
        Ok((user, device, tokens))
    }

    /// Admit a device to an existing account and mint a session.
    ///
    /// Three ways in:
    /// 1. the device is already registered and active,
    /// 2. the device holds an approved, unexpired approval request
    ///    (registered here on first login),
    /// 3. the account has no active devices at all and the phone was just
    ///    verified — the recovery path; the device becomes primary.
    pub async fn login(
        &self,
        authority: &TokenAuthority,
        phone_number: &str,
        descriptor: &DeviceDescriptor,
    ) -> HushResult<(User, Device, TokenPair)> {
        let user = users::find_by_phone(&self.db.pool, phone_number)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Account".into(),
            })?;

        if let Some(device) =
            devices::find_for_user(&self.db.pool, user.id, descriptor.device_id).await?
        {
            if !device.active {
                return Err(HushError::Forbidden);
            }
            let mut tx = self.db.pool.begin().await?;
            let tokens = authority.issue(&mut *tx, user.id, device.id).await?;
            tx.commit().await?;
            devices::touch_last_seen(&self.db.pool, device.id).await?;
            tracing::info!(user = %user.id, device = %device.id, "Login on known device");
            return Ok((user, device, tokens));
        }

        let active = devices::count_devices(&self.db.pool, user.id).await?;

        let is_primary = if active == 0 {
            // Recovery: no devices left. Requires a fresh phone verification.
            if !verification::recently_verified(&self.db.pool, phone_number).await? {
                return Err(HushError::Forbidden);
            }
            true
        } else {
            // Normal nth-device path: must have been approved by the primary.
            let approved =
                approvals::approved_for_device(&self.db.pool, phone_number, descriptor.device_id)
                    .await?;
            if approved.is_none() {
                return Err(HushError::Forbidden);
            }
            false
        };

        let mut tx = self.db.pool.begin().await?;
        let device = devices::insert_device(
            &mut *tx,
            descriptor.device_id,
            user.id,
            &descriptor.device_name,
            descriptor.device_type,
            &descriptor.public_device_key,
            is_primary,
        )
        .await?;
        let tokens = authority.issue(&mut *tx, user.id, device.id).await?;
        tx.commit().await?;

        tracing::info!(user = %user.id, device = %device.id, primary = is_primary, "New device logged in");
        Ok((user, device, tokens))
    }

    /// Mint a fresh pair for a validated refresh token.
    pub async fn refresh(
        &self,
        authority: &TokenAuthority,
        user_id: Uuid,
        device_id: Uuid,
    ) -> HushResult<TokenPair> {
        let mut tx = self.db.pool.begin().await?;
        let tokens = authority.issue(&mut *tx, user_id, device_id).await?;
        tx.commit().await?;
        Ok(tokens)
    }

    /// Move the primary flag. Only the current primary may call this; the
    /// transaction re-checks so a concurrent reassignment can't fork two
    /// primaries.
    pub async fn reassign_primary(
        &self,
        user_id: Uuid,
        acting_device: Uuid,
        new_primary: Uuid,
    ) -> HushResult<()> {
        let current = devices::primary_device(&self.db.pool, user_id)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Primary device".into(),
            })?;
        if current.id != acting_device {
            return Err(HushError::AuthDeviceMismatch);
        }
        if current.id == new_primary {
            return Ok(());
        }

        let target = devices::find_for_user(&self.db.pool, user_id, new_primary)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Device".into(),
            })?;
        if !target.active {
            return Err(HushError::InvalidInput {
                message: "Cannot promote an inactive device".into(),
            });
        }

        let mut tx = self.db.pool.begin().await?;
        devices::reassign_primary(&mut *tx, user_id, new_primary).await?;
        tx.commit().await?;

        tracing::info!(user = %user_id, new_primary = %new_primary, "Primary device reassigned");
        Ok(())
    }

    /// Soft-delete a device: revoke + blacklist its sessions, mark it
    /// inactive. Refused for the primary — designate a replacement first.
    pub async fn remove_device(
        &self,
        authority: &TokenAuthority,
        user_id: Uuid,
        device_id: Uuid,
    ) -> HushResult<Device> {
        let device = devices::find_for_user(&self.db.pool, user_id, device_id)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Device".into(),
            })?;
        if device.is_primary {
            return Err(HushError::InvalidInput {
                message: "Designate another primary device before removing this one".into(),
            });
        }

        let mut tx = self.db.pool.begin().await?;
        authority.revoke_device_sessions(&mut *tx, device_id).await?;
        devices::deactivate(&mut *tx, device_id).await?;
        tx.commit().await?;

        tracing::info!(user = %user_id, device = %device_id, "Device removed");
        Ok(device)
    }

    /// Full account deletion cascade. The caller additionally purges the
    /// offline queue and presence key and closes live connections.
    pub async fn delete_account(
        &self,
        authority: &TokenAuthority,
        user: &User,
    ) -> HushResult<()> {
        authority.revoke_all_user_sessions(user.id).await?;

        let mut tx = self.db.pool.begin().await?;
        users::delete_user_cascade(&mut *tx, user.id, &user.phone_number).await?;
        tx.commit().await?;

        tracing::info!(user = %user.id, "Account deleted");
        Ok(())
    }
}

/// Shared guard: the header-named device must be the caller's primary.
pub async fn require_primary(
    pool: &sqlx::AnyPool,
    user_id: Uuid,
    claimed_device: Uuid,
) -> HushResult<Device> {
    let primary = devices::primary_device(pool, user_id)
        .await?
        .ok_or(HushError::AuthDeviceMismatch)?;
    if primary.id != claimed_device {
        return Err(HushError::AuthDeviceMismatch);
    }
    Ok(primary)
}
