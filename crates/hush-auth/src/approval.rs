//! Multi-device approval workflow.
//!
//! State machine per request: pending → approved | denied | expired, with
//! a possession-proof gate in the middle. The 6-digit code is pushed to the
//! primary device over the realtime channel; the *new* device must POST it
//! back before the request becomes approvable, so a screen capture of the
//! approval prompt alone proves nothing.
//!
//! This service owns the state transitions; the caller (HTTP layer) pushes
//! the realtime frames it returns, because only the hub knows where
//! connections live.

use chrono::{Duration, Utc};
use rand::Rng;
use uuid::Uuid;

use hush_common::error::{HushError, HushResult};
use hush_common::ids;
use hush_common::models::approval::{
    APPROVAL_TTL_SECS, ApprovalRequest, ApprovalStatus, MAX_PENDING_PER_PHONE,
};
use hush_common::models::device::{Device, DeviceDescriptor};
use hush_common::validation::validate_phone;
use hush_db::repository::{approvals, devices, users};

/// Result of starting an approval: the stored request plus the primary
/// device the caller must push the `device_approval_request` frame to.
pub struct StartedApproval {
    pub request: ApprovalRequest,
    pub primary: Device,
    pub owner_id: Uuid,
}

/// Result of a decision: the request and, on approval, the device id the
/// caller notifies with `device_approved` / `device_denied`.
pub struct DecidedApproval {
    pub request: ApprovalRequest,
    pub new_device_id: Uuid,
}

pub struct ApprovalService {
    pool: sqlx::AnyPool,
}

impl ApprovalService {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    /// Open an approval request for a new device on an existing account.
    pub async fn start(
        &self,
        phone_number: &str,
        descriptor: &DeviceDescriptor,
        requester_ip: &str,
        requester_user_agent: &str,
    ) -> HushResult<StartedApproval> {
        validate_phone(phone_number)?;

        let user = users::find_by_phone(&self.pool, phone_number)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Account".into(),
            })?;

        if devices::find_for_user(&self.pool, user.id, descriptor.device_id)
            .await?
            .is_some_and(|d| d.active)
        {
            return Err(HushError::Conflict {
                resource: "Device".into(),
            });
        }

        let primary = devices::primary_device(&self.pool, user.id)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Primary device".into(),
            })?;

        // Cap concurrent pending requests; shed oldest first.
        let pending = approvals::pending_for_phone(&self.pool, phone_number).await?;
        let now = Utc::now();
        let mut live_pending = 0i64;
        for request in &pending {
            if request.is_expired(now) {
                approvals::mark_expired(&self.pool, request.id).await?;
            } else {
                live_pending += 1;
            }
        }
        if live_pending >= MAX_PENDING_PER_PHONE {
            let excess = live_pending - MAX_PENDING_PER_PHONE + 1;
            for request in pending.iter().filter(|r| !r.is_expired(now)).take(excess as usize) {
                approvals::mark_expired(&self.pool, request.id).await?;
                tracing::debug!(request = %request.id, "Expired oldest pending approval over cap");
            }
        }

        let request = approvals::insert(
            &self.pool,
            ids::generate_id(),
            phone_number,
            descriptor.device_id,
            &descriptor.device_name,
            descriptor.device_type,
            &descriptor.public_device_key,
            &generate_code(),
            requester_ip,
            requester_user_agent,
            now + Duration::seconds(APPROVAL_TTL_SECS),
        )
        .await?;

        tracing::info!(
            request = %request.id,
            user = %user.id,
            device = %descriptor.device_id,
            "Device approval requested"
        );

        Ok(StartedApproval {
            request,
            primary,
            owner_id: user.id,
        })
    }

    /// The new device proves possession of the code. Gate before
    /// approvability; constant-time compare like the verification service.
    pub async fn verify_possession(&self, request_id: Uuid, code: &str) -> HushResult<()> {
        let request = self.load_live(request_id).await?;

        if !hush_common::crypto::constant_time_eq(code, &request.code) {
            return Err(HushError::AuthInvalid);
        }

        approvals::mark_possession_verified(&self.pool, request_id).await?;
        tracing::info!(request = %request_id, "Approval possession verified");
        Ok(())
    }

    /// Poll a request's status (public endpoint — the new device has no
    /// token yet). Lazily expires stale requests.
    pub async fn status(&self, request_id: Uuid) -> HushResult<ApprovalRequest> {
        let request = approvals::find(&self.pool, request_id)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Approval request".into(),
            })?;

        if request.status == ApprovalStatus::Pending && request.is_expired(Utc::now()) {
            approvals::mark_expired(&self.pool, request.id).await?;
            return Ok(ApprovalRequest {
                status: ApprovalStatus::Expired,
                ..request
            });
        }
        Ok(request)
    }

    /// Pending, possession-verified requests for the approver's account.
    pub async fn pending_for_user(&self, user_phone: &str) -> HushResult<Vec<ApprovalRequest>> {
        let pending = approvals::pending_for_phone(&self.pool, user_phone).await?;
        let now = Utc::now();
        Ok(pending.into_iter().filter(|r| !r.is_expired(now)).collect())
    }

    /// Approve or deny. Caller has already authenticated the session; this
    /// re-checks that the acting device is the account's current primary
    /// inside the deciding transaction, so a racing primary reassignment
    /// cannot slip a stale approver through.
    pub async fn decide(
        &self,
        request_id: Uuid,
        acting_user: Uuid,
        acting_device: Uuid,
        approve: bool,
    ) -> HushResult<DecidedApproval> {
        let request = self.load_live(request_id).await?;

        let owner = users::find_by_phone(&self.pool, &request.phone_number)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Account".into(),
            })?;
        if owner.id != acting_user {
            return Err(HushError::Forbidden);
        }

        if approve && request.possession_verified_at.is_none() {
            return Err(HushError::InvalidInput {
                message: "New device has not proven possession of the code yet".into(),
            });
        }

        let mut tx = self.pool.begin().await?;

        // Primary check inside the transaction (see doc comment).
        let primary = devices::primary_device(&self.pool, owner.id)
            .await?
            .ok_or(HushError::AuthDeviceMismatch)?;
        if primary.id != acting_device {
            return Err(HushError::AuthDeviceMismatch);
        }

        let status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };
        let decided = approvals::decide(&mut *tx, request_id, status, Some(acting_device)).await?;
        if !decided {
            // Someone else decided first.
            return Err(HushError::Conflict {
                resource: "Approval decision".into(),
            });
        }
        tx.commit().await?;

        tracing::info!(
            request = %request_id,
            approver = %acting_device,
            approved = approve,
            "Device approval decided"
        );

        let new_device_id = request.device_id;
        Ok(DecidedApproval {
            request: ApprovalRequest {
                status,
                approver_device_id: Some(acting_device),
                ..request
            },
            new_device_id,
        })
    }

    /// Load a request that is still pending and unexpired, expiring it
    /// lazily when the clock has run out.
    async fn load_live(&self, request_id: Uuid) -> HushResult<ApprovalRequest> {
        let request = approvals::find(&self.pool, request_id)
            .await?
            .ok_or(HushError::NotFound {
                resource: "Approval request".into(),
            })?;

        if request.status.is_terminal() {
            return Err(HushError::Conflict {
                resource: "Approval decision".into(),
            });
        }
        if request.is_expired(Utc::now()) {
            approvals::mark_expired(&self.pool, request_id).await?;
            return Err(HushError::AuthInvalid);
        }
        Ok(request)
    }
}

fn generate_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}
