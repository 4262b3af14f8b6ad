//! # hush-auth
//!
//! The session & device trust state machine: bearer-token issuance and
//! validation with dual-key rotation, phone verification codes, the device
//! registry, and the multi-device approval workflow.
//!
//! Everything here is a constructor-injected service — tests pass alternate
//! instances, nothing is process-global.

pub mod approval;
pub mod authority;
pub mod registry;
pub mod verification;

pub use authority::TokenAuthority;
pub use verification::VerificationService;
