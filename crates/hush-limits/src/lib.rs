//! # hush-limits
//!
//! The distributed rate-limit and abuse-control engine: four stacked
//! sliding-window scopes over the shared counter store, and an abuse
//! detector that escalates offenders into the penalty box and strict mode.

pub mod abuse;
pub mod limiter;

pub use abuse::{AbuseDetector, AbuseLevel};
pub use limiter::{Decision, Denial, EndpointClass, RateLimiter};
