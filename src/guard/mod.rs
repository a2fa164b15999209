//! Request Guards
//!
//! Admission control in front of the object store.
//!
//! ```text
//! request ──▶ RateLimiter::check ──▶ AbuseGuard::validate_* ──▶ ObjectStore
//!                 (429)                    (400)
//! ```
//!
//! Each guard owns its own concurrent table; they never share state and never
//! hold locks on each other's data.

pub mod abuse;
pub mod rate_limit;
mod verdict;

pub use abuse::{AbuseConfig, AbuseGuard, AbuseRecord};
pub use rate_limit::{OperationClass, RateDecision, RateLimitConfig, RateLimiter, RateWindow};
pub use verdict::{Rejection, Verdict};
