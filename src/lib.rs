//! Clipdrop - Ephemeral Text and File Sharing
//!
//! Stores short text snippets and small files under short, human-typable
//! identifiers. Every item expires after a fixed lifetime; clients are
//! throttled per operation class and blocked after repeated failures.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Clipdrop                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ Rate Limiter │───▶│ Abuse Guard  │───▶│ Object Store │       │
//! │  │  (per class) │    │ (deny/block) │    │ (TTL + ids)  │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          ▲                   ▲                   ▲              │
//! │          └───────────────────┴──── Reaper ───────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`clock`] - Time source port
//! - [`config`] - YAML configuration with defaults
//! - [`error`] - Error types
//! - [`guard`] - Rate limiting and abuse blocking
//! - [`metrics`] - Prometheus metrics
//! - [`reaper`] - Periodic eviction
//! - [`server`] - HTTP surface
//! - [`store`] - TTL-bounded object store and identifier generation

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod reaper;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use guard::{AbuseGuard, OperationClass, RateLimiter, Verdict};
pub use reaper::Reaper;
pub use store::{IdGenerator, ItemKind, ObjectStore, Payload};
