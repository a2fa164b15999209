//! Fixed-Window Rate Limiter
//!
//! One counter per (client, operation class). A window lives for
//! `window_secs`; the first request after that starts a fresh window. Bursts
//! of up to twice the ceiling are possible across a window boundary.
//!
//! Denied requests still count, so hammering past the ceiling does not buy a
//! reset inside the same window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length in seconds
    pub window_secs: u64,
    /// Ceiling for write-class operations per window
    pub write_limit: u32,
    /// Ceiling for read-class operations per window
    pub read_limit: u32,
    /// Ceiling for everything else per window
    pub other_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            write_limit: 20,
            read_limit: 100,
            other_limit: 50,
        }
    }
}

/// Longest accepted window
pub const MAX_WINDOW_SECS: u64 = 24 * 60 * 60;

impl RateLimitConfig {
    /// Window length
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Window length on the calendar, or `None` past [`MAX_WINDOW_SECS`]
    pub fn window_delta(&self) -> Option<chrono::Duration> {
        if self.window_secs > MAX_WINDOW_SECS {
            return None;
        }
        chrono::Duration::try_seconds(i64::try_from(self.window_secs).ok()?)
    }

    /// Ceiling for `class`
    pub fn ceiling(&self, class: OperationClass) -> u32 {
        match class {
            OperationClass::Write => self.write_limit,
            OperationClass::Read => self.read_limit,
            OperationClass::Other => self.other_limit,
        }
    }
}

// =============================================================================
// Types
// =============================================================================

/// Operation class, each with its own ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Content submission
    Write,
    /// Content retrieval
    Read,
    /// Deletes, maintenance, anything else
    Other,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Write => "write",
            OperationClass::Read => "read",
            OperationClass::Other => "other",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter for one (client, class) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl RateWindow {
    fn start(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            window_start: now,
            last_seen: now,
        }
    }
}

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl RateDecision {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }

    /// Convert into the crate error taxonomy
    pub fn into_result(self, class: OperationClass) -> Result<()> {
        match self {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Denied { retry_after } => Err(Error::RateLimited { class, retry_after }),
        }
    }
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Per-client fixed-window rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    window: chrono::Duration,
    windows: DashMap<(String, OperationClass), RateWindow>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// An out-of-range window is clamped to [`MAX_WINDOW_SECS`]; configs
    /// loaded through `ServiceConfig::validate` never reach that path.
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let window = config.window_delta().unwrap_or_else(|| {
            warn!(
                window_secs = config.window_secs,
                "rate window out of range, clamping to {}s", MAX_WINDOW_SECS
            );
            chrono::Duration::seconds(MAX_WINDOW_SECS as i64)
        });
        Self {
            config,
            window,
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request and decide whether it may proceed
    pub fn check(&self, client: &str, class: OperationClass) -> RateDecision {
        let now = self.clock.now();
        let window = self.window;
        let ceiling = self.config.ceiling(class);

        match self.windows.entry((client.to_owned(), class)) {
            Entry::Vacant(slot) => {
                slot.insert(RateWindow::start(now));
                RateDecision::Allowed {
                    remaining: ceiling.saturating_sub(1),
                }
            }
            Entry::Occupied(mut slot) => {
                let state = slot.get_mut();
                state.last_seen = now;

                if now - state.window_start > window {
                    *state = RateWindow::start(now);
                    return RateDecision::Allowed {
                        remaining: ceiling.saturating_sub(1),
                    };
                }

                state.count = state.count.saturating_add(1);
                if state.count <= ceiling {
                    RateDecision::Allowed {
                        remaining: ceiling - state.count,
                    }
                } else {
                    let retry_after = (state.window_start + window - now)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    debug!(client, %class, count = state.count, "rate limit exceeded");
                    RateDecision::Denied { retry_after }
                }
            }
        }
    }

    /// Drop windows idle for more than twice the window length
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let horizon = self.window * 2;
        let mut evicted = 0;
        self.windows.retain(|_, state| {
            let keep = now - state.last_seen <= horizon;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Current window for a pair, if tracked
    pub fn window(&self, client: &str, class: OperationClass) -> Option<RateWindow> {
        self.windows
            .get(&(client.to_owned(), class))
            .map(|state| *state)
    }

    /// Tracked (client, class) pairs
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
