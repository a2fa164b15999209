//! Abuse Guard
//!
//! Tracks failures per client identity and blocks clients that keep failing.
//!
//! ```text
//! Unknown ──failure──▶ Tracked (1..=20) ──21st failure──▶ Blocked (terminal)
//! ```
//!
//! Blocking is one-way for the lifetime of the process. Stale failure
//! records are evicted by the reaper; the blocked set is never evicted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::verdict::{Rejection, Verdict};
use crate::clock::Clock;
use crate::store::ItemKind;

/// Content patterns rejected on submission (matched case-insensitively)
pub const DEFAULT_DENIED_PATTERNS: &[&str] = &[
    "<script",
    "</script",
    "<iframe",
    "javascript:",
    "vbscript:",
    "data:text/html",
    ";base64,",
    "onerror=",
    "onload=",
    "../",
    "..\\",
];

/// File extensions rejected on upload
pub const DEFAULT_DENIED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "pif", "msi", "dll", "vbs", "vbe", "js", "jse", "jar",
    "ps1", "psm1", "sh", "wsf", "hta", "cpl", "reg", "lnk",
];

// =============================================================================
// Configuration
// =============================================================================

/// Abuse guard configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseConfig {
    /// Failures tolerated before a client is blocked
    pub block_threshold: u32,
    /// Failures tolerated by the lookup path before a client is blocked
    pub access_threshold: u32,
    /// Maximum text content length in bytes
    pub max_content_bytes: usize,
    /// Idle time after which a failure record is forgotten, in seconds
    pub record_ttl_secs: u64,
    /// Content deny rules
    pub denied_patterns: Vec<String>,
    /// File extension deny rules
    pub denied_extensions: Vec<String>,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            block_threshold: 20,
            access_threshold: 50,
            max_content_bytes: 1024 * 1024,
            record_ttl_secs: 60 * 60,
            denied_patterns: DEFAULT_DENIED_PATTERNS.iter().map(|s| s.to_string()).collect(),
            denied_extensions: DEFAULT_DENIED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Longest accepted failure-record idle time
pub const MAX_RECORD_TTL_SECS: u64 = 30 * 24 * 60 * 60;

impl AbuseConfig {
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    /// Record idle time on the calendar, or `None` past [`MAX_RECORD_TTL_SECS`]
    pub fn record_ttl_delta(&self) -> Option<chrono::Duration> {
        if self.record_ttl_secs > MAX_RECORD_TTL_SECS {
            return None;
        }
        chrono::Duration::try_seconds(i64::try_from(self.record_ttl_secs).ok()?)
    }
}

// =============================================================================
// Abuse Record
// =============================================================================

/// Failure history of one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbuseRecord {
    pub failure_count: u32,
    pub last_failure_at: DateTime<Utc>,
    /// Diagnostic only
    pub last_reason: String,
}

// =============================================================================
// Abuse Guard
// =============================================================================

/// Failure accounting, blocking and static deny rules
pub struct AbuseGuard {
    config: AbuseConfig,
    denied_patterns: Vec<String>,
    denied_extensions: Vec<String>,
    record_ttl: chrono::Duration,
    records: DashMap<String, AbuseRecord>,
    blocked: DashSet<String>,
    clock: Arc<dyn Clock>,
}

impl AbuseGuard {
    pub fn new(config: AbuseConfig, clock: Arc<dyn Clock>) -> Self {
        let denied_patterns = config
            .denied_patterns
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        let denied_extensions = config
            .denied_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        let record_ttl = config.record_ttl_delta().unwrap_or_else(|| {
            warn!(
                record_ttl_secs = config.record_ttl_secs,
                "abuse record TTL out of range, clamping to {}s", MAX_RECORD_TTL_SECS
            );
            chrono::Duration::seconds(MAX_RECORD_TTL_SECS as i64)
        });
        Self {
            config,
            denied_patterns,
            denied_extensions,
            record_ttl,
            records: DashMap::new(),
            blocked: DashSet::new(),
            clock,
        }
    }

    pub fn config(&self) -> &AbuseConfig {
        &self.config
    }

    /// Screen submitted text. Every rejection counts as a failure.
    pub fn validate_content(&self, client: &str, content: &str) -> Verdict {
        let rejection = if self.is_blocked(client) {
            Some(Rejection::Blocked)
        } else if content.len() > self.config.max_content_bytes {
            Some(Rejection::TooLarge {
                size: content.len(),
                max: self.config.max_content_bytes,
            })
        } else {
            self.denied_pattern_in(content)
                .map(|pattern| Rejection::DeniedPattern(pattern.to_string()))
        };

        match rejection {
            None => Verdict::Pass,
            Some(rejection) => {
                self.record_failure(client, &rejection.to_string());
                Verdict::Reject(rejection)
            }
        }
    }

    /// Screen upload metadata. Not tied to a client, records nothing.
    pub fn validate_file_metadata(&self, file_name: &str, content_type: &str) -> Verdict {
        let name = file_name.trim();
        if name.is_empty() {
            return Verdict::Reject(Rejection::EmptyFileName);
        }

        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        if let Some((_, ext)) = base.rsplit_once('.') {
            let ext = ext.to_lowercase();
            if self.denied_extensions.iter().any(|denied| *denied == ext) {
                debug!(file_name, content_type, "rejected file extension");
                return Verdict::Reject(Rejection::DeniedExtension(ext));
            }
        }
        Verdict::Pass
    }

    /// Gate a lookup. Blocks clients past the lookup-failure threshold.
    pub fn validate_access(&self, client: &str) -> Verdict {
        if self.is_blocked(client) {
            return Verdict::Reject(Rejection::Blocked);
        }

        let failures = self.failure_count(client);
        if failures > self.config.access_threshold {
            self.block(client, failures, "lookup failure threshold exceeded");
            return Verdict::Reject(Rejection::TooManyFailures { failures });
        }
        Verdict::Pass
    }

    /// Count one failure against `client`, blocking past the threshold
    pub fn record_failure(&self, client: &str, reason: &str) {
        let now = self.clock.now();
        let failures = {
            let mut record = self
                .records
                .entry(client.to_owned())
                .or_insert_with(|| AbuseRecord {
                    failure_count: 0,
                    last_failure_at: now,
                    last_reason: String::new(),
                });
            record.failure_count = record.failure_count.saturating_add(1);
            record.last_failure_at = now;
            record.last_reason = reason.to_owned();
            record.failure_count
        };

        debug!(client, failures, reason, "recorded failure");

        if failures > self.config.block_threshold {
            self.block(client, failures, reason);
        }
    }

    /// Note an item lookup. A failed lookup counts as a failure.
    pub fn log_access(&self, client: &str, id: &str, kind: ItemKind, success: bool) {
        debug!(client, id, %kind, success, "item access");
        if !success {
            self.record_failure(client, &format!("failed {} lookup for id {}", kind, id));
        }
    }

    /// Drop failure records idle past the record TTL. Blocks are kept.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let horizon = self.record_ttl;
        let mut evicted = 0;
        self.records.retain(|_, record| {
            let keep = now - record.last_failure_at <= horizon;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn is_blocked(&self, client: &str) -> bool {
        self.blocked.contains(client)
    }

    pub fn failure_count(&self, client: &str) -> u32 {
        self.records
            .get(client)
            .map(|record| record.failure_count)
            .unwrap_or(0)
    }

    /// Snapshot of a client's failure history
    pub fn record(&self, client: &str) -> Option<AbuseRecord> {
        self.records.get(client).map(|record| record.clone())
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }

    fn block(&self, client: &str, failures: u32, reason: &str) {
        if self.blocked.insert(client.to_owned()) {
            warn!(client, failures, reason, "client blocked");
        }
    }

    fn denied_pattern_in(&self, content: &str) -> Option<&str> {
        let lowered = content.to_lowercase();
        self.denied_patterns
            .iter()
            .find(|pattern| lowered.contains(pattern.as_str()))
            .map(String::as_str)
    }
}

// =============================================================================
// Tests
// =============================================================================
