//! Prometheus Metrics
//!
//! All service metrics live on a private [`Registry`] so tests can build as
//! many instances as they like without clashing on the global registry.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::Result;
use crate::guard::{OperationClass, Rejection};
use crate::store::{ItemKind, SweepReport};

/// Service-wide metrics
pub struct ServiceMetrics {
    registry: Registry,
    items_stored: IntCounterVec,
    lookups: IntCounterVec,
    items_swept: IntCounter,
    sweep_failures: IntCounter,
    rate_limited: IntCounterVec,
    rejections: IntCounterVec,
    live_items: IntGauge,
    blocked_clients: IntGauge,
    tracked_clients: IntGauge,
}

impl ServiceMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let items_stored = IntCounterVec::new(
            Opts::new("clipdrop_items_stored_total", "Items stored, by kind"),
            &["kind"],
        )?;
        let lookups = IntCounterVec::new(
            Opts::new("clipdrop_lookups_total", "Item lookups, by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let items_swept = IntCounter::new(
            "clipdrop_items_swept_total",
            "Expired items removed by sweeps",
        )?;
        let sweep_failures = IntCounter::new(
            "clipdrop_sweep_release_failures_total",
            "Blob releases that failed during sweeps",
        )?;
        let rate_limited = IntCounterVec::new(
            Opts::new("clipdrop_rate_limited_total", "Requests denied by the rate limiter"),
            &["class"],
        )?;
        let rejections = IntCounterVec::new(
            Opts::new("clipdrop_rejections_total", "Requests rejected by the abuse guard"),
            &["reason"],
        )?;
        let live_items = IntGauge::new("clipdrop_items", "Items currently held in the store")?;
        let blocked_clients =
            IntGauge::new("clipdrop_blocked_clients", "Client identities in the blocked set")?;
        let tracked_clients = IntGauge::new(
            "clipdrop_tracked_clients",
            "Client identities with a failure record",
        )?;

        registry.register(Box::new(items_stored.clone()))?;
        registry.register(Box::new(lookups.clone()))?;
        registry.register(Box::new(items_swept.clone()))?;
        registry.register(Box::new(sweep_failures.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(live_items.clone()))?;
        registry.register(Box::new(blocked_clients.clone()))?;
        registry.register(Box::new(tracked_clients.clone()))?;

        Ok(Self {
            registry,
            items_stored,
            lookups,
            items_swept,
            sweep_failures,
            rate_limited,
            rejections,
            live_items,
            blocked_clients,
            tracked_clients,
        })
    }

    pub fn record_stored(&self, kind: ItemKind) {
        self.items_stored
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_lookup(&self, kind: ItemKind, found: bool) {
        let outcome = if found { "hit" } else { "miss" };
        self.lookups
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
    }

    pub fn record_sweep(&self, report: &SweepReport) {
        self.items_swept.inc_by(report.removed as u64);
        self.sweep_failures.inc_by(report.release_failures as u64);
    }

    pub fn record_rate_limited(&self, class: OperationClass) {
        self.rate_limited.with_label_values(&[class.as_str()]).inc();
    }

    pub fn record_rejection(&self, rejection: &Rejection) {
        self.rejections
            .with_label_values(&[rejection.label()])
            .inc();
    }

    pub fn set_live_items(&self, n: usize) {
        self.live_items.set(n as i64);
    }

    pub fn set_client_counts(&self, blocked: usize, tracked: usize) {
        self.blocked_clients.set(blocked as i64);
        self.tracked_clients.set(tracked as i64);
    }

    /// Content type of [`encode`](Self::encode) output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Render the text exposition format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

// =============================================================================
// Tests
// =============================================================================
