//! Reaper - Periodic Eviction
//!
//! Background jobs that bound memory growth from abandoned state:
//!
//! | Job            | Default period | Evicts                                  |
//! |----------------|----------------|-----------------------------------------|
//! | store sweep    | 60s            | items with `expires_at <= now`          |
//! | rate windows   | 60s            | windows idle for 2x the window length   |
//! | abuse records  | 300s           | failure records idle past their TTL     |
//!
//! Each job is single-flight: a tick that finds the previous run of the same
//! job still in progress is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::guard::{AbuseGuard, RateLimiter};
use crate::metrics::ServiceMetrics;
use crate::store::{ObjectStore, SweepReport};

// =============================================================================
// Configuration
// =============================================================================

/// Reaper configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Store sweep period in seconds
    pub store_sweep_secs: u64,
    /// Rate window eviction period in seconds
    pub rate_window_secs: u64,
    /// Abuse record eviction period in seconds
    pub abuse_record_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            store_sweep_secs: 60,
            rate_window_secs: 60,
            abuse_record_secs: 300,
        }
    }
}

impl ReaperConfig {
    /// Period for `job`
    pub fn period(&self, job: ReaperJob) -> Duration {
        let secs = match job {
            ReaperJob::StoreSweep => self.store_sweep_secs,
            ReaperJob::RateWindows => self.rate_window_secs,
            ReaperJob::AbuseRecords => self.abuse_record_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Independent reaper jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperJob {
    StoreSweep,
    RateWindows,
    AbuseRecords,
}

impl ReaperJob {
    pub const ALL: [ReaperJob; 3] = [
        ReaperJob::StoreSweep,
        ReaperJob::RateWindows,
        ReaperJob::AbuseRecords,
    ];
}

impl std::fmt::Display for ReaperJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaperJob::StoreSweep => write!(f, "store-sweep"),
            ReaperJob::RateWindows => write!(f, "rate-windows"),
            ReaperJob::AbuseRecords => write!(f, "abuse-records"),
        }
    }
}

/// Single-flight latch
#[derive(Debug, Default)]
struct Flight(AtomicBool);

impl Flight {
    fn try_enter(&self) -> Option<FlightGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| FlightGuard(&self.0))
    }
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What one tick of every job removed. `None` means the job was skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub store: Option<SweepReport>,
    pub rate_windows: Option<usize>,
    pub abuse_records: Option<usize>,
}

// =============================================================================
// Reaper
// =============================================================================

/// Periodic eviction across store, rate limiter and abuse guard
pub struct Reaper {
    config: ReaperConfig,
    store: Arc<ObjectStore>,
    limiter: Arc<RateLimiter>,
    guard: Arc<AbuseGuard>,
    metrics: Arc<ServiceMetrics>,
    clock: Arc<dyn Clock>,
    store_flight: Flight,
    rate_flight: Flight,
    abuse_flight: Flight,
}

impl Reaper {
    pub fn new(
        config: ReaperConfig,
        store: Arc<ObjectStore>,
        limiter: Arc<RateLimiter>,
        guard: Arc<AbuseGuard>,
        metrics: Arc<ServiceMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            limiter,
            guard,
            metrics,
            clock,
            store_flight: Flight::default(),
            rate_flight: Flight::default(),
            abuse_flight: Flight::default(),
        })
    }

    /// Run every job once at `now`
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        TickReport {
            store: self.sweep_store(now),
            rate_windows: self.evict_rate_windows(now),
            abuse_records: self.evict_abuse_records(now),
        }
    }

    /// Sweep expired items. `None` if a sweep is already running.
    pub fn sweep_store(&self, now: DateTime<Utc>) -> Option<SweepReport> {
        let Some(_flight) = self.store_flight.try_enter() else {
            debug!("store sweep already running, skipping tick");
            return None;
        };

        let report = self.store.sweep_report(now);
        self.metrics.record_sweep(&report);
        self.metrics.set_live_items(self.store.len());
        if report.removed > 0 {
            info!(
                removed = report.removed,
                release_failures = report.release_failures,
                "swept expired items"
            );
        }
        Some(report)
    }

    /// Evict idle rate windows. `None` if already running.
    pub fn evict_rate_windows(&self, now: DateTime<Utc>) -> Option<usize> {
        let _flight = self.rate_flight.try_enter()?;
        let evicted = self.limiter.evict_stale(now);
        if evicted > 0 {
            debug!(evicted, "evicted idle rate windows");
        }
        Some(evicted)
    }

    /// Evict stale abuse records. `None` if already running.
    pub fn evict_abuse_records(&self, now: DateTime<Utc>) -> Option<usize> {
        let _flight = self.abuse_flight.try_enter()?;
        let evicted = self.guard.evict_stale(now);
        self.metrics
            .set_client_counts(self.guard.blocked_count(), self.guard.tracked_count());
        if evicted > 0 {
            debug!(evicted, "evicted stale abuse records");
        }
        Some(evicted)
    }

    /// Run all jobs on their periods until `shutdown` fires
    #[instrument(skip(self, shutdown))]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Starting reaper with {:?}", self.config);

        let handles: Vec<_> = ReaperJob::ALL
            .into_iter()
            .map(|job| tokio::spawn(Arc::clone(&self).run_job(job, shutdown.clone())))
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Reaper job panicked: {}", e);
            }
        }

        info!("Reaper shut down");
    }

    async fn run_job(self: Arc<Self>, job: ReaperJob, shutdown: CancellationToken) {
        let mut tick = interval(self.config.period(job));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(%job, "reaper job stopping");
                    break;
                }
                _ = tick.tick() => {
                    let now = self.clock.now();
                    match job {
                        // Blob release may touch the filesystem
                        ReaperJob::StoreSweep => {
                            let reaper = Arc::clone(&self);
                            if let Err(e) =
                                tokio::task::spawn_blocking(move || reaper.sweep_store(now)).await
                            {
                                error!("Store sweep task failed: {}", e);
                            }
                        }
                        ReaperJob::RateWindows => {
                            self.evict_rate_windows(now);
                        }
                        ReaperJob::AbuseRecords => {
                            self.evict_abuse_records(now);
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::guard::{AbuseConfig, OperationClass, RateLimitConfig};
    use crate::store::{InMemoryBlobStore, Payload};

    struct Fixture {
        reaper: Arc<Reaper>,
        store: Arc<ObjectStore>,
        limiter: Arc<RateLimiter>,
        guard: Arc<AbuseGuard>,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: ReaperConfig) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(ObjectStore::new(
            Arc::new(InMemoryBlobStore::new()),
            clock.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone()));
        let guard = Arc::new(AbuseGuard::new(AbuseConfig::default(), clock.clone()));
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        let reaper = Reaper::new(
            config,
            store.clone(),
            limiter.clone(),
            guard.clone(),
            metrics,
            clock.clone(),
        );
        Fixture {
            reaper,
            store,
            limiter,
            guard,
            clock,
        }
    }

    #[test]
    fn test_config_default() {
        let config = ReaperConfig::default();
        assert_eq!(config.period(ReaperJob::StoreSweep), Duration::from_secs(60));
        assert_eq!(config.period(ReaperJob::RateWindows), Duration::from_secs(60));
        assert_eq!(config.period(ReaperJob::AbuseRecords), Duration::from_secs(300));
    }

    #[test]
    fn test_tick_evicts_across_components() {
        let f = fixture(ReaperConfig::default());
        f.store
            .put(Payload::Text("gone".into()), Duration::from_secs(10))
            .unwrap();
        let kept = f
            .store
            .put(Payload::Text("kept".into()), Duration::from_secs(7200))
            .unwrap();
        let _ = f.limiter.check("1.1.1.1", OperationClass::Read);
        f.guard.record_failure("2.2.2.2", "scan");

        f.clock.advance(chrono::Duration::seconds(3601));
        let report = f.reaper.tick(f.clock.now());

        assert_eq!(report.store.unwrap().removed, 1);
        assert_eq!(report.rate_windows, Some(1));
        assert_eq!(report.abuse_records, Some(1));
        assert!(f.store.get(&kept).is_ok());
        assert_eq!(f.limiter.tracked(), 0);
        assert_eq!(f.guard.tracked_count(), 0);
    }

    #[test]
    fn test_single_flight_skips_overlapping_tick() {
        let f = fixture(ReaperConfig::default());

        let held = f.reaper.store_flight.try_enter();
        assert!(held.is_some());
        assert_eq!(f.reaper.sweep_store(f.clock.now()), None);

        drop(held);
        assert!(f.reaper.sweep_store(f.clock.now()).is_some());
    }

    #[tokio::test]
    async fn test_run_sweeps_on_first_tick_and_stops() {
        let f = fixture(ReaperConfig::default());
        let id = f
            .store
            .put(Payload::Text("short".into()), Duration::from_secs(5))
            .unwrap();
        f.clock.advance(chrono::Duration::seconds(6));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&f.reaper).run(shutdown.clone()));

        // The first interval tick fires immediately
        for _ in 0..200 {
            if !f.store.contains(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!f.store.contains(&id));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
