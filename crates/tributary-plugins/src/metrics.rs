//! Metrics for reconciliation, caching and admission.
//!
//! Recorded through the `metrics` crate facade; installing an exporter is
//! left to the embedding process.
//!
//! ## Metrics Recorded
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tributary_reconcile_rounds_total` | Counter | `phase` | Array reconciliation rounds by aggregate phase |
//! | `tributary_reconcile_duration_seconds` | Histogram | - | Reconciliation round time |
//! | `tributary_reconcile_reregistrations_total` | Counter | - | Rounds that re-registered a missing job record |
//! | `tributary_admission_decisions_total` | Counter | `result` | Admission outcomes |
//! | `tributary_cache_sync_failures_total` | Counter | `cache`, `kind` | Refresh failures by classification |
//! | `tributary_cache_breaker_trips_total` | Counter | `cache` | Entries marked failed by the circuit breaker |
//! | `tributary_cache_entries` | Gauge | `cache` | Entries held by a cache |
//!
//! ## Usage
//!
//! ```rust
//! use tributary_core::Phase;
//! use tributary_plugins::metrics::PluginMetrics;
//!
//! let metrics = PluginMetrics::new();
//! metrics.record_reconcile_round(Phase::Running);
//! metrics.record_admission(true);
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tributary_core::{FailureKind, Phase};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Array reconciliation rounds by resulting aggregate phase.
    pub const RECONCILE_ROUNDS_TOTAL: &str = "tributary_reconcile_rounds_total";
    /// Histogram: Reconciliation round duration in seconds.
    pub const RECONCILE_DURATION_SECONDS: &str = "tributary_reconcile_duration_seconds";
    /// Counter: Rounds that found no job record and registered one.
    pub const RECONCILE_REREGISTRATIONS_TOTAL: &str = "tributary_reconcile_reregistrations_total";
    /// Counter: Admission decisions.
    pub const ADMISSION_DECISIONS_TOTAL: &str = "tributary_admission_decisions_total";
    /// Counter: Cache refresh failures.
    pub const CACHE_SYNC_FAILURES_TOTAL: &str = "tributary_cache_sync_failures_total";
    /// Counter: Circuit breaker trips.
    pub const CACHE_BREAKER_TRIPS_TOTAL: &str = "tributary_cache_breaker_trips_total";
    /// Gauge: Entries held by a cache.
    pub const CACHE_ENTRIES: &str = "tributary_cache_entries";
}

/// Label keys used across metrics.
pub mod labels {
    /// Aggregate phase label.
    pub const PHASE: &str = "phase";
    /// Outcome (granted, denied).
    pub const RESULT: &str = "result";
    /// Cache name.
    pub const CACHE: &str = "cache";
    /// Failure classification (user, system).
    pub const KIND: &str = "kind";
}

/// High-level interface for recording plugin metrics.
#[derive(Debug, Clone, Default)]
pub struct PluginMetrics;

impl PluginMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a completed reconciliation round.
    pub fn record_reconcile_round(&self, phase: Phase) {
        counter!(
            names::RECONCILE_ROUNDS_TOTAL,
            labels::PHASE => phase.as_label(),
        )
        .increment(1);
    }

    /// Records a self-healing re-registration.
    pub fn record_reregistration(&self) {
        counter!(names::RECONCILE_REREGISTRATIONS_TOTAL).increment(1);
    }

    /// Records an admission decision.
    pub fn record_admission(&self, granted: bool) {
        let result = if granted { "granted" } else { "denied" };
        counter!(
            names::ADMISSION_DECISIONS_TOTAL,
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Records a failed cache refresh.
    pub fn record_sync_failure(&self, cache: &str, kind: FailureKind) {
        let kind = match kind {
            FailureKind::User => "user",
            FailureKind::System => "system",
        };
        counter!(
            names::CACHE_SYNC_FAILURES_TOTAL,
            labels::CACHE => cache.to_string(),
            labels::KIND => kind,
        )
        .increment(1);
    }

    /// Records a circuit breaker trip.
    pub fn record_breaker_trip(&self, cache: &str) {
        counter!(
            names::CACHE_BREAKER_TRIPS_TOTAL,
            labels::CACHE => cache.to_string(),
        )
        .increment(1);
    }

    /// Sets the number of entries held by a cache.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_cache_entries(&self, cache: &str, entries: usize) {
        gauge!(
            names::CACHE_ENTRIES,
            labels::CACHE => cache.to_string(),
        )
        .set(entries as f64);
    }
}

/// RAII guard for timing operations.
///
/// Calls `on_drop` with the elapsed duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard for one reconciliation round.
#[must_use]
pub fn time_reconcile_round() -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(|duration| {
        histogram!(names::RECONCILE_DURATION_SECONDS).record(duration.as_secs_f64());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        let metrics = PluginMetrics::new();
        metrics.record_reconcile_round(Phase::Success);
        metrics.record_reregistration();
        metrics.record_admission(false);
        metrics.record_sync_failure("bigquery", FailureKind::System);
        metrics.record_breaker_trip("bigquery");
        metrics.set_cache_entries("bigquery", 3);
    }

    #[test]
    fn timing_guard_reports_on_drop() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(5)));
    }

    #[test]
    fn reconcile_timer_can_be_dropped() {
        let guard = time_reconcile_round();
        assert!(guard.elapsed() < Duration::from_secs(60));
    }
}
