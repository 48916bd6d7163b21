//! Metrics registry
//!
//! - Counters only (no gauges, no histograms)
//! - Monotonic increase
//! - Shared by reference between strategy, writer and orchestrator

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics registry containing all operational counters
///
/// All counters use Relaxed atomics; values are exact once the
/// incrementing tasks have finished.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    estimates_accepted: AtomicU64,
    estimates_dropped: AtomicU64,
    columns_updated: AtomicU64,
    columns_inserted: AtomicU64,
    columns_failed: AtomicU64,
    values_encoded: AtomicU64,
    values_failed: AtomicU64,
    fallback_attempts: AtomicU64,
    stats_applications: AtomicU64,
    strategy_fallbacks: AtomicU64,
    trials_run: AtomicU64,
    experiments_succeeded: AtomicU64,
    experiments_failed: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Sanitizer

    pub fn add_estimates_accepted(&self, n: u64) {
        self.estimates_accepted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_estimates_dropped(&self, n: u64) {
        self.estimates_dropped.fetch_add(n, Ordering::Relaxed);
    }

    // Writer

    pub fn add_columns_updated(&self, n: u64) {
        self.columns_updated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_columns_inserted(&self, n: u64) {
        self.columns_inserted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_columns_failed(&self, n: u64) {
        self.columns_failed.fetch_add(n, Ordering::Relaxed);
    }

    /// One values-array field written
    pub fn increment_values_encoded(&self) {
        self.values_encoded.fetch_add(1, Ordering::Relaxed);
    }

    /// One values-array field left null after exhausting every technique
    pub fn increment_values_failed(&self) {
        self.values_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// One encoding technique tried (successful or not)
    pub fn increment_fallback_attempts(&self) {
        self.fallback_attempts.fetch_add(1, Ordering::Relaxed);
    }

    // Strategy

    pub fn increment_stats_applications(&self) {
        self.stats_applications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_strategy_fallbacks(&self) {
        self.strategy_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    // Orchestrator

    pub fn increment_trials_run(&self) {
        self.trials_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_experiments_succeeded(&self) {
        self.experiments_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_experiments_failed(&self) {
        self.experiments_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            estimates_accepted: self.estimates_accepted.load(Ordering::Relaxed),
            estimates_dropped: self.estimates_dropped.load(Ordering::Relaxed),
            columns_updated: self.columns_updated.load(Ordering::Relaxed),
            columns_inserted: self.columns_inserted.load(Ordering::Relaxed),
            columns_failed: self.columns_failed.load(Ordering::Relaxed),
            values_encoded: self.values_encoded.load(Ordering::Relaxed),
            values_failed: self.values_failed.load(Ordering::Relaxed),
            fallback_attempts: self.fallback_attempts.load(Ordering::Relaxed),
            stats_applications: self.stats_applications.load(Ordering::Relaxed),
            strategy_fallbacks: self.strategy_fallbacks.load(Ordering::Relaxed),
            trials_run: self.trials_run.load(Ordering::Relaxed),
            experiments_succeeded: self.experiments_succeeded.load(Ordering::Relaxed),
            experiments_failed: self.experiments_failed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub estimates_accepted: u64,
    pub estimates_dropped: u64,
    pub columns_updated: u64,
    pub columns_inserted: u64,
    pub columns_failed: u64,
    pub values_encoded: u64,
    pub values_failed: u64,
    pub fallback_attempts: u64,
    pub stats_applications: u64,
    pub strategy_fallbacks: u64,
    pub trials_run: u64,
    pub experiments_succeeded: u64,
    pub experiments_failed: u64,
}
