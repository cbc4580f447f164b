//! Metrics sink: the counters tideline components report into.
//!
//! Components receive an `Arc<dyn MetricsSink>` instead of touching a
//! process-wide registry, so tests can pass a stub and read it back.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Receives metric updates from the poll scheduler and update pipeline.
pub trait MetricsSink: Send + Sync {
    /// Number of images tracked by the poll trigger this cycle.
    fn set_tracked_images(&self, count: u64);

    /// One release upgrade finished.
    fn record_upgrade(&self, _outcome: UpgradeOutcome) {}
}

/// Result of one release upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Succeeded,
    Failed,
}

/// Sink that discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_tracked_images(&self, _count: u64) {}
}

/// In-process metric values backed by atomics.
#[derive(Debug, Default)]
pub struct TidelineMetrics {
    tracked_images: AtomicU64,
    upgrades_succeeded: AtomicU64,
    upgrades_failed: AtomicU64,
}

impl TidelineMetrics {
    /// All values start at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the tracked-images gauge.
    pub fn tracked_images(&self) -> u64 {
        self.tracked_images.load(Ordering::Relaxed)
    }

    /// Upgrades that succeeded.
    pub fn upgrades_succeeded(&self) -> u64 {
        self.upgrades_succeeded.load(Ordering::Relaxed)
    }

    /// Upgrades that failed.
    pub fn upgrades_failed(&self) -> u64 {
        self.upgrades_failed.load(Ordering::Relaxed)
    }
}

impl MetricsSink for TidelineMetrics {
    fn set_tracked_images(&self, count: u64) {
        self.tracked_images.store(count, Ordering::Relaxed);
        debug!(count, "poll trigger tracked images gauge updated");
    }

    fn record_upgrade(&self, outcome: UpgradeOutcome) {
        match outcome {
            UpgradeOutcome::Succeeded => self.upgrades_succeeded.fetch_add(1, Ordering::Relaxed),
            UpgradeOutcome::Failed => self.upgrades_failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}
