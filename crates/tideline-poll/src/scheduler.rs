//! Poll scheduler: keeps registry watches in sync with tracked images.
//!
//! Each scan lists the tracked images, keeps those with the poll trigger,
//! resolves credentials and registers a watch per image. Per-image failures
//! are logged and skipped; only a failed listing fails the scan.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tideline_core::config::{DEFAULT_POLL_SCHEDULE, PollConfig};
use tideline_core::{
    Credentials, CredentialResolver, RegistryWatcher, TrackedImageSource, TriggerPolicy,
};
use tideline_metrics::MetricsSink;

use crate::error::{PollError, PollResult};
use crate::watch_registry::WatchRegistry;

/// Interval between scans when none is configured.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(55);

/// Shortest accepted scan interval; smaller values are raised to it.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Whether a scan is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Per-cycle outcome of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Poll-triggered images processed.
    pub tracked: usize,
    /// Watches registered without error.
    pub registered: usize,
    /// Images whose credentials could not be resolved (watched anonymously).
    pub credential_failures: usize,
    /// Images whose watch registration failed.
    pub watch_failures: usize,
    /// Stale watches dropped (pruning only).
    pub pruned: usize,
}

/// The poll reconciliation loop.
pub struct PollScheduler {
    source: Arc<dyn TrackedImageSource>,
    credentials: Arc<dyn CredentialResolver>,
    watcher: Arc<dyn RegistryWatcher>,
    metrics: Arc<dyn MetricsSink>,
    scan_interval: Duration,
    default_schedule: String,
    /// Registry to prune stale watches from after each scan.
    pruned_registry: Option<WatchRegistry>,
    state: Mutex<ScanState>,
}

impl PollScheduler {
    /// Scheduler with the default 55s interval, `@every 1m` fallback schedule and no pruning.
    pub fn new(
        source: Arc<dyn TrackedImageSource>,
        credentials: Arc<dyn CredentialResolver>,
        watcher: Arc<dyn RegistryWatcher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            source,
            credentials,
            watcher,
            metrics,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            default_schedule: DEFAULT_POLL_SCHEDULE.to_string(),
            pruned_registry: None,
            state: Mutex::new(ScanState::Idle),
        }
    }

    /// Set the time between scans. Values below `MIN_SCAN_INTERVAL` are
    /// raised to it.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval.max(MIN_SCAN_INTERVAL);
        self
    }

    /// Schedule used for tracked images that carry none.
    pub fn with_default_schedule(mut self, schedule: &str) -> Self {
        self.default_schedule = schedule.to_string();
        self
    }

    /// After each scan, drop watches in `registry` for images that are no
    /// longer poll-tracked.
    pub fn with_pruning(mut self, registry: WatchRegistry) -> Self {
        self.pruned_registry = Some(registry);
        self
    }

    /// Apply the `[poll]` config section. Pruning needs a registry and is
    /// only enabled when one is given.
    pub fn with_config(self, config: &PollConfig, registry: Option<WatchRegistry>) -> Self {
        let scheduler = self
            .with_scan_interval(config.scan_interval())
            .with_default_schedule(&config.default_schedule);
        match registry {
            Some(registry) if config.prune_stale_watches => scheduler.with_pruning(registry),
            _ => scheduler,
        }
    }

    /// Time between scans.
    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    /// Whether a scan is running.
    pub fn state(&self) -> ScanState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan once, then every `scan_interval` until `shutdown` fires.
    ///
    /// Shutdown is observed between scans only; a running scan completes.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> PollResult<()> {
        info!(
            interval_secs = self.scan_interval.as_secs(),
            "polling trigger configured"
        );

        if let Err(e) = self.scan().await {
            error!(error = %e, "scan failed");
        }

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.scan_interval,
            self.scan_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("performing scan");
                    if let Err(e) = self.scan().await {
                        error!(error = %e, "scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("poll scheduler shutting down");
        Ok(())
    }

    /// Run a single reconciliation cycle.
    ///
    /// Fails with `ScanInProgress` if another scan is running and with
    /// `ListFailure` if the tracked images cannot be listed.
    pub async fn scan(&self) -> PollResult<ScanReport> {
        let _guard = ScanGuard::acquire(&self.state)?;

        let images = self
            .source
            .tracked_images()
            .await
            .map_err(PollError::ListFailure)?;

        let mut report = ScanReport::default();
        let mut polled: HashSet<String> = HashSet::new();

        for tracked in images.iter().filter(|i| i.trigger == TriggerPolicy::Poll) {
            report.tracked += 1;
            let image = tracked.image.remote();

            let credentials = match self.credentials.resolve(tracked).await {
                Ok(credentials) => credentials,
                Err(e) => {
                    warn!(
                        %image,
                        secrets = ?tracked.secrets,
                        error = %e,
                        "failed to get authentication credentials, using anonymous access"
                    );
                    report.credential_failures += 1;
                    Credentials::anonymous()
                }
            };

            let schedule = if tracked.poll_schedule.trim().is_empty() {
                self.default_schedule.as_str()
            } else {
                tracked.poll_schedule.as_str()
            };

            match self
                .watcher
                .watch(&image, schedule, &credentials.username, &credentials.password)
                .await
            {
                Ok(()) => report.registered += 1,
                Err(e) => {
                    error!(
                        %image,
                        %schedule,
                        error = %e,
                        "failed to start watching repository"
                    );
                    report.watch_failures += 1;
                }
            }

            polled.insert(image);
        }

        if let Some(registry) = &self.pruned_registry {
            let removed = registry.retain_only(polled.iter().map(String::as_str)).await;
            report.pruned = removed.len();
        }

        self.metrics.set_tracked_images(report.tracked as u64);

        debug!(
            tracked = report.tracked,
            registered = report.registered,
            credential_failures = report.credential_failures,
            watch_failures = report.watch_failures,
            "scan completed"
        );
        Ok(report)
    }
}

/// Holds `ScanState::Scanning` for the duration of a scan.
struct ScanGuard<'a> {
    state: &'a Mutex<ScanState>,
}

impl<'a> ScanGuard<'a> {
    fn acquire(state: &'a Mutex<ScanState>) -> PollResult<Self> {
        let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == ScanState::Scanning {
            return Err(PollError::ScanInProgress);
        }
        *current = ScanState::Scanning;
        Ok(Self { state })
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ScanState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use tideline_core::{ImageReference, TrackedImage};
    use tideline_metrics::TidelineMetrics;

    use super::*;

    struct StaticSource {
        images: Vec<TrackedImage>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StaticSource {
        fn new(images: Vec<TrackedImage>) -> Self {
            Self {
                images,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl TrackedImageSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn tracked_images(&self) -> anyhow::Result<Vec<TrackedImage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("provider unreachable");
            }
            Ok(self.images.clone())
        }
    }

    /// Resolves `user`/`pass` except for images listed in `fail_for`.
    #[derive(Default)]
    struct StubCredentials {
        fail_for: HashSet<String>,
    }

    #[async_trait]
    impl CredentialResolver for StubCredentials {
        async fn resolve(&self, image: &TrackedImage) -> anyhow::Result<Credentials> {
            if self.fail_for.contains(&image.image.remote()) {
                anyhow::bail!("secret not found");
            }
            Ok(Credentials::new("user", "pass"))
        }
    }

    type WatchCall = (String, String, String, String);

    /// Records every call; rejects images listed in `fail_for`.
    #[derive(Default)]
    struct RecordingWatcher {
        calls: std::sync::Mutex<Vec<WatchCall>>,
        fail_for: HashSet<String>,
    }

    impl RecordingWatcher {
        fn calls(&self) -> Vec<WatchCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RegistryWatcher for RecordingWatcher {
        async fn watch(
            &self,
            image: &str,
            schedule: &str,
            username: &str,
            password: &str,
        ) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push((
                image.to_string(),
                schedule.to_string(),
                username.to_string(),
                password.to_string(),
            ));
            if self.fail_for.contains(image) {
                anyhow::bail!("registry rejected watch");
            }
            Ok(())
        }
    }

    fn tracked(image: &str, trigger: TriggerPolicy, schedule: &str) -> TrackedImage {
        TrackedImage::new(ImageReference::parse(image).unwrap(), trigger, schedule)
    }

    fn scheduler(
        source: Arc<dyn TrackedImageSource>,
        credentials: StubCredentials,
        watcher: Arc<dyn RegistryWatcher>,
        metrics: Arc<TidelineMetrics>,
    ) -> PollScheduler {
        PollScheduler::new(source, Arc::new(credentials), watcher, metrics)
    }

    #[tokio::test]
    async fn single_poll_image_is_registered() {
        let source = Arc::new(StaticSource::new(vec![tracked(
            "org/app",
            TriggerPolicy::Poll,
            "every 1m",
        )]));
        let watcher = Arc::new(RecordingWatcher::default());
        let metrics = Arc::new(TidelineMetrics::new());
        let scheduler = scheduler(
            source,
            StubCredentials::default(),
            watcher.clone(),
            metrics.clone(),
        );

        let report = scheduler.scan().await.unwrap();

        assert_eq!(
            watcher.calls(),
            vec![(
                "org/app".to_string(),
                "every 1m".to_string(),
                "user".to_string(),
                "pass".to_string()
            )]
        );
        assert_eq!(report.tracked, 1);
        assert_eq!(report.registered, 1);
        assert_eq!(metrics.tracked_images(), 1);
    }

    #[tokio::test]
    async fn gauge_counts_only_poll_images() {
        let source = Arc::new(StaticSource::new(vec![
            tracked("org/a", TriggerPolicy::Poll, "@every 1m"),
            tracked("org/b", TriggerPolicy::Webhook, "@every 1m"),
            tracked("org/c", TriggerPolicy::Poll, "@every 1m"),
            tracked("org/d", TriggerPolicy::Webhook, "@every 1m"),
            tracked("org/e", TriggerPolicy::Poll, "@every 1m"),
        ]));
        let watcher = Arc::new(RecordingWatcher::default());
        let metrics = Arc::new(TidelineMetrics::new());
        let scheduler = scheduler(
            source,
            StubCredentials::default(),
            watcher.clone(),
            metrics.clone(),
        );

        scheduler.scan().await.unwrap();

        assert_eq!(metrics.tracked_images(), 3);
        let images: Vec<String> = watcher.calls().into_iter().map(|c| c.0).collect();
        assert_eq!(images, vec!["org/a", "org/c", "org/e"]);
    }

    #[tokio::test]
    async fn registration_failure_does_not_stop_the_scan() {
        let source = Arc::new(StaticSource::new(vec![
            tracked("org/a", TriggerPolicy::Poll, "@every 1m"),
            tracked("org/b", TriggerPolicy::Poll, "@every 1m"),
            tracked("org/c", TriggerPolicy::Poll, "@every 1m"),
            tracked("org/d", TriggerPolicy::Poll, "@every 1m"),
        ]));
        let watcher = Arc::new(RecordingWatcher {
            fail_for: HashSet::from(["org/a".to_string(), "org/c".to_string()]),
            ..Default::default()
        });
        let metrics = Arc::new(TidelineMetrics::new());
        let scheduler = scheduler(
            source,
            StubCredentials::default(),
            watcher.clone(),
            metrics.clone(),
        );

        let report = scheduler.scan().await.unwrap();

        assert_eq!(watcher.calls().len(), 4);
        assert_eq!(report.registered, 2);
        assert_eq!(report.watch_failures, 2);
        assert_eq!(metrics.tracked_images(), 4);
    }

    #[tokio::test]
    async fn credential_failure_falls_back_to_anonymous() {
        let source = Arc::new(StaticSource::new(vec![
            tracked("org/private", TriggerPolicy::Poll, "@every 1m"),
            tracked("org/app", TriggerPolicy::Poll, "@every 1m"),
        ]));
        let watcher = Arc::new(RecordingWatcher::default());
        let credentials = StubCredentials {
            fail_for: HashSet::from(["org/private".to_string()]),
        };
        let scheduler = scheduler(
            source,
            credentials,
            watcher.clone(),
            Arc::new(TidelineMetrics::new()),
        );

        let report = scheduler.scan().await.unwrap();

        let calls = watcher.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].2, "");
        assert_eq!(calls[0].3, "");
        assert_eq!(calls[1].2, "user");
        assert_eq!(report.credential_failures, 1);
        assert_eq!(report.registered, 2);
    }

    #[tokio::test]
    async fn list_failure_is_returned_and_nothing_is_registered() {
        let watcher = Arc::new(RecordingWatcher::default());
        let metrics = Arc::new(TidelineMetrics::new());
        metrics.set_tracked_images(9);
        let scheduler = scheduler(
            Arc::new(StaticSource::failing()),
            StubCredentials::default(),
            watcher.clone(),
            metrics.clone(),
        );

        let err = scheduler.scan().await.unwrap_err();

        assert!(matches!(err, PollError::ListFailure(_)));
        assert!(err.to_string().contains("provider unreachable"));
        assert!(watcher.calls().is_empty());
        assert_eq!(metrics.tracked_images(), 9);
        assert_eq!(scheduler.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn empty_schedule_uses_default() {
        let source = Arc::new(StaticSource::new(vec![tracked(
            "org/app",
            TriggerPolicy::Poll,
            "",
        )]));
        let watcher = Arc::new(RecordingWatcher::default());
        let scheduler = scheduler(
            source,
            StubCredentials::default(),
            watcher.clone(),
            Arc::new(TidelineMetrics::new()),
        )
        .with_default_schedule("@every 2m");

        scheduler.scan().await.unwrap();
        assert_eq!(watcher.calls()[0].1, "@every 2m");
    }

    #[tokio::test]
    async fn repeated_scans_keep_one_job_per_image() {
        let source = Arc::new(StaticSource::new(vec![
            tracked("org/app", TriggerPolicy::Poll, "@every 1m"),
            tracked("org/web", TriggerPolicy::Poll, "@every 1m"),
        ]));
        let registry = WatchRegistry::new();
        let scheduler = scheduler(
            source,
            StubCredentials::default(),
            Arc::new(registry.clone()),
            Arc::new(TidelineMetrics::new()),
        );

        scheduler.scan().await.unwrap();
        scheduler.scan().await.unwrap();
        scheduler.scan().await.unwrap();

        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn pruning_drops_untracked_watches() {
        let registry = WatchRegistry::new();
        registry.register("org/old", "@every 1m", "", "").await.unwrap();

        let source = Arc::new(StaticSource::new(vec![
            tracked("org/app", TriggerPolicy::Poll, "@every 1m"),
            tracked("org/hook", TriggerPolicy::Webhook, "@every 1m"),
        ]));
        let config = PollConfig {
            prune_stale_watches: true,
            ..PollConfig::default()
        };
        let scheduler = scheduler(
            source,
            StubCredentials::default(),
            Arc::new(registry.clone()),
            Arc::new(TidelineMetrics::new()),
        )
        .with_config(&config, Some(registry.clone()));

        let report = scheduler.scan().await.unwrap();

        assert_eq!(report.pruned, 1);
        let images: Vec<String> = registry.jobs().await.into_iter().map(|j| j.image).collect();
        assert_eq!(images, vec!["org/app"]);
    }

    /// Blocks inside `tracked_images` until released.
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TrackedImageSource for GatedSource {
        fn name(&self) -> &str {
            "gated"
        }

        async fn tracked_images(&self) -> anyhow::Result<Vec<TrackedImage>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn overlapping_scan_is_rejected() {
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let scheduler = Arc::new(scheduler(
            source.clone(),
            StubCredentials::default(),
            Arc::new(RecordingWatcher::default()),
            Arc::new(TidelineMetrics::new()),
        ));

        let running = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.scan().await })
        };
        source.entered.notified().await;

        assert_eq!(scheduler.state(), ScanState::Scanning);
        assert!(matches!(
            scheduler.scan().await,
            Err(PollError::ScanInProgress)
        ));

        source.release.notify_one();
        assert!(running.await.unwrap().is_ok());
        assert_eq!(scheduler.state(), ScanState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn start_scans_immediately_then_on_every_tick() {
        let source = Arc::new(StaticSource::new(vec![tracked(
            "org/app",
            TriggerPolicy::Poll,
            "@every 1m",
        )]));
        let scheduler = Arc::new(scheduler(
            source.clone(),
            StubCredentials::default(),
            Arc::new(RecordingWatcher::default()),
            Arc::new(TidelineMetrics::new()),
        ));
        assert_eq!(scheduler.scan_interval(), Duration::from_secs(55));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(111)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_scan_interval_is_clamped() {
        let source = Arc::new(StaticSource::new(Vec::new()));
        let scheduler = Arc::new(
            scheduler(
                source.clone(),
                StubCredentials::default(),
                Arc::new(RecordingWatcher::default()),
                Arc::new(TidelineMetrics::new()),
            )
            .with_scan_interval(Duration::ZERO),
        );
        assert_eq!(scheduler.scan_interval(), MIN_SCAN_INTERVAL);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn start_survives_list_failures() {
        let source = Arc::new(StaticSource::failing());
        let scheduler = Arc::new(
            scheduler(
                source.clone(),
                StubCredentials::default(),
                Arc::new(RecordingWatcher::default()),
                Arc::new(TidelineMetrics::new()),
            )
            .with_scan_interval(Duration::from_secs(10)),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        drop(shutdown_tx);
        assert!(handle.await.unwrap().is_ok());
    }
}
