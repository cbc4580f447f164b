//! Update dispatch pipeline.
//!
//! Change notifications enter a bounded queue through a `PipelineHandle`
//! and are consumed by a single `UpdatePipeline` task, one notification at
//! a time. Each notification is resolved to the releases it concerns and
//! every matched release is upgraded independently.
//!
//! Shutdown comes in two forms. `stop` discards whatever is still queued;
//! `drain` refuses new work but processes everything already accepted.
//! Both are observed between notifications, never in the middle of one.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use tideline_core::config::DispatchConfig;
use tideline_core::{ChangeNotification, ReleaseBackend, TagPolicy, VersionInfo};
use tideline_metrics::{MetricsSink, NoopMetrics, UpgradeOutcome};

use crate::error::{DispatchError, DispatchResult};
use crate::executor::{ReleaseUpdater, override_values};
use crate::matching::impacted_releases;

/// Lifecycle signal shared by the pipeline and its handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineSignal {
    Running,
    /// Discard queued notifications and exit.
    Stop,
    /// Refuse new notifications, finish queued ones, then exit.
    Drain,
}

/// Outcome of dispatching one notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Releases selected for upgrade.
    pub matched: usize,
    /// Upgrades that succeeded, in match order.
    pub updated: Vec<VersionInfo>,
    /// `(release, error)` for every upgrade that did not go through.
    pub failed: Vec<(String, String)>,
}

/// Resolves notifications to releases and upgrades them.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn ReleaseBackend>,
    updater: ReleaseUpdater,
    metrics: Arc<dyn MetricsSink>,
    policy: TagPolicy,
}

impl Dispatcher {
    /// Dispatcher with no metrics and the `Any` tag policy.
    pub fn new(backend: Arc<dyn ReleaseBackend>) -> Self {
        Self {
            updater: ReleaseUpdater::new(backend.clone()),
            backend,
            metrics: Arc::new(NoopMetrics),
            policy: TagPolicy::default(),
        }
    }

    /// Report upgrade outcomes to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Rule for accepting a notified tag.
    pub fn with_tag_policy(mut self, policy: TagPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Active tag policy.
    pub fn tag_policy(&self) -> TagPolicy {
        self.policy
    }

    /// Upgrade every release the notification concerns.
    ///
    /// Only a failure to list releases (or an unparseable notification) is
    /// an error. Per-release failures are collected in the report.
    pub async fn process_notification(
        &self,
        notification: &ChangeNotification,
    ) -> DispatchResult<DispatchReport> {
        let matches =
            impacted_releases(self.backend.as_ref(), notification, self.policy).await?;

        let mut report = DispatchReport {
            matched: matches.len(),
            ..Default::default()
        };

        for m in matches {
            let name = m.release.name.clone();
            debug!(
                release = %name,
                current = m.current.tag_or_latest(),
                target = %m.target_tag,
                "updating release"
            );

            let overrides = match override_values(&m.release.config, &m.target_tag) {
                Ok(overrides) => overrides,
                Err(e) => {
                    let e = DispatchError::from(e);
                    warn!(release = %name, error = %e, "failed to pin image tag");
                    self.metrics.record_upgrade(UpgradeOutcome::Failed);
                    report.failed.push((name, e.to_string()));
                    continue;
                }
            };

            match self.updater.update(&name, &m.release.chart, &overrides).await {
                Ok(info) => {
                    self.metrics.record_upgrade(UpgradeOutcome::Succeeded);
                    report.updated.push(info);
                }
                Err(e) => {
                    self.metrics.record_upgrade(UpgradeOutcome::Failed);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

/// Submitting side of the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<ChangeNotification>,
    signal: Arc<watch::Sender<PipelineSignal>>,
}

impl PipelineHandle {
    /// Queue a notification, waiting while the queue is full.
    ///
    /// Fails with `PipelineClosed` once `stop` or `drain` was requested.
    pub async fn submit(&self, notification: ChangeNotification) -> DispatchResult<()> {
        if self.is_closed() {
            return Err(DispatchError::PipelineClosed);
        }
        self.tx
            .send(notification)
            .await
            .map_err(|_| DispatchError::PipelineClosed)
    }

    /// Stop the pipeline, discarding queued notifications. Idempotent.
    pub fn stop(&self) {
        self.signal.send_if_modified(|signal| {
            if *signal == PipelineSignal::Stop {
                return false;
            }
            *signal = PipelineSignal::Stop;
            true
        });
    }

    /// Refuse new notifications and let the pipeline finish the queued ones.
    /// Has no effect once shutdown was requested.
    pub fn drain(&self) {
        self.signal.send_if_modified(|signal| {
            if *signal != PipelineSignal::Running {
                return false;
            }
            *signal = PipelineSignal::Drain;
            true
        });
    }

    /// Whether `stop` or `drain` was requested.
    pub fn is_closed(&self) -> bool {
        *self.signal.borrow() != PipelineSignal::Running
    }

    /// Current lifecycle signal.
    pub fn signal(&self) -> PipelineSignal {
        *self.signal.borrow()
    }
}

/// Consuming side of the pipeline.
pub struct UpdatePipeline {
    dispatcher: Dispatcher,
    rx: mpsc::Receiver<ChangeNotification>,
    signal: watch::Receiver<PipelineSignal>,
    // Keeps `signal.changed()` from failing once every handle is gone.
    _signal_tx: Arc<watch::Sender<PipelineSignal>>,
    capacity: usize,
}

impl UpdatePipeline {
    /// Pipeline over `backend` configured from `[dispatch]`.
    pub fn new(
        backend: Arc<dyn ReleaseBackend>,
        config: &DispatchConfig,
    ) -> (Self, PipelineHandle) {
        let dispatcher = Dispatcher::new(backend).with_tag_policy(config.tag_policy);
        Self::from_dispatcher(dispatcher, config.queue_capacity)
    }

    /// Pipeline around a prepared dispatcher with a queue of `capacity` (at least 1).
    pub fn from_dispatcher(dispatcher: Dispatcher, capacity: usize) -> (Self, PipelineHandle) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (signal_tx, signal_rx) = watch::channel(PipelineSignal::Running);
        let signal_tx = Arc::new(signal_tx);

        let pipeline = Self {
            dispatcher,
            rx,
            signal: signal_rx,
            _signal_tx: signal_tx.clone(),
            capacity,
        };
        let handle = PipelineHandle {
            tx,
            signal: signal_tx,
        };
        (pipeline, handle)
    }

    /// Report upgrade outcomes to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.dispatcher = self.dispatcher.with_metrics(metrics);
        self
    }

    /// Dispatcher used for each notification.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Consume notifications until shutdown is requested or every handle
    /// has been dropped.
    pub async fn run(mut self) {
        info!(capacity = self.capacity, "update pipeline started");

        loop {
            let signal = *self.signal.borrow_and_update();
            match signal {
                PipelineSignal::Running => {}
                PipelineSignal::Stop => {
                    self.discard_queued();
                    break;
                }
                PipelineSignal::Drain => {
                    self.drain_queued().await;
                    break;
                }
            }

            tokio::select! {
                biased;
                changed = self.signal.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = self.rx.recv() => match next {
                    Some(notification) => self.handle(notification).await,
                    None => {
                        debug!("all pipeline handles dropped");
                        break;
                    }
                },
            }
        }

        info!("update pipeline stopped");
    }

    async fn handle(&self, notification: ChangeNotification) {
        let image = notification.repository.name.as_str();
        let tag = notification.tag().unwrap_or_default();

        match self.dispatcher.process_notification(&notification).await {
            Ok(report) if report.matched == 0 => {
                debug!(image, tag, "no releases to update");
            }
            Ok(report) => {
                info!(
                    image,
                    tag,
                    matched = report.matched,
                    updated = report.updated.len(),
                    failed = report.failed.len(),
                    "notification processed"
                );
            }
            Err(e) => {
                error!(image, tag, error = %e, "failed to process notification");
            }
        }
    }

    fn discard_queued(&mut self) {
        self.rx.close();
        let mut discarded = 0usize;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(discarded, "update pipeline stopped with queued notifications");
        }
    }

    async fn drain_queued(&mut self) {
        self.rx.close();
        let mut processed = 0usize;
        while let Some(notification) = self.rx.recv().await {
            self.handle(notification).await;
            processed += 1;
        }
        info!(processed, "update pipeline drained");
    }
}
