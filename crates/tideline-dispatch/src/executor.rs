//! Release update executor.
//!
//! Pins the new tag into a release's configuration and asks the release
//! backend to upgrade with a fixed conservative option set. Upgrades of the
//! same release are serialized through `ReleaseLocks`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info};

use tideline_core::{Chart, ReleaseBackend, UpgradeOptions, ValuesError, VersionInfo};

use crate::error::{DispatchError, DispatchResult};

/// Configuration document of a release with `image.tag` set to `tag`.
pub fn override_values(raw_config: &str, tag: &str) -> Result<String, ValuesError> {
    tideline_core::values::pin_image_tag(raw_config, tag)
}

/// Per-release upgrade locks.
///
/// Holding the guard returned by `acquire` makes every other caller for the
/// same release wait. Entries nobody holds are dropped on the next acquire.
#[derive(Clone, Default)]
pub struct ReleaseLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ReleaseLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `release`. Released when the guard drops.
    pub async fn acquire(&self, release: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(release.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of releases with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no lock entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies upgrades through a `ReleaseBackend`.
#[derive(Clone)]
pub struct ReleaseUpdater {
    backend: Arc<dyn ReleaseBackend>,
    options: UpgradeOptions,
    locks: ReleaseLocks,
}

impl ReleaseUpdater {
    /// Updater with `UpgradeOptions::conservative()`.
    pub fn new(backend: Arc<dyn ReleaseBackend>) -> Self {
        Self {
            backend,
            options: UpgradeOptions::conservative(),
            locks: ReleaseLocks::new(),
        }
    }

    /// Options sent with every upgrade.
    pub fn options(&self) -> &UpgradeOptions {
        &self.options
    }

    /// Per-release locks held during upgrades.
    pub fn locks(&self) -> &ReleaseLocks {
        &self.locks
    }

    /// Upgrade `release` to `chart` with the given override document.
    pub async fn update(
        &self,
        release: &str,
        chart: &Chart,
        raw_overrides: &str,
    ) -> DispatchResult<VersionInfo> {
        let _guard = self.locks.acquire(release).await;

        match self
            .backend
            .upgrade_release(release, chart, raw_overrides, &self.options)
            .await
        {
            Ok(info) => {
                info!(
                    release = %info.release,
                    version = info.version,
                    chart = %chart.name,
                    "release updated"
                );
                Ok(info)
            }
            Err(e) => {
                error!(release, error = %e, "failed to update release");
                Err(DispatchError::Upgrade {
                    release: release.to_string(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tideline_core::{Release, Values};

    use super::*;
    use crate::memory::MemoryReleaseBackend;

    #[test]
    fn override_pins_tag_and_keeps_other_values() {
        let raw = "replicas: 3\nimage:\n  repository: org/app\n  tag: 1.0.0\n";
        let out = Values::parse(&override_values(raw, "2.0.0").unwrap()).unwrap();
        assert_eq!(out.string_at("image.tag").unwrap().as_deref(), Some("2.0.0"));
        assert_eq!(out.string_at("image.repository").unwrap().as_deref(), Some("org/app"));
        assert_eq!(out.string_at("replicas").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn override_creates_missing_image_mapping() {
        let out = Values::parse(&override_values("", "2.0.0").unwrap()).unwrap();
        assert_eq!(out.string_at("image.tag").unwrap().as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn update_uses_conservative_options() {
        let backend = MemoryReleaseBackend::new();
        backend
            .insert(Release {
                name: "app".into(),
                namespace: "default".into(),
                chart: Chart::default(),
                config: String::new(),
                version: 1,
            })
            .await;

        let updater = ReleaseUpdater::new(Arc::new(backend.clone()));
        let info = updater
            .update("app", &Chart::default(), "image:\n  tag: 2.0.0\n")
            .await
            .unwrap();
        assert_eq!(info.version, 2);

        let calls = backend.upgrade_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].options, UpgradeOptions::conservative());
        assert!(calls[0].options.force);
        assert!(calls[0].options.reuse_values);
        assert!(!calls[0].options.dry_run);
    }

    #[tokio::test]
    async fn backend_failure_is_an_upgrade_error() {
        let updater = ReleaseUpdater::new(Arc::new(MemoryReleaseBackend::new()));
        let err = updater.update("ghost", &Chart::default(), "").await.unwrap_err();
        assert!(matches!(err, DispatchError::Upgrade { ref release, .. } if release == "ghost"));
    }

    /// Backend whose upgrades take a while and record overlap.
    #[derive(Default)]
    struct SlowBackend {
        active: AsyncMutex<u32>,
        max_active: AsyncMutex<u32>,
    }

    #[async_trait]
    impl ReleaseBackend for SlowBackend {
        async fn list_releases(&self) -> anyhow::Result<Vec<Release>> {
            Ok(Vec::new())
        }

        async fn upgrade_release(
            &self,
            name: &str,
            _chart: &Chart,
            _override_values: &str,
            _options: &UpgradeOptions,
        ) -> anyhow::Result<VersionInfo> {
            {
                let mut active = self.active.lock().await;
                *active += 1;
                let mut max = self.max_active.lock().await;
                *max = (*max).max(*active);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            *self.active.lock().await -= 1;
            Ok(VersionInfo {
                release: name.to_string(),
                version: 1,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_release_upgrades_are_serialized() {
        let backend = Arc::new(SlowBackend::default());
        let updater = ReleaseUpdater::new(backend.clone());

        let a = updater.clone();
        let b = updater.clone();
        let (ra, rb) = tokio::join!(
            async move { a.update("app", &Chart::default(), "").await },
            async move { b.update("app", &Chart::default(), "").await },
        );
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(*backend.max_active.lock().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_releases_run_concurrently() {
        let backend = Arc::new(SlowBackend::default());
        let updater = ReleaseUpdater::new(backend.clone());

        let a = updater.clone();
        let b = updater.clone();
        let _ = tokio::join!(
            async move { a.update("one", &Chart::default(), "").await },
            async move { b.update("two", &Chart::default(), "").await },
        );
        assert_eq!(*backend.max_active.lock().await, 2);
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let locks = ReleaseLocks::new();
        drop(locks.acquire("one").await);
        let _held = locks.acquire("two").await;
        assert_eq!(locks.len(), 1);
    }
}
