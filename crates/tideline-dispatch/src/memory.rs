//! In-memory release backend.
//!
//! Keeps releases in a map, applies upgrades the way a release manager
//! would (merging overrides into the existing values when `reuse_values`
//! is set, bumping the version) and records every upgrade request. Used by
//! tests and local experiments.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use tokio::sync::Mutex;
use tracing::debug;

use tideline_core::{Chart, Release, ReleaseBackend, UpgradeOptions, VersionInfo};

/// One recorded `upgrade_release` call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeCall {
    /// Release name passed to the backend.
    pub release: String,
    /// Chart passed to the backend.
    pub chart: Chart,
    /// Override document passed to the backend.
    pub override_values: String,
    /// Options passed to the backend.
    pub options: UpgradeOptions,
}

#[derive(Default)]
struct Inner {
    releases: BTreeMap<String, Release>,
    failing: HashSet<String>,
    fail_listing: bool,
    calls: Vec<UpgradeCall>,
}

/// `ReleaseBackend` holding releases in memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryReleaseBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryReleaseBackend {
    /// Backend with no releases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a release.
    pub async fn insert(&self, release: Release) {
        let mut inner = self.inner.lock().await;
        inner.releases.insert(release.name.clone(), release);
    }

    /// Current state of a release.
    pub async fn release(&self, name: &str) -> Option<Release> {
        self.inner.lock().await.releases.get(name).cloned()
    }

    /// Make upgrades of `name` fail.
    pub async fn fail_upgrades_for(&self, name: &str) {
        self.inner.lock().await.failing.insert(name.to_string());
    }

    /// Make `list_releases` fail while `fail` is set.
    pub async fn fail_listing(&self, fail: bool) {
        self.inner.lock().await.fail_listing = fail;
    }

    /// Upgrade requests received so far, in order.
    pub async fn upgrade_calls(&self) -> Vec<UpgradeCall> {
        self.inner.lock().await.calls.clone()
    }
}

#[async_trait]
impl ReleaseBackend for MemoryReleaseBackend {
    async fn list_releases(&self) -> anyhow::Result<Vec<Release>> {
        let inner = self.inner.lock().await;
        if inner.fail_listing {
            anyhow::bail!("release backend unavailable");
        }
        Ok(inner.releases.values().cloned().collect())
    }

    async fn upgrade_release(
        &self,
        name: &str,
        chart: &Chart,
        override_values: &str,
        options: &UpgradeOptions,
    ) -> anyhow::Result<VersionInfo> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(UpgradeCall {
            release: name.to_string(),
            chart: chart.clone(),
            override_values: override_values.to_string(),
            options: options.clone(),
        });

        if inner.failing.contains(name) {
            anyhow::bail!("upgrade of {name} rejected");
        }

        let release = inner
            .releases
            .get_mut(name)
            .with_context(|| format!("release {name} not found"))?;

        if options.dry_run {
            return Ok(VersionInfo {
                release: name.to_string(),
                version: release.version,
            });
        }

        let overrides = parse_mapping(override_values).context("invalid override values")?;
        let config = if options.reuse_values && !options.reset_values {
            let mut existing = parse_mapping(&release.config).context("invalid release values")?;
            merge(&mut existing, overrides);
            existing
        } else {
            overrides
        };

        release.config = serde_yaml::to_string(&config)?;
        release.chart = chart.clone();
        release.version += 1;
        debug!(release = name, version = release.version, "release stored");

        Ok(VersionInfo {
            release: name.to_string(),
            version: release.version,
        })
    }
}

fn parse_mapping(raw: &str) -> anyhow::Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    match serde_yaml::from_str(raw)? {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        value @ Value::Mapping(_) => Ok(value),
        _ => anyhow::bail!("values document is not a mapping"),
    }
}

/// Deep-merge `overlay` into `base`; overlay wins on conflicts.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
