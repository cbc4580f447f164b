//! Boundaries to external collaborators.
//!
//! The poll scheduler and the update pipeline only talk to the outside world
//! through these traits: a source of tracked images, a credential resolver,
//! a registry watcher and a release backend. Errors crossing these
//! boundaries are opaque (`anyhow`).
//!
//! `ProviderSet`, `ConfiguredImages` and `StaticCredentials` are the
//! config-driven implementations shipped with the core.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use crate::config::{ImageConfig, RegistryConfig};
use crate::image::ImageReference;
use crate::types::{
    Chart, Credentials, Release, TrackedImage, TriggerPolicy, UpgradeOptions, VersionInfo,
};

/// Reports the images currently under management.
#[async_trait]
pub trait TrackedImageSource: Send + Sync {
    fn name(&self) -> &str;

    async fn tracked_images(&self) -> anyhow::Result<Vec<TrackedImage>>;
}

/// Resolves registry credentials for a tracked image.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, image: &TrackedImage) -> anyhow::Result<Credentials>;
}

/// Registers recurring registry checks.
///
/// Implementations must be idempotent per image and must return promptly;
/// the poll itself happens out of band.
#[async_trait]
pub trait RegistryWatcher: Send + Sync {
    async fn watch(
        &self,
        image: &str,
        schedule: &str,
        username: &str,
        password: &str,
    ) -> anyhow::Result<()>;
}

/// Stores and mutates releases.
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    async fn list_releases(&self) -> anyhow::Result<Vec<Release>>;

    async fn upgrade_release(
        &self,
        name: &str,
        chart: &Chart,
        override_values: &str,
        options: &UpgradeOptions,
    ) -> anyhow::Result<VersionInfo>;
}

/// Aggregates tracked images across several providers.
///
/// Any failing provider fails the whole listing; callers retry on their
/// next cycle.
#[derive(Default, Clone)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn TrackedImageSource>>,
}

impl ProviderSet {
    /// Empty set; lists no images.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. Providers are listed in insertion order.
    pub fn with_provider(mut self, provider: Arc<dyn TrackedImageSource>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Number of providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider was added.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl TrackedImageSource for ProviderSet {
    fn name(&self) -> &str {
        "providers"
    }

    async fn tracked_images(&self) -> anyhow::Result<Vec<TrackedImage>> {
        let mut all = Vec::new();
        for provider in &self.providers {
            let images = provider
                .tracked_images()
                .await
                .with_context(|| format!("provider {} failed to list images", provider.name()))?;
            debug!(provider = provider.name(), count = images.len(), "tracked images listed");
            all.extend(images);
        }
        Ok(all)
    }
}

/// Tracked images declared in the config file.
pub struct ConfiguredImages {
    images: Vec<TrackedImage>,
}

impl ConfiguredImages {
    /// Value reported in `TrackedImage::provider`.
    pub const PROVIDER_NAME: &'static str = "config";

    /// Build from `[[images]]` entries. Entries without a schedule get
    /// `default_schedule`.
    pub fn from_config(entries: &[ImageConfig], default_schedule: &str) -> anyhow::Result<Self> {
        let images = entries
            .iter()
            .map(|entry| {
                let image = ImageReference::parse(&entry.image)
                    .with_context(|| format!("invalid tracked image {:?}", entry.image))?;
                let schedule = entry
                    .schedule
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(default_schedule);
                Ok(TrackedImage {
                    image,
                    trigger: TriggerPolicy::parse(&entry.trigger),
                    poll_schedule: schedule.to_string(),
                    secrets: entry.secrets.clone(),
                    provider: Self::PROVIDER_NAME.to_string(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { images })
    }
}

#[async_trait]
impl TrackedImageSource for ConfiguredImages {
    fn name(&self) -> &str {
        Self::PROVIDER_NAME
    }

    async fn tracked_images(&self) -> anyhow::Result<Vec<TrackedImage>> {
        Ok(self.images.clone())
    }
}

/// Credentials keyed by registry host.
#[derive(Default)]
pub struct StaticCredentials {
    by_host: HashMap<String, Credentials>,
}

impl StaticCredentials {
    /// Build from `[[registries]]` entries.
    pub fn from_config(registries: &[RegistryConfig]) -> Self {
        let by_host = registries
            .iter()
            .map(|r| {
                (
                    normalize_host(&r.host),
                    Credentials::new(&r.username, &r.password),
                )
            })
            .collect();
        Self { by_host }
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, image: &TrackedImage) -> anyhow::Result<Credentials> {
        let host = image.image.registry();
        self.by_host
            .get(host)
            .cloned()
            .with_context(|| format!("no credentials configured for registry {host}"))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim();
    if host == "docker.io" {
        crate::image::DEFAULT_REGISTRY.to_string()
    } else {
        host.to_string()
    }
}
