//! tideline.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::ImageReference;
use crate::types::TagPolicy;

/// Seconds between poll scans.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 55;
/// Capacity of the dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Watch schedule for images that carry none.
pub const DEFAULT_POLL_SCHEDULE: &str = "@every 1m";

/// Errors while loading or validating `tideline.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Parsed `tideline.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TidelineConfig {
    /// `[poll]` section.
    #[serde(default)]
    pub poll: PollConfig,
    /// `[dispatch]` section.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// `[[images]]` entries tracked without an external provider.
    #[serde(default)]
    pub images: Vec<ImageConfig>,
    /// `[[registries]]` credentials, one per host.
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,
}

/// Poll scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between scans.
    pub scan_interval_secs: u64,
    /// Schedule used for tracked images that carry none.
    pub default_schedule: String,
    /// Drop watches for images that are no longer tracked.
    pub prune_stale_watches: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            default_schedule: DEFAULT_POLL_SCHEDULE.to_string(),
            prune_stale_watches: false,
        }
    }
}

impl PollConfig {
    /// `scan_interval_secs` as a `Duration`.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Update pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bounded queue size; submitters wait when it is full.
    pub queue_capacity: usize,
    /// Rule for accepting a notified tag.
    pub tag_policy: TagPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tag_policy: TagPolicy::Any,
        }
    }
}

/// A statically configured tracked image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Image reference, e.g. `org/app` or `quay.io/org/app:1.0`.
    pub image: String,
    /// Trigger policy name (`poll`, `webhook`, `approval`).
    #[serde(default = "default_trigger")]
    pub trigger: String,
    /// Watch schedule; falls back to `[poll].default_schedule`.
    #[serde(default)]
    pub schedule: Option<String>,
    /// Secret names that may hold registry credentials.
    #[serde(default)]
    pub secrets: Vec<String>,
}

fn default_trigger() -> String {
    "poll".to_string()
}

/// Credentials for one registry host.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host, e.g. `quay.io`. `docker.io` means Docker Hub.
    pub host: String,
    /// Registry user name.
    pub username: String,
    /// Registry password or token.
    pub password: String,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl TidelineConfig {
    /// Read and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TidelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the scheduler or pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.scan_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll.scan_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.queue_capacity must be greater than zero".to_string(),
            ));
        }
        for image in &self.images {
            ImageReference::parse(&image.image)
                .map_err(|e| ConfigError::Invalid(format!("images: {e}")))?;
        }
        for registry in &self.registries {
            if registry.host.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "registries: host must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
