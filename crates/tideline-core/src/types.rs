//! Shared types used across tideline crates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::image::{ImageParseError, ImageReference, is_registry_host};

/// How updates for a tracked image are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPolicy {
    /// Periodic registry polling.
    Poll,
    /// Inbound registry webhooks.
    Webhook,
    /// Manual approval gate.
    Approval,
    /// No explicit trigger configured.
    #[default]
    Default,
}

impl TriggerPolicy {
    /// Parse a trigger name, case-insensitively. Unknown names map to
    /// `Default`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => TriggerPolicy::Poll,
            "webhook" => TriggerPolicy::Webhook,
            "approval" => TriggerPolicy::Approval,
            _ => TriggerPolicy::Default,
        }
    }

    /// Lowercase policy name as used in config.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPolicy::Poll => "poll",
            TriggerPolicy::Webhook => "webhook",
            TriggerPolicy::Approval => "approval",
            TriggerPolicy::Default => "default",
        }
    }
}

impl fmt::Display for TriggerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule deciding whether a notified tag should replace a deployed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagPolicy {
    /// Any tag different from the deployed one.
    #[default]
    Any,
    /// Only semantic versions strictly newer than the deployed one.
    Semver,
}

/// An image under management together with its update policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedImage {
    /// Image to watch.
    pub image: ImageReference,
    /// How updates for this image are triggered.
    pub trigger: TriggerPolicy,
    /// Watch schedule, e.g. `@every 1m`.
    pub poll_schedule: String,
    /// Secret names that may hold registry credentials.
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Name of the provider that reported this image.
    #[serde(default)]
    pub provider: String,
}

impl TrackedImage {
    /// Tracked image without secrets or provider name.
    pub fn new(image: ImageReference, trigger: TriggerPolicy, poll_schedule: &str) -> Self {
        Self {
            image,
            trigger,
            poll_schedule: poll_schedule.to_string(),
            secrets: Vec::new(),
            provider: String::new(),
        }
    }
}

/// Registry credentials. The default value is anonymous access.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Empty for anonymous access.
    pub username: String,
    /// Empty for anonymous access.
    pub password: String,
}

impl Credentials {
    /// Credentials for a user name and password.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// No credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Whether both user name and password are empty.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Registry coordinates of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Registry host; empty means the name is fully qualified or Docker Hub.
    #[serde(default)]
    pub host: String,
    /// Repository name, e.g. `org/app`.
    pub name: String,
    /// New tag; empty when the change carries none.
    #[serde(default)]
    pub tag: String,
    /// Content digest, if known.
    #[serde(default)]
    pub digest: Option<String>,
}

/// A newly observed image tag, emitted by a registry watcher or webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Where the change happened.
    pub repository: Repository,
}

impl ChangeNotification {
    /// Notification for `tag` of `host/name`.
    pub fn new(host: &str, name: &str, tag: &str) -> Self {
        Self {
            repository: Repository {
                host: host.to_string(),
                name: name.to_string(),
                tag: tag.to_string(),
                digest: None,
            },
        }
    }

    /// Tag carried by the notification, if any.
    pub fn tag(&self) -> Option<&str> {
        if self.repository.tag.is_empty() {
            None
        } else {
            Some(&self.repository.tag)
        }
    }

    /// The notified image. `host` is prepended unless `name` already names
    /// a registry.
    pub fn image_reference(&self) -> Result<ImageReference, ImageParseError> {
        let qualified = self
            .repository
            .name
            .split_once('/')
            .is_some_and(|(first, _)| is_registry_host(first));
        let mut reference = if self.repository.host.is_empty() || qualified {
            self.repository.name.clone()
        } else {
            format!("{}/{}", self.repository.host, self.repository.name)
        };
        if let Some(tag) = self.tag() {
            reference.push(':');
            reference.push_str(tag);
        }
        if let Some(digest) = &self.repository.digest {
            reference.push('@');
            reference.push_str(digest);
        }
        ImageReference::parse(&reference)
    }
}

/// Packaged deployment template consumed by the release backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    /// Chart name.
    pub name: String,
    /// Chart version.
    pub version: String,
    /// Opaque template payload; never interpreted here.
    #[serde(default)]
    pub template: String,
    /// Raw YAML default values shipped with the chart.
    #[serde(default)]
    pub values: String,
}

/// A named, versioned deployment unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Release name, unique per backend.
    pub name: String,
    /// Namespace the release is installed in.
    #[serde(default)]
    pub namespace: String,
    /// Chart the release was installed from.
    pub chart: Chart,
    /// Raw YAML configuration overrides.
    pub config: String,
    /// Monotonic counter owned by the release backend.
    pub version: u64,
}

/// Result of a successful upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Upgraded release.
    pub release: String,
    /// Release version after the upgrade.
    pub version: u64,
}

/// Options passed to the release backend for an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeOptions {
    /// Render without applying.
    pub dry_run: bool,
    /// Recreate workloads instead of rolling them.
    pub recreate: bool,
    /// Replace resources that cannot be patched.
    pub force: bool,
    /// Skip pre/post upgrade hooks.
    pub disable_hooks: bool,
    /// Backend timeout, in seconds.
    pub timeout: u64,
    /// Discard stored values and use only the chart defaults plus overrides.
    pub reset_values: bool,
    /// Merge overrides into the values of the current release.
    pub reuse_values: bool,
    /// Wait for workloads to become ready.
    pub wait: bool,
}

impl UpgradeOptions {
    /// The fixed policy used for automated upgrades.
    pub const fn conservative() -> Self {
        Self {
            dry_run: false,
            recreate: false,
            force: true,
            disable_hooks: false,
            timeout: 30,
            reset_values: false,
            reuse_values: true,
            wait: true,
        }
    }
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self::conservative()
    }
}
