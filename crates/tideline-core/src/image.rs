//! Container image reference parsing.
//!
//! References are stored canonically (`index.docker.io/library/nginx`) and
//! rendered in the familiar form users write (`nginx`, `org/app:1.2.3`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry host assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag assumed by registries when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

const LEGACY_DEFAULT_REGISTRY: &str = "docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("path component regex")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag regex"));

static DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").expect("digest regex")
});

/// Errors from `ImageReference::parse`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageParseError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid repository name in {0:?}")]
    InvalidRepository(String),
    #[error("invalid tag {tag:?} in {reference:?}")]
    InvalidTag { reference: String, tag: String },
    #[error("invalid digest {digest:?} in {reference:?}")]
    InvalidDigest { reference: String, digest: String },
}

/// A parsed image reference: registry, repository, optional tag and digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse `[registry/]repository[:tag][@digest]`.
    pub fn parse(reference: &str) -> Result<Self, ImageParseError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageParseError::Empty);
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest)),
            None => (reference, None),
        };

        // A colon only separates a tag when no slash follows it; otherwise
        // it belongs to a registry port (`localhost:5000/app`).
        let (name, tag) = match rest.rfind(':') {
            Some(idx) if !rest[idx..].contains('/') => (&rest[..idx], Some(&rest[idx + 1..])),
            _ => (rest, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, remainder)) if is_registry_host(first) => {
                (normalize_registry(first), remainder.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty()
            || !repository
                .split('/')
                .all(|component| PATH_COMPONENT.is_match(component))
        {
            return Err(ImageParseError::InvalidRepository(reference.to_string()));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("{OFFICIAL_REPO_PREFIX}{repository}")
        } else {
            repository
        };

        if let Some(tag) = tag {
            if !TAG.is_match(tag) {
                return Err(ImageParseError::InvalidTag {
                    reference: reference.to_string(),
                    tag: tag.to_string(),
                });
            }
        }

        if let Some(digest) = digest {
            if !DIGEST.is_match(digest) {
                return Err(ImageParseError::InvalidDigest {
                    reference: reference.to_string(),
                    digest: digest.to_string(),
                });
            }
        }

        Ok(Self {
            registry,
            repository,
            tag: tag.map(str::to_string),
            digest: digest.map(str::to_string),
        })
    }

    /// Canonical registry host.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Canonical repository path (`library/nginx` on Docker Hub).
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, if the reference carries one.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Tag, or `latest` when unpinned.
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Digest (`sha256:...`), if present.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Familiar repository name without tag or digest.
    pub fn name(&self) -> String {
        if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix(OFFICIAL_REPO_PREFIX)
                .unwrap_or(&self.repository)
                .to_string()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }

    /// The reference in familiar form, as handed to registry watchers.
    pub fn remote(&self) -> String {
        let mut out = self.name();
        if let Some(tag) = &self.tag {
            out.push(':');
            out.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }

    /// Fully qualified reference including the registry host.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = &self.tag {
            out.push(':');
            out.push_str(tag);
        }
        out
    }

    /// Whether both references point at the same registry repository.
    pub fn same_repository(&self, other: &ImageReference) -> bool {
        self.registry == other.registry && self.repository == other.repository
    }

    /// A copy of this reference pinned to `tag`, without a digest.
    pub fn with_tag(&self, tag: &str) -> Result<Self, ImageParseError> {
        if !TAG.is_match(tag) {
            return Err(ImageParseError::InvalidTag {
                reference: self.remote(),
                tag: tag.to_string(),
            });
        }
        Ok(Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = ImageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ImageParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageReference> for String {
    fn from(value: ImageReference) -> Self {
        value.remote()
    }
}

pub(crate) fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn normalize_registry(host: &str) -> String {
    if host == LEGACY_DEFAULT_REGISTRY {
        DEFAULT_REGISTRY.to_string()
    } else {
        host.to_string()
    }
}
