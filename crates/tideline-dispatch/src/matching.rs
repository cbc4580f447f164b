//! Release matching: which deployed releases a notification concerns.
//!
//! A release matches when the image in its configuration (`image.repository`
//! and the optional `image.tag`) is the notified repository and the notified
//! tag should replace the deployed one under the active `TagPolicy`. A
//! notified tag equal to the deployed tag never matches.

use semver::Version;
use tracing::{debug, warn};

use tideline_core::image::DEFAULT_TAG;
use tideline_core::{
    ChangeNotification, ImageReference, Release, ReleaseBackend, TagPolicy, Values, ValuesError,
};

use crate::error::{DispatchError, DispatchResult};

/// A release selected for upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseMatch {
    /// The matched release as listed by the backend.
    pub release: Release,
    /// Image currently deployed by the release.
    pub current: ImageReference,
    /// Tag to pin.
    pub target_tag: String,
}

/// Image deployed by a release.
///
/// Read from the release's configuration overrides, falling back to the
/// chart's default values when the overrides do not name a repository.
pub fn release_image(release: &Release) -> Result<ImageReference, ValuesError> {
    let config = Values::parse(&release.config)?;
    match config.image_reference() {
        Err(ValuesError::NoSuchPath(_)) if !release.chart.values.trim().is_empty() => {
            let defaults = Values::parse(&release.chart.values)?;
            let mut image = defaults.image_reference()?;
            // A tag override without a repository override still applies.
            if let Some(tag) = config.string_at(tideline_core::values::IMAGE_TAG_PATH)? {
                image = image.with_tag(&tag)?;
            }
            Ok(image)
        }
        other => other,
    }
}

/// Whether `new` should replace the deployed tag `current`.
///
/// An unpinned release (`current` is `None`) compares as `latest`.
pub fn should_update(current: Option<&str>, new: &str, policy: TagPolicy) -> bool {
    if current.unwrap_or(DEFAULT_TAG) == new {
        return false;
    }
    match policy {
        TagPolicy::Any => true,
        TagPolicy::Semver => match (current.and_then(parse_semver), parse_semver(new)) {
            (Some(current), Some(new)) => new > current,
            _ => false,
        },
    }
}

fn parse_semver(tag: &str) -> Option<Version> {
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    Version::parse(tag).ok()
}

/// List releases and select those the notification should upgrade.
///
/// Releases whose image cannot be read are logged and skipped.
pub async fn impacted_releases(
    backend: &dyn ReleaseBackend,
    notification: &ChangeNotification,
    policy: TagPolicy,
) -> DispatchResult<Vec<ReleaseMatch>> {
    let notified = notification.image_reference()?;
    let Some(new_tag) = notification.tag() else {
        debug!(repository = %notified.name(), "notification carries no tag, nothing to pin");
        return Ok(Vec::new());
    };

    let releases = backend
        .list_releases()
        .await
        .map_err(DispatchError::ListReleases)?;

    let mut matches = Vec::new();
    for release in releases {
        let current = match release_image(&release) {
            Ok(image) => image,
            Err(e) => {
                warn!(
                    release = %release.name,
                    error = %e,
                    "failed to get image name and tag from release"
                );
                continue;
            }
        };

        debug!(release = %release.name, image = %current, "checking image");

        if !current.same_repository(&notified) {
            continue;
        }
        if !should_update(current.tag(), new_tag, policy) {
            debug!(
                release = %release.name,
                current = current.tag_or_latest(),
                candidate = new_tag,
                "release does not need an update"
            );
            continue;
        }

        matches.push(ReleaseMatch {
            release,
            current,
            target_tag: new_tag.to_string(),
        });
    }

    Ok(matches)
}
