//! In-process watch registry.
//!
//! Keeps one watch job per image. Registering the same image, schedule and
//! credentials again leaves the existing job untouched; a changed schedule
//! or credential pair replaces it in place. Registration never performs
//! registry I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use tideline_core::{Credentials, ImageReference, RegistryWatcher};

use crate::error::PollResult;
use crate::schedule::Schedule;

/// A registered watch.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchJob {
    /// Image in familiar form, as registered.
    pub image: String,
    /// Polling schedule.
    pub schedule: Schedule,
    /// Credentials the watch authenticates with.
    pub credentials: Credentials,
    /// Unix timestamp (seconds) of the first registration.
    pub registered_at: u64,
    /// Unix timestamp (seconds) of the last schedule/credential change.
    pub updated_at: u64,
}

/// What a registration did to the job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Job table keyed by canonical image reference.
#[derive(Clone, Default)]
pub struct WatchRegistry {
    jobs: Arc<RwLock<HashMap<String, WatchJob>>>,
}

impl WatchRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh the watch for `image`.
    pub async fn register(
        &self,
        image: &str,
        schedule: &str,
        username: &str,
        password: &str,
    ) -> PollResult<WatchOutcome> {
        let reference = ImageReference::parse(image)?;
        let schedule = Schedule::parse(schedule)?;
        let credentials = Credentials::new(username, password);
        let key = reference.canonical();
        let now = epoch_secs();

        let mut jobs = self.jobs.write().await;
        let outcome = match jobs.get_mut(&key) {
            Some(job) if job.schedule == schedule && job.credentials == credentials => {
                WatchOutcome::Unchanged
            }
            Some(job) => {
                job.schedule = schedule;
                job.credentials = credentials;
                job.updated_at = now;
                WatchOutcome::Updated
            }
            None => {
                jobs.insert(
                    key,
                    WatchJob {
                        image: reference.remote(),
                        schedule,
                        credentials,
                        registered_at: now,
                        updated_at: now,
                    },
                );
                WatchOutcome::Created
            }
        };

        match outcome {
            WatchOutcome::Created => info!(%image, "watch registered"),
            WatchOutcome::Updated => info!(%image, "watch updated"),
            WatchOutcome::Unchanged => debug!(%image, "watch already registered"),
        }
        Ok(outcome)
    }

    /// Remove the watch for `image`. Returns whether one existed.
    pub async fn unwatch(&self, image: &str) -> PollResult<bool> {
        let key = ImageReference::parse(image)?.canonical();
        let removed = self.jobs.write().await.remove(&key).is_some();
        if removed {
            info!(%image, "watch removed");
        }
        Ok(removed)
    }

    /// Drop every job whose image is not in `keep`. Returns the removed
    /// images. Unparseable entries in `keep` are ignored.
    pub async fn retain_only<'a, I>(&self, keep: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: HashSet<String> = keep
            .into_iter()
            .filter_map(|image| ImageReference::parse(image).ok())
            .map(|reference| reference.canonical())
            .collect();

        let mut jobs = self.jobs.write().await;
        let mut removed = Vec::new();
        jobs.retain(|key, job| {
            let retained = keep.contains(key);
            if !retained {
                removed.push(job.image.clone());
            }
            retained
        });
        removed.sort();
        if !removed.is_empty() {
            info!(count = removed.len(), "stale watches removed");
        }
        removed
    }

    /// All jobs, sorted by image.
    pub async fn jobs(&self) -> Vec<WatchJob> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<WatchJob> = jobs.values().cloned().collect();
        out.sort_by(|a, b| a.image.cmp(&b.image));
        out
    }

    /// Job for `image`, if registered.
    pub async fn job(&self, image: &str) -> Option<WatchJob> {
        let key = ImageReference::parse(image).ok()?.canonical();
        self.jobs.read().await.get(&key).cloned()
    }

    /// Number of registered jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether no job is registered.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl RegistryWatcher for WatchRegistry {
    async fn watch(
        &self,
        image: &str,
        schedule: &str,
        username: &str,
        password: &str,
    ) -> anyhow::Result<()> {
        self.register(image, schedule, username, password).await?;
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
