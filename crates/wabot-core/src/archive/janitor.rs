//! Disk retention: age-based purge followed by quota trimming.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tracing::{debug, info};

use super::{
    disk::{DiskLayer, PurgeReport, TrimReport},
    memory::MemoryLayer,
    tasks::PeriodicTask,
};
use crate::{
    config::{trim_target_for, ArchiveConfig},
    domain::EntryKind,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JanitorPolicy {
    pub max_age: Duration,
    pub disk_quota: u64,
}

impl JanitorPolicy {
    pub fn trim_target(&self) -> u64 {
        trim_target_for(self.disk_quota)
    }
}

impl From<&ArchiveConfig> for JanitorPolicy {
    fn from(cfg: &ArchiveConfig) -> Self {
        Self {
            max_age: cfg.max_age,
            disk_quota: cfg.disk_quota,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub purge: PurgeReport,
    pub size_after_purge: u64,
    /// Present only when the quota was exceeded after the purge.
    pub trim: Option<TrimReport>,
}

pub async fn run_janitor(disk: &DiskLayer, policy: &JanitorPolicy) -> JanitorReport {
    run_janitor_at(disk, policy, SystemTime::now()).await
}

pub async fn run_janitor_at(
    disk: &DiskLayer,
    policy: &JanitorPolicy,
    now: SystemTime,
) -> JanitorReport {
    let purge = disk.purge_older_than_at(policy.max_age, now).await;
    let size_after_purge = disk.total_size().await;

    let trim = if size_after_purge > policy.disk_quota {
        info!(
            size = size_after_purge,
            quota = policy.disk_quota,
            target = policy.trim_target(),
            "disk quota exceeded, trimming oldest media"
        );
        Some(disk.trim_to_quota(policy.trim_target()).await)
    } else {
        None
    };

    info!(
        media_removed = purge.media_removed,
        text_dropped = purge.text_dropped,
        trimmed = trim.map_or(0, |t| t.removed),
        size_after_purge,
        "disk janitor pass complete"
    );

    JanitorReport {
        purge,
        size_after_purge,
        trim,
    }
}

/// Drop cached copies of ids whose last disk copy the purge removed, so a
/// cache-refilled entry does not outlive its archive record.
pub async fn evict_purged(memory: &MemoryLayer, purge: &PurgeReport) -> usize {
    let evicted = memory.evict(EntryKind::Media, &purge.media_ids_gone).await
        + memory.evict(EntryKind::Text, &purge.text_ids_gone).await;
    if evicted > 0 {
        debug!(evicted, "dropped cached copies of purged messages");
    }
    evicted
}

/// Runs [`run_janitor`] on a fixed period, then [`evict_purged`].
pub struct DiskJanitor {
    task: PeriodicTask,
}

impl DiskJanitor {
    pub fn start(
        disk: Arc<DiskLayer>,
        memory: Arc<MemoryLayer>,
        policy: JanitorPolicy,
        every: Duration,
    ) -> Self {
        info!(
            every_secs = every.as_secs_f64(),
            max_age_secs = policy.max_age.as_secs(),
            quota = policy.disk_quota,
            "starting disk janitor"
        );
        let task = PeriodicTask::spawn("disk-janitor", every, move || {
            let disk = disk.clone();
            let memory = memory.clone();
            async move {
                let report = run_janitor(&disk, &policy).await;
                evict_purged(&memory, &report.purge).await;
            }
        });
        Self { task }
    }

    pub async fn stop(self) {
        self.task.stop().await;
    }
}
