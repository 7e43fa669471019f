//! Archive facade: write-through saves, memory-then-disk reads.
//!
//! Callers only talk to [`ArchiveStore`]. It owns both tiers and the two
//! background tasks that keep them bounded.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    disk::{ClearReport, DiskLayer, DiskUsage},
    eviction::EvictionScheduler,
    janitor::{evict_purged, run_janitor, DiskJanitor, JanitorPolicy, JanitorReport},
    memory::{MediaEntry, MemoryLayer, MemoryLimits, MemoryStats, SweepReport, TextEntry},
};
use crate::{config::ArchiveConfig, domain::EntryKind, Result};

/// Outcome of [`ArchiveStore::save_text`]. The memory copy always exists.
#[derive(Clone, Debug)]
pub struct SavedText {
    pub entry: TextEntry,
    pub on_disk: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MaintenanceReport {
    pub janitor: JanitorReport,
    /// Cached entries dropped because their disk copy was purged.
    pub purged_from_memory: usize,
    pub sweep: SweepReport,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClearAllReport {
    pub memory_entries: usize,
    pub disk: ClearReport,
}

struct Background {
    eviction: EvictionScheduler,
    janitor: DiskJanitor,
}

pub struct ArchiveStore {
    cfg: ArchiveConfig,
    memory: Arc<MemoryLayer>,
    disk: Arc<DiskLayer>,
    background: Mutex<Option<Background>>,
}

impl ArchiveStore {
    /// Build the store without touching the filesystem.
    pub fn new(cfg: ArchiveConfig) -> Self {
        Self {
            memory: Arc::new(MemoryLayer::new(MemoryLimits::from(&cfg))),
            disk: Arc::new(DiskLayer::new(&cfg)),
            cfg,
            background: Mutex::new(None),
        }
    }

    /// Build the store and create the on-disk layout.
    pub async fn open(cfg: ArchiveConfig) -> Result<Self> {
        let store = Self::new(cfg);
        store.disk.ensure_dirs().await?;
        info!(base_dir = %store.cfg.base_dir.display(), "archive store opened");
        Ok(store)
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.cfg
    }

    pub fn memory(&self) -> &Arc<MemoryLayer> {
        &self.memory
    }

    pub fn disk(&self) -> &Arc<DiskLayer> {
        &self.disk
    }

    pub fn janitor_policy(&self) -> JanitorPolicy {
        JanitorPolicy::from(&self.cfg)
    }

    // ============== Save ==============

    /// Persist to disk first; memory is only updated once the file exists.
    pub async fn save_media(
        &self,
        message_id: &str,
        payload: &[u8],
        kind: &str,
        caption: Option<&str>,
        deleted_by: Option<&str>,
    ) -> Result<MediaEntry> {
        let record = self
            .disk
            .write_media(message_id, payload, kind, caption, deleted_by)
            .await?;

        let entry = MediaEntry {
            message_id: message_id.to_string(),
            payload: Arc::from(payload),
            kind: record.kind,
            caption: record.caption,
            deleted_by: record.deleted_by,
            inserted_at: record.created_at,
        };
        self.memory.put_media(entry.clone()).await;
        Ok(entry)
    }

    /// Cache in memory, then append to the text log. A failed append is logged
    /// by the disk tier and reported through `on_disk`.
    pub async fn save_text(
        &self,
        message_id: &str,
        content: &str,
        deleted_by: Option<&str>,
    ) -> SavedText {
        let entry = TextEntry {
            message_id: message_id.to_string(),
            content: content.to_string(),
            deleted_by: deleted_by.map(str::to_string),
            inserted_at: Utc::now(),
        };
        self.memory.put_text(entry.clone()).await;

        let on_disk = self
            .disk
            .append_text(message_id, content, deleted_by)
            .await
            .is_ok();
        SavedText { entry, on_disk }
    }

    // ============== Lookup ==============

    pub async fn get_media(&self, message_id: &str) -> Option<MediaEntry> {
        if let Some(hit) = self.memory.get_media(message_id).await {
            return Some(hit);
        }

        let found = self.disk.read_media(message_id).await?;
        debug!(message_id, path = %found.path.display(), "media served from disk");
        let entry = MediaEntry {
            message_id: message_id.to_string(),
            payload: Arc::from(found.payload),
            kind: found.kind,
            caption: None,
            deleted_by: None,
            inserted_at: found.archived_at,
        };
        self.memory.put_media(entry.clone()).await;
        Some(entry)
    }

    pub async fn get_text(&self, message_id: &str) -> Option<TextEntry> {
        if let Some(hit) = self.memory.get_text(message_id).await {
            return Some(hit);
        }

        let record = self.disk.read_text(message_id).await?;
        debug!(message_id, "text served from disk");
        let entry = TextEntry {
            inserted_at: record.inserted_at().unwrap_or_else(Utc::now),
            message_id: record.message_id,
            content: record.content,
            deleted_by: record.deleted_by,
        };
        self.memory.put_text(entry.clone()).await;
        Some(entry)
    }

    // ============== Delete ==============

    /// Memory only; the disk copy stays until the janitor reclaims it.
    pub async fn delete_media(&self, message_id: &str) -> bool {
        self.memory.delete(EntryKind::Media, message_id).await
    }

    /// Memory only; the disk copy stays until the janitor reclaims it.
    pub async fn delete_text(&self, message_id: &str) -> bool {
        self.memory.delete(EntryKind::Text, message_id).await
    }

    // ============== Operator ==============

    pub async fn stats(&self) -> MemoryStats {
        self.memory.stats().await
    }

    pub async fn disk_usage(&self) -> DiskUsage {
        self.disk.usage().await
    }

    /// One janitor pass followed by one memory sweep.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.run_maintenance_with(&self.janitor_policy()).await
    }

    /// Same as [`Self::run_maintenance`] with an explicit retention policy.
    /// Cached copies of purged messages are dropped too, so nothing purged
    /// from disk stays readable.
    pub async fn run_maintenance_with(&self, policy: &JanitorPolicy) -> MaintenanceReport {
        let janitor = run_janitor(&self.disk, policy).await;
        let purged_from_memory = evict_purged(&self.memory, &janitor.purge).await;
        let sweep = self.memory.sweep().await;
        MaintenanceReport {
            janitor,
            purged_from_memory,
            sweep,
        }
    }

    /// Empty both mappings, delete every media file and truncate the text log.
    pub async fn clear_all(&self) -> ClearAllReport {
        let memory_entries = self.memory.clear().await;
        let disk = self.disk.clear_all().await;
        info!(
            memory_entries,
            media_removed = disk.media_removed,
            "archive cleared"
        );
        ClearAllReport {
            memory_entries,
            disk,
        }
    }

    // ============== Lifecycle ==============

    /// Start the eviction scheduler and the disk janitor. No-op if running.
    pub async fn start_background(&self) {
        let mut bg = self.background.lock().await;
        if bg.is_some() {
            debug!("background tasks already running");
            return;
        }

        *bg = Some(Background {
            eviction: EvictionScheduler::start(self.memory.clone(), self.cfg.sweep_interval),
            janitor: DiskJanitor::start(
                self.disk.clone(),
                self.memory.clone(),
                self.janitor_policy(),
                self.cfg.janitor_interval,
            ),
        });
    }

    /// Stop both background tasks, letting a run in progress finish.
    pub async fn stop_background(&self) {
        let Some(bg) = self.background.lock().await.take() else {
            return;
        };
        bg.eviction.stop().await;
        bg.janitor.stop().await;
        info!("background tasks stopped");
    }
}
