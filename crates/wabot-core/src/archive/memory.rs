//! In-memory tier: two bounded maps (media, text) keyed by message id.
//!
//! Each slot remembers when it was last written. Reads never refresh that
//! stamp, so the sweep is TTL plus insertion-order trimming rather than LRU.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

use crate::{config::ArchiveConfig, domain::EntryKind};

// Fixed allowance for the timestamp in size estimates.
const TIMESTAMP_BYTES: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaEntry {
    pub message_id: String,
    pub payload: Arc<[u8]>,
    pub kind: String,
    pub caption: Option<String>,
    /// Unknown when the entry was refilled from disk.
    pub deleted_by: Option<String>,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextEntry {
    pub message_id: String,
    pub content: String,
    pub deleted_by: Option<String>,
    pub inserted_at: DateTime<Utc>,
}

/// Serialized-size estimate used only for operator stats.
pub trait ApproxSize {
    fn approx_size(&self) -> usize;
}

impl ApproxSize for MediaEntry {
    fn approx_size(&self) -> usize {
        self.message_id.len()
            + self.payload.len()
            + self.kind.len()
            + self.caption.as_deref().map_or(0, str::len)
            + self.deleted_by.as_deref().map_or(0, str::len)
            + TIMESTAMP_BYTES
    }
}

impl ApproxSize for TextEntry {
    fn approx_size(&self) -> usize {
        self.message_id.len()
            + self.content.len()
            + self.deleted_by.as_deref().map_or(0, str::len)
            + TIMESTAMP_BYTES
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLimits {
    pub max_media_entries: usize,
    pub max_text_entries: usize,
    pub entry_ttl: Duration,
}

impl From<&ArchiveConfig> for MemoryLimits {
    fn from(cfg: &ArchiveConfig) -> Self {
        Self {
            max_media_entries: cfg.max_media_entries,
            max_text_entries: cfg.max_text_entries,
            entry_ttl: cfg.entry_ttl,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindSweep {
    pub expired: usize,
    pub trimmed: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub media: KindSweep,
    pub text: KindSweep,
}

impl SweepReport {
    pub fn total_removed(&self) -> usize {
        self.media.expired + self.media.trimmed + self.text.expired + self.text.trimmed
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindStats {
    pub count: usize,
    pub approx_bytes: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub media: KindStats,
    pub text: KindStats,
}

impl MemoryStats {
    pub fn total(&self) -> KindStats {
        KindStats {
            count: self.media.count + self.text.count,
            approx_bytes: self.media.approx_bytes + self.text.approx_bytes,
        }
    }
}

struct Slot<V> {
    value: V,
    touched: Instant,
    // Tie-breaker for slots written at the same instant.
    seq: u64,
}

struct TimedMap<V> {
    slots: HashMap<String, Slot<V>>,
    next_seq: u64,
}

impl<V> Default for TimedMap<V> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<V: Clone + ApproxSize> TimedMap<V> {
    fn put_at(&mut self, id: &str, value: V, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(
            id.to_string(),
            Slot {
                value,
                touched: now,
                seq,
            },
        );
    }

    fn get(&self, id: &str) -> Option<V> {
        self.slots.get(id).map(|slot| slot.value.clone())
    }

    fn remove(&mut self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    fn sweep_at(&mut self, now: Instant, ttl: Duration, capacity: usize) -> KindSweep {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| now.saturating_duration_since(slot.touched) < ttl);
        let expired = before - self.slots.len();

        let mut trimmed = 0;
        if self.slots.len() > capacity {
            let mut order: Vec<(Instant, u64, String)> = self
                .slots
                .iter()
                .map(|(id, slot)| (slot.touched, slot.seq, id.clone()))
                .collect();
            order.sort_unstable();

            let extra = self.slots.len() - capacity;
            for (_, _, id) in order.into_iter().take(extra) {
                self.slots.remove(&id);
                trimmed += 1;
            }
        }

        KindSweep { expired, trimmed }
    }

    fn stats(&self) -> KindStats {
        KindStats {
            count: self.slots.len(),
            approx_bytes: self
                .slots
                .iter()
                .map(|(id, slot)| id.len() + slot.value.approx_size())
                .sum(),
        }
    }

    fn clear(&mut self) -> usize {
        let n = self.slots.len();
        self.slots.clear();
        n
    }
}

/// Bounded cache in front of the disk tier.
///
/// The maps are private; every mutation goes through these methods. No lock is
/// held across I/O.
pub struct MemoryLayer {
    limits: MemoryLimits,
    media: Mutex<TimedMap<MediaEntry>>,
    text: Mutex<TimedMap<TextEntry>>,
}

impl MemoryLayer {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            limits,
            media: Mutex::new(TimedMap::default()),
            text: Mutex::new(TimedMap::default()),
        }
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    /// Insert or overwrite; the entry's age restarts from now.
    pub async fn put_media(&self, entry: MediaEntry) {
        self.put_media_at(entry, Instant::now()).await;
    }

    pub async fn put_media_at(&self, entry: MediaEntry, now: Instant) {
        let id = entry.message_id.clone();
        self.media.lock().await.put_at(&id, entry, now);
    }

    pub async fn put_text(&self, entry: TextEntry) {
        self.put_text_at(entry, Instant::now()).await;
    }

    pub async fn put_text_at(&self, entry: TextEntry, now: Instant) {
        let id = entry.message_id.clone();
        self.text.lock().await.put_at(&id, entry, now);
    }

    pub async fn get_media(&self, message_id: &str) -> Option<MediaEntry> {
        self.media.lock().await.get(message_id)
    }

    pub async fn get_text(&self, message_id: &str) -> Option<TextEntry> {
        self.text.lock().await.get(message_id)
    }

    /// Returns whether anything was removed.
    pub async fn delete(&self, kind: EntryKind, message_id: &str) -> bool {
        match kind {
            EntryKind::Media => self.media.lock().await.remove(message_id),
            EntryKind::Text => self.text.lock().await.remove(message_id),
        }
    }

    /// Remove every listed id of one kind; returns how many were present.
    pub async fn evict(&self, kind: EntryKind, ids: &[String]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        match kind {
            EntryKind::Media => {
                let mut map = self.media.lock().await;
                ids.iter().filter(|id| map.remove(id.as_str())).count()
            }
            EntryKind::Text => {
                let mut map = self.text.lock().await;
                ids.iter().filter(|id| map.remove(id.as_str())).count()
            }
        }
    }

    pub async fn len(&self, kind: EntryKind) -> usize {
        match kind {
            EntryKind::Media => self.media.lock().await.slots.len(),
            EntryKind::Text => self.text.lock().await.slots.len(),
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// TTL expiry, then trim the oldest entries down to capacity, per kind.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let ttl = self.limits.entry_ttl;
        let media = self
            .media
            .lock()
            .await
            .sweep_at(now, ttl, self.limits.max_media_entries);
        let text = self
            .text
            .lock()
            .await
            .sweep_at(now, ttl, self.limits.max_text_entries);

        let report = SweepReport { media, text };
        if report.total_removed() > 0 {
            debug!(
                media_expired = media.expired,
                media_trimmed = media.trimmed,
                text_expired = text.expired,
                text_trimmed = text.trimmed,
                "memory sweep"
            );
        }
        report
    }

    pub async fn stats(&self) -> MemoryStats {
        MemoryStats {
            media: self.media.lock().await.stats(),
            text: self.text.lock().await.stats(),
        }
    }

    /// Drop every entry of both kinds; returns how many were held.
    pub async fn clear(&self) -> usize {
        self.media.lock().await.clear() + self.text.lock().await.clear()
    }
}
