//! On-disk tier of the message archive.
//!
//! Layout under the base dir:
//! - `media/<messageId>_<epochMillis>_<kind>.bin` holds the raw payload; mtime
//!   doubles as the last-access marker used by quota trimming.
//! - `text/messages.jsonl` is an append-only log, one JSON record per line.
//!
//! Every operation is best-effort per file: a bad entry is logged and skipped so
//! a lookup or sweep never aborts halfway.

use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader},
    sync::Mutex,
};
use tracing::{debug, info, warn};

use crate::{
    config::ArchiveConfig,
    domain::{sanitize_kind, validate_message_id},
    Error, Result,
};

const MEDIA_EXT: &str = "bin";
const CREATE_ATTEMPTS: usize = 4;

/// Descriptor returned after a media payload has been written.
#[derive(Clone, Debug)]
pub struct MediaRecord {
    pub path: PathBuf,
    pub kind: String,
    pub caption: Option<String>,
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A media payload recovered from disk. Only what the filename encodes survives.
#[derive(Clone, Debug)]
pub struct DiskMedia {
    pub path: PathBuf,
    pub payload: Vec<u8>,
    pub kind: String,
    /// Decoded from the filename stamp.
    pub archived_at: DateTime<Utc>,
}

/// One line of the text log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRecord {
    pub message_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    /// Epoch millis. Logs written by the older bot call this `timestamp`.
    #[serde(rename = "insertedAt", alias = "timestamp")]
    pub inserted_at_ms: i64,
}

impl TextRecord {
    pub fn inserted_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.inserted_at_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub media_removed: usize,
    pub media_bytes_freed: u64,
    pub text_kept: usize,
    pub text_dropped: usize,
    /// False when nothing expired and the log was left untouched.
    pub text_rewritten: bool,
    /// Ids with no media file left after this purge.
    pub media_ids_gone: Vec<String>,
    /// Ids with no text record left after this purge.
    pub text_ids_gone: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub removed: usize,
    pub bytes_freed: u64,
    pub remaining_bytes: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub media_removed: usize,
    pub media_bytes_freed: u64,
    pub text_bytes_freed: u64,
}

/// Point-in-time disk accounting. Zeros stand in for anything that could not be read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub media_bytes: u64,
    pub media_files: usize,
    pub text_bytes: u64,
    pub text_records: usize,
}

impl DiskUsage {
    pub fn total_bytes(&self) -> u64 {
        self.media_bytes + self.text_bytes
    }
}

#[derive(Clone, Debug)]
struct MediaFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

pub struct DiskLayer {
    base_dir: PathBuf,
    media_dir: PathBuf,
    text_dir: PathBuf,
    text_log: PathBuf,
    last_stamp: AtomicI64,
    // Serializes appends against the purge rewrite so no line is lost in between.
    text_lock: Mutex<()>,
}

impl DiskLayer {
    pub fn new(cfg: &ArchiveConfig) -> Self {
        Self {
            base_dir: cfg.base_dir.clone(),
            media_dir: cfg.media_dir(),
            text_dir: cfg.text_dir(),
            text_log: cfg.text_log_path(),
            last_stamp: AtomicI64::new(0),
            text_lock: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub fn text_log_path(&self) -> &Path {
        &self.text_log
    }

    /// Create `media/` and `text/`. Idempotent.
    pub async fn ensure_dirs(&self) -> Result<()> {
        if let Ok(md) = fs::metadata(&self.base_dir).await {
            if !md.is_dir() {
                return Err(Error::InvalidPath {
                    path: self.base_dir.clone(),
                    reason: "archive base is not a directory".to_string(),
                });
            }
        }
        fs::create_dir_all(&self.media_dir).await?;
        fs::create_dir_all(&self.text_dir).await?;
        Ok(())
    }

    // ============== Media ==============

    pub async fn write_media(
        &self,
        message_id: &str,
        payload: &[u8],
        kind: &str,
        caption: Option<&str>,
        deleted_by: Option<&str>,
    ) -> Result<MediaRecord> {
        validate_message_id(message_id)?;
        let kind = sanitize_kind(kind);

        match self.create_media_file(message_id, payload, &kind).await {
            Ok(path) => {
                debug!(message_id, path = %path.display(), bytes = payload.len(), "archived media");
                Ok(MediaRecord {
                    path,
                    kind,
                    caption: caption.map(str::to_string),
                    deleted_by: deleted_by.map(str::to_string),
                    created_at: Utc::now(),
                })
            }
            Err(e) => {
                warn!(message_id, error = %e, "failed to write media to disk");
                Err(e.into())
            }
        }
    }

    async fn create_media_file(
        &self,
        message_id: &str,
        payload: &[u8],
        kind: &str,
    ) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.media_dir).await?;

        for _ in 0..CREATE_ATTEMPTS {
            let name = media_file_name(message_id, self.next_stamp(), kind);
            let path = self.media_dir.join(name);
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };

            let written = async {
                file.write_all(payload).await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(e);
            }
            return Ok(path);
        }

        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            "could not allocate a unique media file name",
        ))
    }

    /// Millisecond stamp, strictly increasing within this process.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|p| p);
        now.max(prev + 1)
    }

    /// Look a payload up by message id. Refreshes the file's mtime on hit.
    pub async fn read_media(&self, message_id: &str) -> Option<DiskMedia> {
        if validate_message_id(message_id).is_err() {
            return None;
        }

        let (path, stamp, kind) = match self.find_media(message_id).await {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(e) => {
                warn!(message_id, error = %e, "failed to scan media directory");
                return None;
            }
        };

        let payload = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read media file");
                return None;
            }
        };

        if let Err(e) = touch(&path).await {
            debug!(path = %path.display(), error = %e, "could not refresh media mtime");
        }

        Some(DiskMedia {
            path,
            payload,
            kind,
            archived_at: DateTime::<Utc>::from_timestamp_millis(stamp).unwrap_or_else(Utc::now),
        })
    }

    /// Newest file whose name decodes to exactly `message_id`.
    async fn find_media(&self, message_id: &str) -> io::Result<Option<(PathBuf, i64, String)>> {
        let mut dir = match fs::read_dir(&self.media_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut best: Option<(i64, PathBuf, String)> = None;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(parsed) = MediaFileName::parse(name) else {
                continue;
            };
            if parsed.message_id != message_id {
                continue;
            }
            if best.as_ref().map_or(true, |(stamp, ..)| parsed.stamp > *stamp) {
                best = Some((parsed.stamp, entry.path(), parsed.kind.to_string()));
            }
        }

        Ok(best.map(|(stamp, path, kind)| (path, stamp, kind)))
    }

    async fn list_media_files(&self) -> Vec<MediaFile> {
        let mut dir = match fs::read_dir(&self.media_dir).await {
            Ok(d) => d,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %self.media_dir.display(), error = %e, "failed to list media directory");
                }
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "media directory listing interrupted");
                    break;
                }
            };
            let path = entry.path();
            let md = match entry.metadata().await {
                Ok(md) => md,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to stat media file");
                    continue;
                }
            };
            if !md.is_file() {
                continue;
            }
            let modified = match md.modified() {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "media file has no mtime");
                    continue;
                }
            };
            out.push(MediaFile {
                path,
                size: md.len(),
                modified,
            });
        }
        out
    }

    // ============== Text ==============

    /// Append one record to the text log. The caller decides whether a failure matters.
    pub async fn append_text(
        &self,
        message_id: &str,
        content: &str,
        deleted_by: Option<&str>,
    ) -> Result<TextRecord> {
        let record = TextRecord {
            message_id: message_id.to_string(),
            content: content.to_string(),
            deleted_by: deleted_by.map(str::to_string),
            inserted_at_ms: Utc::now().timestamp_millis(),
        };

        match self.append_record(&record).await {
            Ok(()) => Ok(record),
            Err(e) => {
                warn!(message_id, error = %e, "failed to append text record");
                Err(e)
            }
        }
    }

    async fn append_record(&self, record: &TextRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.text_lock.lock().await;
        fs::create_dir_all(&self.text_dir).await?;
        // A crash can leave a partial last line; start a fresh one so this
        // record is not glued onto it.
        if ends_mid_line(&self.text_log).await? {
            line.insert(0, '\n');
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.text_log)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Most recent record for `message_id`, if any survives in the log.
    pub async fn read_text(&self, message_id: &str) -> Option<TextRecord> {
        let mut found = None;
        let scanned = scan_text_log(&self.text_log, |_, record| {
            if record.message_id == message_id {
                found = Some(record);
            }
        })
        .await;

        if let Err(e) = scanned {
            warn!(message_id, error = %e, "failed to read text log");
            return None;
        }
        found
    }

    /// Every well-formed record currently in the log, oldest first.
    pub async fn text_records(&self) -> Vec<TextRecord> {
        let mut out = Vec::new();
        if let Err(e) = scan_text_log(&self.text_log, |_, record| out.push(record)).await {
            warn!(error = %e, "failed to read text log");
        }
        out
    }

    // ============== Retention ==============

    pub async fn purge_older_than(&self, max_age: Duration) -> PurgeReport {
        self.purge_older_than_at(max_age, SystemTime::now()).await
    }

    pub async fn purge_older_than_at(&self, max_age: Duration, now: SystemTime) -> PurgeReport {
        let mut report = PurgeReport::default();
        self.purge_media(max_age, now, &mut report).await;
        self.purge_text(max_age, now, &mut report).await;
        report
    }

    async fn purge_media(&self, max_age: Duration, now: SystemTime, report: &mut PurgeReport) {
        let mut gone = BTreeSet::new();
        let mut left = BTreeSet::new();

        for file in self.list_media_files().await {
            let id = file
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(MediaFileName::parse)
                .map(|name| name.message_id.to_string());

            let age = now.duration_since(file.modified).unwrap_or(Duration::ZERO);
            let removed = age >= max_age
                && match fs::remove_file(&file.path).await {
                    Ok(()) => {
                        report.media_removed += 1;
                        report.media_bytes_freed += file.size;
                        true
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => true,
                    Err(e) => {
                        warn!(path = %file.path.display(), error = %e, "failed to purge media file");
                        false
                    }
                };

            if let Some(id) = id {
                if removed {
                    gone.insert(id);
                } else {
                    left.insert(id);
                }
            }
        }

        report.media_ids_gone = gone.difference(&left).cloned().collect();
    }

    async fn purge_text(&self, max_age: Duration, now: SystemTime, report: &mut PurgeReport) {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff_ms = system_time_ms(now).saturating_sub(max_age_ms);

        let _guard = self.text_lock.lock().await;

        let mut kept = Vec::new();
        let mut kept_count = 0usize;
        let mut dropped = 0usize;
        let mut kept_ids = BTreeSet::new();
        let mut dropped_ids = BTreeSet::new();
        let malformed = scan_text_log(&self.text_log, |raw, record| {
            if record.inserted_at_ms > cutoff_ms {
                kept.extend_from_slice(raw);
                kept.push(b'\n');
                kept_count += 1;
                kept_ids.insert(record.message_id);
            } else {
                dropped += 1;
                dropped_ids.insert(record.message_id);
            }
        })
        .await;

        let malformed = match malformed {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to read text log for purge");
                return;
            }
        };

        report.text_kept = kept_count;
        report.text_dropped = dropped;

        if dropped == 0 && malformed == 0 {
            return;
        }

        match replace_file(&self.text_log, &kept).await {
            Ok(()) => {
                report.text_rewritten = true;
                report.text_ids_gone = dropped_ids.difference(&kept_ids).cloned().collect();
            }
            Err(e) => warn!(error = %e, "failed to rewrite text log"),
        }
    }

    /// Delete media files, oldest mtime first, until media + text log fit in `target` bytes.
    pub async fn trim_to_quota(&self, target: u64) -> TrimReport {
        let mut files = self.list_media_files().await;
        files.sort_by_key(|f| f.modified);

        let text_bytes = file_len(&self.text_log).await;
        let mut total = text_bytes + files.iter().map(|f| f.size).sum::<u64>();
        let mut report = TrimReport::default();

        for file in files {
            if total <= target {
                break;
            }

            // Re-stat: the listing may be stale by now.
            let size = match fs::metadata(&file.path).await {
                Ok(md) => md.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    total = total.saturating_sub(file.size);
                    continue;
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to stat media file");
                    continue;
                }
            };

            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    total = total.saturating_sub(size);
                    report.removed += 1;
                    report.bytes_freed += size;
                    info!(path = %file.path.display(), bytes = size, "deleted media to free space");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    total = total.saturating_sub(size);
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to delete media file");
                }
            }
        }

        report.remaining_bytes = total;
        report
    }

    /// Remove every media file and truncate the text log.
    pub async fn clear_all(&self) -> ClearReport {
        let mut report = ClearReport::default();

        for file in self.list_media_files().await {
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    report.media_removed += 1;
                    report.media_bytes_freed += file.size;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to delete media file");
                }
            }
        }

        let _guard = self.text_lock.lock().await;
        let text_bytes = file_len(&self.text_log).await;
        if text_bytes > 0 {
            match fs::write(&self.text_log, b"").await {
                Ok(()) => report.text_bytes_freed = text_bytes,
                Err(e) => warn!(error = %e, "failed to truncate text log"),
            }
        }

        report
    }

    // ============== Accounting ==============

    /// Total bytes under the base directory, including anything not owned by this layer.
    pub async fn total_size(&self) -> u64 {
        directory_size(&self.base_dir).await
    }

    pub async fn usage(&self) -> DiskUsage {
        let media = self.list_media_files().await;
        let mut text_records = 0usize;
        if let Err(e) = scan_text_log(&self.text_log, |_, _| text_records += 1).await {
            warn!(error = %e, "failed to count text records");
            text_records = 0;
        }

        DiskUsage {
            media_bytes: media.iter().map(|f| f.size).sum(),
            media_files: media.len(),
            text_bytes: file_len(&self.text_log).await,
            text_records,
        }
    }
}

// ============== File naming ==============

#[derive(Debug, PartialEq, Eq)]
struct MediaFileName<'a> {
    message_id: &'a str,
    stamp: i64,
    kind: &'a str,
}

impl<'a> MediaFileName<'a> {
    /// Split `<id>_<stamp>_<kind>.bin` from the right, so ids may contain `_`.
    fn parse(name: &'a str) -> Option<Self> {
        let stem = name.strip_suffix(MEDIA_EXT)?.strip_suffix('.')?;
        let mut parts = stem.rsplitn(3, '_');
        let kind = parts.next()?;
        let stamp = parts.next()?.parse().ok()?;
        let message_id = parts.next()?;
        if message_id.is_empty() || kind.is_empty() {
            return None;
        }
        Some(Self {
            message_id,
            stamp,
            kind,
        })
    }
}

fn media_file_name(message_id: &str, stamp: i64, kind: &str) -> String {
    format!("{message_id}_{stamp}_{kind}.{MEDIA_EXT}")
}

// ============== Helpers ==============

/// Stream the text log, calling `on_record` with each raw line and its parsed record.
///
/// Blank lines are ignored; malformed lines are skipped and counted. A missing
/// log is an empty log.
async fn scan_text_log(
    path: &Path,
    mut on_record: impl FnMut(&[u8], TextRecord),
) -> io::Result<usize> {
    let file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut lines = BufReader::new(file).split(b'\n');
    let mut line_no = 0usize;
    let mut malformed = 0usize;
    while let Some(raw) = lines.next_segment().await? {
        line_no += 1;
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw.as_slice());
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<TextRecord>(raw) {
            Ok(record) => on_record(raw, record),
            Err(e) => {
                malformed += 1;
                debug!(line = line_no, error = %e, "skipping malformed text record");
            }
        }
    }
    Ok(malformed)
}

/// Recursive sum of file sizes. Unreadable entries count as zero.
pub async fn directory_size(path: &Path) -> u64 {
    let mut total = 0u64;
    let mut pending = vec![path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut rd = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "failed to list directory");
                }
                continue;
            }
        };
        loop {
            let entry = match rd.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "directory listing interrupted");
                    break;
                }
            };
            match entry.metadata().await {
                Ok(md) if md.is_dir() => pending.push(entry.path()),
                Ok(md) => total += md.len(),
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "failed to stat entry");
                }
            }
        }
    }

    total
}

/// True when the file exists, is non-empty and its last byte is not `\n`.
async fn ends_mid_line(path: &Path) -> io::Result<bool> {
    let mut file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(io::SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

/// Size of a regular file; anything else (missing, a directory) counts as zero.
async fn file_len(path: &Path) -> u64 {
    fs::metadata(path)
        .await
        .ok()
        .filter(|md| md.is_file())
        .map_or(0, |md| md.len())
}

/// Write a sibling temp file, then rename it over `path`.
async fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if written.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    written
}

async fn touch(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_modified(SystemTime::now())
    })
    .await
    .map_err(io::Error::other)?
}

fn system_time_ms(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"))
    }

    fn layer(prefix: &str) -> DiskLayer {
        DiskLayer::new(&ArchiveConfig::with_base_dir(tmp(prefix)))
    }

    fn set_mtime(path: &Path, t: SystemTime) {
        let f = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        f.set_modified(t).unwrap();
    }

    fn record_line(id: &str, content: &str, ts: i64) -> String {
        serde_json::to_string(&TextRecord {
            message_id: id.to_string(),
            content: content.to_string(),
            deleted_by: Some("u1".to_string()),
            inserted_at_ms: ts,
        })
        .unwrap()
    }

    #[test]
    fn media_file_name_round_trips_through_parse() {
        let name = media_file_name("ABC_DEF", 1_700_000_000_123, "image");
        assert_eq!(name, "ABC_DEF_1700000000123_image.bin");
        let parsed = MediaFileName::parse(&name).unwrap();
        assert_eq!(parsed.message_id, "ABC_DEF");
        assert_eq!(parsed.stamp, 1_700_000_000_123);
        assert_eq!(parsed.kind, "image");

        assert!(MediaFileName::parse("notes.txt").is_none());
        assert!(MediaFileName::parse("ABC_notanumber_image.bin").is_none());
    }

    #[tokio::test]
    async fn write_then_read_media() {
        let disk = layer("wabot-disk-rw");
        let rec = disk
            .write_media("M1", b"jpeg-bytes", "image", Some("cap"), Some("u1"))
            .await
            .unwrap();
        assert!(rec.path.starts_with(disk.media_dir()));
        assert_eq!(rec.kind, "image");
        assert_eq!(rec.caption.as_deref(), Some("cap"));

        let got = disk.read_media("M1").await.unwrap();
        assert_eq!(got.payload, b"jpeg-bytes");
        assert_eq!(got.kind, "image");
        assert!(disk.read_media("M2").await.is_none());
    }

    #[tokio::test]
    async fn read_media_does_not_match_id_prefixes() {
        let disk = layer("wabot-disk-prefix");
        disk.write_media("AB", b"ab", "image", None, None)
            .await
            .unwrap();
        disk.write_media("A_1", b"a1", "video", None, None)
            .await
            .unwrap();

        assert!(disk.read_media("A").await.is_none());
        assert_eq!(disk.read_media("A_1").await.unwrap().payload, b"a1");
    }

    #[tokio::test]
    async fn resave_writes_new_file_and_read_returns_newest() {
        let disk = layer("wabot-disk-resave");
        let first = disk
            .write_media("M1", b"old", "image", None, None)
            .await
            .unwrap();
        let second = disk
            .write_media("M1", b"new", "sticker", None, None)
            .await
            .unwrap();
        assert_ne!(first.path, second.path);
        assert!(first.path.exists());

        let got = disk.read_media("M1").await.unwrap();
        assert_eq!(got.payload, b"new");
        assert_eq!(got.kind, "sticker");
    }

    #[tokio::test]
    async fn read_media_refreshes_mtime() {
        let disk = layer("wabot-disk-touch");
        let rec = disk
            .write_media("M1", b"x", "audio", None, None)
            .await
            .unwrap();
        let old = SystemTime::now() - Duration::from_secs(3 * 86_400);
        set_mtime(&rec.path, old);

        disk.read_media("M1").await.unwrap();
        let modified = std::fs::metadata(&rec.path).unwrap().modified().unwrap();
        assert!(modified > old + Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn write_media_rejects_path_like_ids() {
        let disk = layer("wabot-disk-badid");
        assert!(disk
            .write_media("../escape", b"x", "image", None, None)
            .await
            .is_err());
        assert!(disk.read_media("../escape").await.is_none());
    }

    #[tokio::test]
    async fn text_log_skips_malformed_and_partial_lines() {
        let disk = layer("wabot-disk-corrupt");
        disk.ensure_dirs().await.unwrap();
        let now = Utc::now().timestamp_millis();
        let log = format!(
            "{}\n{}\nnot json at all\n\n{}\n{{\"messageId\":\"trunc",
            record_line("A", "one", now),
            record_line("B", "two", now),
            record_line("C", "three", now),
        );
        std::fs::write(disk.text_log_path(), log).unwrap();

        let records = disk.text_records().await;
        assert_eq!(records.len(), 3);
        assert_eq!(disk.read_text("C").await.unwrap().content, "three");
        assert!(disk.read_text("trunc").await.is_none());
    }

    #[tokio::test]
    async fn append_after_partial_line_starts_a_new_line() {
        let disk = layer("wabot-disk-torn");
        disk.append_text("A", "before crash", None).await.unwrap();
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(disk.text_log_path())
                .unwrap();
            f.write_all(b"{\"messageId\":\"trunc").unwrap();
        }

        disk.append_text("B", "after restart", None).await.unwrap();

        assert_eq!(disk.read_text("B").await.unwrap().content, "after restart");
        let records = disk.text_records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message_id, "A");

        // A clean tail gets no extra blank line.
        disk.append_text("C", "next", None).await.unwrap();
        let raw = std::fs::read_to_string(disk.text_log_path()).unwrap();
        assert!(!raw.contains("\n\n"));
        assert_eq!(disk.text_records().await.len(), 3);
    }

    #[tokio::test]
    async fn read_text_returns_latest_record_for_id() {
        let disk = layer("wabot-disk-latest");
        disk.append_text("A", "first", Some("u1")).await.unwrap();
        disk.append_text("B", "other", None).await.unwrap();
        disk.append_text("A", "second", Some("u2")).await.unwrap();

        let got = disk.read_text("A").await.unwrap();
        assert_eq!(got.content, "second");
        assert_eq!(got.deleted_by.as_deref(), Some("u2"));
        assert!(disk.read_text("Z").await.is_none());
    }

    #[tokio::test]
    async fn reads_legacy_timestamp_field() {
        let disk = layer("wabot-disk-legacy");
        disk.ensure_dirs().await.unwrap();
        std::fs::write(
            disk.text_log_path(),
            "{\"messageId\":\"L\",\"content\":\"hi\",\"deletedBy\":\"u9\",\"timestamp\":1700000000000}\n",
        )
        .unwrap();

        let got = disk.read_text("L").await.unwrap();
        assert_eq!(got.inserted_at_ms, 1_700_000_000_000);
        assert_eq!(got.deleted_by.as_deref(), Some("u9"));
    }

    #[tokio::test]
    async fn purge_removes_old_media_and_rewrites_log() {
        let disk = layer("wabot-disk-purge");
        disk.ensure_dirs().await.unwrap();
        let old = disk
            .write_media("OLD", b"0123456789", "image", None, None)
            .await
            .unwrap();
        let fresh = disk
            .write_media("NEW", b"abc", "image", None, None)
            .await
            .unwrap();
        set_mtime(&old.path, SystemTime::now() - Duration::from_secs(8 * 86_400));

        let now_ms = Utc::now().timestamp_millis();
        let log = format!(
            "{}\n{}\ngarbage\n",
            record_line("T-OLD", "stale", now_ms - 8 * 86_400_000),
            record_line("T-NEW", "fresh", now_ms),
        );
        std::fs::write(disk.text_log_path(), log).unwrap();

        let report = disk
            .purge_older_than(Duration::from_secs(7 * 86_400))
            .await;
        assert_eq!(report.media_removed, 1);
        assert_eq!(report.media_bytes_freed, 10);
        assert_eq!(report.text_kept, 1);
        assert_eq!(report.text_dropped, 1);
        assert!(report.text_rewritten);
        assert_eq!(report.media_ids_gone, vec!["OLD".to_string()]);
        assert_eq!(report.text_ids_gone, vec!["T-OLD".to_string()]);

        assert!(!old.path.exists());
        assert!(fresh.path.exists());
        let text = std::fs::read_to_string(disk.text_log_path()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(disk.read_text("T-OLD").await.is_none());
        assert_eq!(disk.read_text("T-NEW").await.unwrap().content, "fresh");
        assert!(!disk.text_log_path().with_extension("jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn purge_leaves_log_alone_when_nothing_expired() {
        let disk = layer("wabot-disk-noop");
        disk.append_text("A", "hello", None).await.unwrap();
        let before = std::fs::metadata(disk.text_log_path())
            .unwrap()
            .modified()
            .unwrap();

        let report = disk
            .purge_older_than(Duration::from_secs(7 * 86_400))
            .await;
        assert_eq!(report.text_kept, 1);
        assert!(!report.text_rewritten);
        let after = std::fs::metadata(disk.text_log_path())
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn purged_ids_exclude_ids_with_surviving_copies() {
        let disk = layer("wabot-disk-gone");
        disk.ensure_dirs().await.unwrap();
        let now = SystemTime::now();
        let stale = disk
            .write_media("M", b"old", "image", None, None)
            .await
            .unwrap();
        disk.write_media("M", b"new", "image", None, None)
            .await
            .unwrap();
        set_mtime(&stale.path, now - Duration::from_secs(8 * 86_400));

        let now_ms = system_time_ms(now);
        let log = format!(
            "{}\n{}\n",
            record_line("A", "stale", now_ms - 8 * 86_400_000),
            record_line("A", "fresh", now_ms),
        );
        std::fs::write(disk.text_log_path(), log).unwrap();

        let report = disk
            .purge_older_than_at(Duration::from_secs(7 * 86_400), now)
            .await;
        assert_eq!(report.media_removed, 1);
        assert_eq!(report.text_dropped, 1);
        assert!(report.media_ids_gone.is_empty());
        assert!(report.text_ids_gone.is_empty());
        assert_eq!(disk.read_text("A").await.unwrap().content, "fresh");
    }

    #[tokio::test]
    async fn purge_with_zero_age_drops_everything() {
        let disk = layer("wabot-disk-zero");
        disk.write_media("M", b"x", "image", None, None)
            .await
            .unwrap();
        disk.append_text("A", "hello", None).await.unwrap();

        let later = SystemTime::now() + Duration::from_millis(5);
        let report = disk.purge_older_than_at(Duration::ZERO, later).await;
        assert_eq!(report.media_removed, 1);
        assert_eq!(report.text_dropped, 1);
        assert!(disk.read_text("A").await.is_none());
        assert!(disk.read_media("M").await.is_none());
    }

    #[tokio::test]
    async fn trim_to_quota_deletes_oldest_first() {
        let disk = layer("wabot-disk-trim");
        let now = SystemTime::now();
        let mut paths = Vec::new();
        for (i, id) in ["M0", "M1", "M2", "M3"].iter().enumerate() {
            let rec = disk
                .write_media(id, &[0u8; 100], "image", None, None)
                .await
                .unwrap();
            // M0 is the oldest, M3 the newest.
            set_mtime(&rec.path, now - Duration::from_secs(1000 - i as u64 * 100));
            paths.push(rec.path);
        }

        let report = disk.trim_to_quota(250).await;
        assert_eq!(report.removed, 2);
        assert_eq!(report.bytes_freed, 200);
        assert_eq!(report.remaining_bytes, 200);
        assert!(!paths[0].exists());
        assert!(!paths[1].exists());
        assert!(paths[2].exists());
        assert!(paths[3].exists());
    }

    #[tokio::test]
    async fn trim_counts_text_log_but_never_touches_it() {
        let disk = layer("wabot-disk-trim-text");
        disk.append_text("A", &"x".repeat(300), None).await.unwrap();
        disk.write_media("M", &[0u8; 100], "image", None, None)
            .await
            .unwrap();

        let report = disk.trim_to_quota(200).await;
        assert_eq!(report.removed, 1);
        assert!(report.remaining_bytes > 200);
        assert!(disk.read_text("A").await.is_some());
    }

    #[tokio::test]
    async fn directory_size_is_recursive() {
        let base = tmp("wabot-disk-size");
        std::fs::create_dir_all(base.join("a/b")).unwrap();
        std::fs::write(base.join("top"), [0u8; 10]).unwrap();
        std::fs::write(base.join("a/mid"), [0u8; 20]).unwrap();
        std::fs::write(base.join("a/b/deep"), [0u8; 30]).unwrap();

        assert_eq!(directory_size(&base).await, 60);
        assert_eq!(directory_size(&base.join("missing")).await, 0);
    }

    #[tokio::test]
    async fn usage_and_clear_all() {
        let disk = layer("wabot-disk-clear");
        disk.write_media("M1", &[1u8; 40], "image", None, None)
            .await
            .unwrap();
        disk.write_media("M2", &[2u8; 60], "video", None, None)
            .await
            .unwrap();
        disk.append_text("A", "hello", None).await.unwrap();

        let usage = disk.usage().await;
        assert_eq!(usage.media_files, 2);
        assert_eq!(usage.media_bytes, 100);
        assert_eq!(usage.text_records, 1);
        assert!(usage.text_bytes > 0);

        let report = disk.clear_all().await;
        assert_eq!(report.media_removed, 2);
        assert_eq!(report.media_bytes_freed, 100);
        assert_eq!(report.text_bytes_freed, usage.text_bytes);

        assert_eq!(disk.usage().await, DiskUsage::default());
        assert!(disk.read_text("A").await.is_none());
    }
}
