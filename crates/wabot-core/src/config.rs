use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const KIB: u64 = 1024;
const DEFAULT_DISK_QUOTA: u64 = 5 * KIB * KIB * KIB;

/// Share of the quota, in tenths, the janitor trims down to once it is exceeded.
pub const QUOTA_TRIM_TENTHS: u64 = 9;

/// Typed configuration for the bot process.
#[derive(Clone, Debug)]
pub struct Config {
    pub archive: ArchiveConfig,

    /// Run one janitor + sweep pass before serving requests.
    pub janitor_on_start: bool,
}

/// Tunables of the message archive (both tiers plus their background tasks).
#[derive(Clone, Debug)]
pub struct ArchiveConfig {
    /// Root of the on-disk tier; holds `media/` and `text/messages.jsonl`.
    pub base_dir: PathBuf,

    // Memory tier
    pub max_media_entries: usize,
    pub max_text_entries: usize,
    pub entry_ttl: Duration,
    pub sweep_interval: Duration,

    // Disk tier
    pub disk_quota: u64,
    pub max_age: Duration,
    pub janitor_interval: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
            max_media_entries: 100,
            max_text_entries: 200,
            entry_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            disk_quota: DEFAULT_DISK_QUOTA,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            janitor_interval: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl ArchiveConfig {
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn media_dir(&self) -> PathBuf {
        self.base_dir.join("media")
    }

    pub fn text_dir(&self) -> PathBuf {
        self.base_dir.join("text")
    }

    pub fn text_log_path(&self) -> PathBuf {
        self.text_dir().join("messages.jsonl")
    }

    /// Size the janitor trims down to once `disk_quota` is exceeded.
    pub fn trim_target(&self) -> u64 {
        trim_target_for(self.disk_quota)
    }

    fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("SWEEP_INTERVAL must be > 0".to_string()));
        }
        if self.janitor_interval.is_zero() {
            return Err(Error::Config("JANITOR_INTERVAL must be > 0".to_string()));
        }
        Ok(())
    }
}

impl Config {
    /// Load from the process environment, after applying `.env` if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build a config from an arbitrary key lookup (the environment, in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ArchiveConfig::default();

        let base_dir = get("ARCHIVE_DIR")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or(defaults.base_dir);

        let archive = ArchiveConfig {
            base_dir,
            max_media_entries: parse_with(&get, "MAX_MEDIA_ENTRIES", parse_count)?
                .unwrap_or(defaults.max_media_entries),
            max_text_entries: parse_with(&get, "MAX_TEXT_ENTRIES", parse_count)?
                .unwrap_or(defaults.max_text_entries),
            entry_ttl: parse_with(&get, "ENTRY_TTL", parse_duration)?
                .unwrap_or(defaults.entry_ttl),
            sweep_interval: parse_with(&get, "SWEEP_INTERVAL", parse_duration)?
                .unwrap_or(defaults.sweep_interval),
            disk_quota: parse_with(&get, "DISK_QUOTA", parse_byte_size)?
                .unwrap_or(defaults.disk_quota),
            max_age: parse_with(&get, "MAX_AGE", parse_duration)?.unwrap_or(defaults.max_age),
            janitor_interval: parse_with(&get, "JANITOR_INTERVAL", parse_duration)?
                .unwrap_or(defaults.janitor_interval),
        };
        archive.validate()?;

        let janitor_on_start = parse_with(&get, "JANITOR_ON_START", parse_bool)?.unwrap_or(true);

        Ok(Self {
            archive,
            janitor_on_start,
        })
    }
}

/// 90% of `quota`, rounded down. Integer math so large quotas stay exact.
pub fn trim_target_for(quota: u64) -> u64 {
    quota / 10 * QUOTA_TRIM_TENTHS + quota % 10 * QUOTA_TRIM_TENTHS / 10
}

fn parse_with<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    let Some(raw) = get(key).and_then(non_empty) else {
        return Ok(None);
    };
    parse(raw.trim())
        .map(Some)
        .ok_or_else(|| Error::Config(format!("invalid value for {key}: {raw:?}")))
}

fn parse_count(s: &str) -> Option<usize> {
    s.parse::<usize>().ok()
}

/// `500ms`, `90s`, `30m`, `6h`, `7d`; a bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let n: u64 = num.parse().ok()?;
    let secs = |mult: u64| n.checked_mul(mult).map(Duration::from_secs);
    match unit.trim().to_lowercase().as_str() {
        "ms" => Some(Duration::from_millis(n)),
        "" | "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        "d" => secs(24 * 60 * 60),
        _ => None,
    }
}

/// `512`, `64KB`, `512MB`, `5GB`, `1TB` (binary multiples).
pub fn parse_byte_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let n: u64 = num.parse().ok()?;
    let mult = match unit.trim().to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => KIB,
        "M" | "MB" => KIB * KIB,
        "G" | "GB" => KIB * KIB * KIB,
        "T" | "TB" => KIB * KIB * KIB * KIB,
        _ => return None,
    };
    n.checked_mul(mult)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for (key, val) in parse_dotenv(&contents) {
        // Real environment wins over the file.
        if env::var_os(&key).is_none() {
            env::set_var(key, val);
        }
    }
}

/// `KEY=value` pairs, in file order. Accepts an `export ` prefix and single or
/// double quotes around the value; comments and lines without `=` are skipped.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|raw| {
            let line = raw.trim();
            let line = line.strip_prefix("export ").unwrap_or(line);
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (key, val) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(val.trim()).to_string()))
        })
        .collect()
}

fn unquote(val: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = val.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner;
        }
    }
    val
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
