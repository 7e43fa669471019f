use std::path::PathBuf;

/// Core error type for the archive bot.
///
/// Disk-tier failures are mostly logged and swallowed where they happen; the
/// variants here are what actually crosses a public boundary (config loading,
/// media saves, key validation).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message id {0:?}")]
    InvalidMessageId(String),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
