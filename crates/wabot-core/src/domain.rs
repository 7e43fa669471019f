use std::fmt;

use crate::{errors::Error, Result};

/// Which tier mapping / on-disk family an archived message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Media,
    Text,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Media => f.write_str("media"),
            EntryKind::Text => f.write_str("text"),
        }
    }
}

/// Reject message ids that cannot safely become part of a filename.
///
/// WhatsApp ids are opaque alphanumeric strings; anything carrying a path
/// separator or NUL would escape the media directory.
pub fn validate_message_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.trim() != id
    {
        return Err(Error::InvalidMessageId(id.to_string()));
    }
    Ok(())
}

/// Normalize a media kind tag so it survives the `<id>_<stamp>_<kind>.bin` encoding.
///
/// The kind is the last `_`-separated field, so it must not itself contain `_`.
pub fn sanitize_kind(kind: &str) -> String {
    let out: String = kind
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}
