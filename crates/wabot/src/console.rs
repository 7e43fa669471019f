//! Operator console: the owner-only `disk` chat command, driven from stdin.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use wabot_core::{
    archive::ArchiveStore,
    report::{render_cleanup, render_clear, render_disk_status},
};

const PREFIX: &str = ".";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Status,
    Cleanup,
    ClearAll,
    Help,
    Quit,
    Unknown(String),
}

/// Parse one input line. Blank lines yield `None`.
///
/// The chat prefix is optional, so `disk cleanup` and `.disk cleanup` are the same.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let unprefixed = line.strip_prefix(PREFIX).unwrap_or(line);
    let mut words = unprefixed.split_whitespace();
    let head = words.next().map(str::to_lowercase).unwrap_or_default();
    let sub = words.next().map(str::to_lowercase);

    let cmd = match (head.as_str(), sub.as_deref()) {
        ("disk", None) | ("disk", Some("status")) => Command::Status,
        ("disk", Some("cleanup")) => Command::Cleanup,
        ("disk", Some("clearall")) => Command::ClearAll,
        ("help", _) => Command::Help,
        ("quit", _) | ("exit", _) => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    };
    Some(cmd)
}

pub fn help_text() -> String {
    [
        "Commands:",
        "  disk          show storage & memory info",
        "  disk cleanup  purge old files and sweep the cache",
        "  disk clearall delete all saved messages",
        "  help          show this message",
        "  quit          stop the bot",
    ]
    .join("\n")
}

/// Run one command and return the text a chat reply would carry.
pub async fn execute(store: &ArchiveStore, cmd: &Command) -> String {
    let quota = store.config().disk_quota;
    match cmd {
        Command::Status => {
            let usage = store.disk_usage().await;
            let ram = store.stats().await;
            render_disk_status(&usage, quota, &ram, PREFIX)
        }
        Command::Cleanup => {
            info!("manual cleanup requested");
            let report = store.run_maintenance().await;
            let usage = store.disk_usage().await;
            let ram = store.stats().await;
            render_cleanup(&report, &usage, quota, &ram)
        }
        Command::ClearAll => {
            info!("clear-all requested");
            let report = store.clear_all().await;
            let ram = store.stats().await;
            render_clear(&report, &ram)
        }
        Command::Help => help_text(),
        Command::Quit => "Bye.".to_string(),
        Command::Unknown(raw) => format!("Unknown command: {raw}\n\n{}", help_text()),
    }
}

/// Read commands until `quit` or EOF.
pub async fn run(store: Arc<ArchiveStore>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let Some(cmd) = parse_command(&line) else {
            continue;
        };

        let reply = execute(&store, &cmd).await;
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;

        if cmd == Command::Quit {
            break;
        }
    }

    Ok(())
}
